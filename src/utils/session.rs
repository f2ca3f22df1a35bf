use crate::http::HttpResponse;
use crate::utils::{Cookies, SetCookie};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Session {
    pub data: HashMap<String, String>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl Session {
    pub fn new(ttl: u64) -> Self {
        let now = current_timestamp();
        Session {
            data: HashMap::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: u64,
    counter: u64,
    pub last_cleanup: std::time::Instant,
}

impl SessionStore {
    pub fn new(ttl: u64) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            ttl,
            counter: 0,
            last_cleanup: std::time::Instant::now(),
        }
    }

    pub fn cleanup(&mut self) {
        let now = current_timestamp();
        self.sessions.retain(|_, s| !s.is_expired(now));
        self.last_cleanup = std::time::Instant::now();
    }

    fn create(&mut self) -> String {
        self.counter += 1;
        let id = format!("{:x}-{:x}", current_timestamp(), self.counter);
        self.sessions.insert(id.clone(), Session::new(self.ttl));
        id
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Looks up the session named by the request's `Cookie` header, issuing
    /// a fresh one (and setting `Set-Cookie` on `response`) when missing or
    /// expired. Returns the session id now in effect.
    pub fn sync_session(
        &mut self,
        cookie_header: Option<&String>,
        response: &mut HttpResponse,
    ) -> String {
        let cookies = match cookie_header {
            Some(raw) => Cookies::parse(raw),
            None => Cookies::new(),
        };

        let now = current_timestamp();
        if let Some(existing) = cookies.get("session_id") {
            if self
                .sessions
                .get(existing)
                .map(|s| !s.is_expired(now))
                .unwrap_or(false)
            {
                return existing.clone();
            }
        }

        let id = self.create();
        let set_cookie = SetCookie::new("session_id", &id).max_age(self.ttl).to_header();
        response.headers.insert("set-cookie".to_string(), set_cookie);
        id
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;

    #[test]
    fn issues_new_session_when_cookie_absent() {
        let mut store = SessionStore::new(600);
        let mut response = HttpResponse::new(200, "OK");
        let id = store.sync_session(None, &mut response);
        assert!(store.get(&id).is_some());
        assert!(response.headers.contains_key("set-cookie"));
    }

    #[test]
    fn reuses_valid_existing_session() {
        let mut store = SessionStore::new(600);
        let mut response = HttpResponse::new(200, "OK");
        let id = store.sync_session(None, &mut response);

        let cookie_header = format!("session_id={id}");
        let mut response2 = HttpResponse::new(200, "OK");
        let id2 = store.sync_session(Some(&cookie_header), &mut response2);

        assert_eq!(id, id2);
        assert!(!response2.headers.contains_key("set-cookie"));
    }

    #[test]
    fn expired_session_is_replaced() {
        let mut store = SessionStore::new(0);
        let mut response = HttpResponse::new(200, "OK");
        let id = store.sync_session(None, &mut response);
        std::thread::sleep(std::time::Duration::from_millis(1100));

        let cookie_header = format!("session_id={id}");
        let mut response2 = HttpResponse::new(200, "OK");
        let id2 = store.sync_session(Some(&cookie_header), &mut response2);
        assert_ne!(id, id2);
    }
}
