use crate::config::types::{RouteConfig, ServerConfig};
use crate::http::Method;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    NotFound,
    MethodNotAllowed(Vec<String>),
}

impl ServerConfig {
    /// Longest-prefix match against this vhost's routes, then gates on
    /// method. A route with no explicit `path` matches everything under
    /// `/`, so there is always a fallback once at least one route exists.
    pub fn find_route(&self, url: &str, method: &Method) -> Result<&RouteConfig, RoutingError> {
        let path_only = url.split('?').next().unwrap_or(url);

        let mut best: Option<&RouteConfig> = None;
        for route in &self.routes {
            if path_only.starts_with(route.path.as_str()) {
                let is_better = match best {
                    Some(current) => route.path.len() > current.path.len(),
                    None => true,
                };
                if is_better {
                    best = Some(route);
                }
            }
        }

        match best {
            Some(route) => {
                if method.is_allowed(&route.methods) {
                    Ok(route)
                } else {
                    Err(RoutingError::MethodNotAllowed(route.methods.clone()))
                }
            }
            None => Err(RoutingError::NotFound),
        }
    }
}

impl RouteConfig {
    /// Checks `ip` against this route's `allow`/`deny` lists. Either list
    /// may contain literal IPs or the keyword `"all"`. A `deny` match wins
    /// unless the same address also appears in `allow`; when `allow` is
    /// non-empty, an address must appear in it to pass at all.
    pub fn is_addr_allowed(&self, ip: &IpAddr) -> bool {
        let ip_str = ip.to_string();
        let matches = |list: &[String]| list.iter().any(|entry| entry == "all" || entry == &ip_str);

        if matches(&self.deny) && !matches(&self.allow) {
            return false;
        }
        if !self.allow.is_empty() && !matches(&self.allow) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::RouteConfig;

    fn cfg_with_routes(routes: Vec<RouteConfig>) -> ServerConfig {
        ServerConfig {
            routes,
            ..ServerConfig::default()
        }
    }

    fn route(path: &str, methods: &[&str]) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            ..RouteConfig::default()
        }
    }

    #[test]
    fn picks_longest_matching_prefix() {
        let cfg = cfg_with_routes(vec![
            route("/", &["GET"]),
            route("/api/", &["GET", "POST"]),
            route("/api/admin/", &["GET"]),
        ]);
        let found = cfg.find_route("/api/admin/users", &Method::GET).unwrap();
        assert_eq!(found.path, "/api/admin/");
    }

    #[test]
    fn unmatched_method_on_matched_path_is_rejected() {
        let cfg = cfg_with_routes(vec![route("/upload/", &["POST"])]);
        let err = cfg.find_route("/upload/file.txt", &Method::GET).unwrap_err();
        assert_eq!(err, RoutingError::MethodNotAllowed(vec!["POST".to_string()]));
    }

    #[test]
    fn no_matching_prefix_is_not_found() {
        let cfg = cfg_with_routes(vec![route("/api/", &["GET"])]);
        let err = cfg.find_route("/other", &Method::GET).unwrap_err();
        assert_eq!(err, RoutingError::NotFound);
    }

    #[test]
    fn allow_list_restricts_to_listed_addresses() {
        let mut r = route("/admin/", &["GET"]);
        r.allow = vec!["10.0.0.1".to_string()];
        let allowed: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        let denied: std::net::IpAddr = "10.0.0.2".parse().unwrap();
        assert!(r.is_addr_allowed(&allowed));
        assert!(!r.is_addr_allowed(&denied));
    }

    #[test]
    fn deny_all_rejects_everything() {
        let mut r = route("/", &["GET"]);
        r.deny = vec!["all".to_string()];
        let ip: std::net::IpAddr = "127.0.0.1".parse().unwrap();
        assert!(!r.is_addr_allowed(&ip));
    }

    #[test]
    fn explicit_allow_overrides_deny_all() {
        let mut r = route("/", &["GET"]);
        r.deny = vec!["all".to_string()];
        r.allow = vec!["192.168.1.5".to_string()];
        let ip: std::net::IpAddr = "192.168.1.5".parse().unwrap();
        assert!(r.is_addr_allowed(&ip));
    }

    #[test]
    fn no_lists_allows_everyone() {
        let r = route("/", &["GET"]);
        let ip: std::net::IpAddr = "8.8.8.8".parse().unwrap();
        assert!(r.is_addr_allowed(&ip));
    }
}
