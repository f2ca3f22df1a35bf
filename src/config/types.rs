use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_IDLE_SESSION_SECS: u64 = 600;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub default_server: bool,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_index")]
    pub index: Vec<String>,
    #[serde(default)]
    pub autoindex: bool,
    #[serde(default = "default_max_body_size", deserialize_with = "deserialize_body_size")]
    pub client_max_body_size: usize,
    #[serde(default)]
    pub error_pages: HashMap<u16, String>,
    #[serde(default)]
    pub error_page_dir: Option<String>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ports: default_ports(),
            server_name: default_server_name(),
            server_names: Vec::new(),
            default_server: false,
            root: default_root(),
            index: default_index(),
            autoindex: false,
            client_max_body_size: default_max_body_size(),
            error_pages: HashMap::new(),
            error_page_dir: None,
            routes: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// All server names this vhost answers to; falls back to `host` when
    /// neither `server_name` nor `server_names` was configured.
    pub fn names(&self) -> Vec<&str> {
        if !self.server_names.is_empty() {
            self.server_names.iter().map(String::as_str).collect()
        } else {
            vec![self.server_name.as_str()]
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    #[serde(default = "default_route_path")]
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    pub root: Option<String>,
    #[serde(default)]
    pub index: Vec<String>,
    pub cgi_ext: Option<String>,
    pub cgi_path: Option<String>,
    #[serde(default)]
    pub cgi_params: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_opt_body_size")]
    pub max_body_size: Option<usize>,
    pub autoindex: Option<bool>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub upload_dir: String,
    #[serde(default)]
    pub upload_create_dirs: bool,
    pub redirection: Option<String>,
    pub redirect_code: Option<u16>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            path: default_route_path(),
            methods: default_methods(),
            root: None,
            index: Vec::new(),
            cgi_ext: None,
            cgi_path: None,
            cgi_params: HashMap::new(),
            max_body_size: None,
            autoindex: None,
            allow: Vec::new(),
            deny: Vec::new(),
            upload_dir: String::new(),
            upload_create_dirs: false,
            redirection: None,
            redirect_code: None,
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_ports() -> Vec<u16> {
    vec![DEFAULT_PORT]
}
fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}
fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}
fn default_index() -> Vec<String> {
    vec!["index.html".to_string()]
}
fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}
fn default_route_path() -> String {
    "/".to_string()
}
fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "DELETE".to_string()]
}

/// Accepts either a bare byte count or a `"5M"`/`"512K"`/`"1G"` suffixed
/// string, per the configuration contract's K/M/G suffixes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BodySizeValue {
    Bytes(u64),
    Suffixed(String),
}

pub fn parse_body_size_str(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty body size".to_string());
    }
    let (digits, mult) = match s.chars().last().unwrap() {
        'k' | 'K' => (&s[..s.len() - 1], 1024u64),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid body size: {s}"))?;
    let bytes = n
        .checked_mul(mult)
        .ok_or_else(|| format!("body size overflow: {s}"))?;
    const MAX: u64 = 4 * 1024 * 1024 * 1024;
    if bytes > MAX {
        return Err(format!("body size {s} exceeds the 4 GiB ceiling"));
    }
    Ok(bytes as usize)
}

fn deserialize_body_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = BodySizeValue::deserialize(deserializer)?;
    match value {
        BodySizeValue::Bytes(n) => Ok(n as usize),
        BodySizeValue::Suffixed(s) => parse_body_size_str(&s).map_err(DeError::custom),
    }
}

fn deserialize_opt_body_size<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<BodySizeValue> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(BodySizeValue::Bytes(n)) => Ok(Some(n as usize)),
        Some(BodySizeValue::Suffixed(s)) => {
            parse_body_size_str(&s).map(Some).map_err(DeError::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_bytes() {
        assert_eq!(parse_body_size_str("1024").unwrap(), 1024);
    }

    #[test]
    fn parses_suffixes() {
        assert_eq!(parse_body_size_str("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_body_size_str("512K").unwrap(), 512 * 1024);
        assert_eq!(parse_body_size_str("1G").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_oversized() {
        assert!(parse_body_size_str("5G").is_err());
    }

    #[test]
    fn server_config_defaults_to_host_as_name() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.names(), vec![DEFAULT_SERVER_NAME]);
    }
}
