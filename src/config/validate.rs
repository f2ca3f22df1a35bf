use crate::config::types::ServerConfig;
use std::collections::{HashMap, HashSet};

/// Drops conflicting or structurally invalid server blocks, logging every
/// rejection. Accumulates all problems before filtering rather than
/// short-circuiting on the first one, so a single bad block doesn't hide
/// others.
pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut conflict_indices = HashSet::new();

    let mut usage_map: HashMap<(String, u16, String), Vec<usize>> = HashMap::new();
    for (idx, config) in configs.iter().enumerate() {
        for port in &config.ports {
            let key = (config.host.clone(), *port, config.server_name.clone());
            usage_map.entry(key).or_default().push(idx);
        }
    }
    for ((host, port, server_name), indices) in usage_map {
        if indices.len() > 1 {
            log::warn!(
                "conflict: multiple servers defined for {host}:{port} with name '{server_name}', dropping them"
            );
            conflict_indices.extend(indices);
        }
    }

    let mut port_hosts: HashMap<u16, HashSet<String>> = HashMap::new();
    for config in &configs {
        for port in &config.ports {
            port_hosts.entry(*port).or_default().insert(config.host.clone());
        }
    }
    for (port, hosts) in port_hosts {
        if hosts.contains("0.0.0.0") && hosts.len() > 1 {
            log::warn!(
                "bind conflict: port {port} mixes wildcard '0.0.0.0' with specific hosts {hosts:?}, dropping all of them"
            );
            for (idx, config) in configs.iter().enumerate() {
                if config.ports.contains(&port) {
                    conflict_indices.insert(idx);
                }
            }
        }
    }

    for (idx, config) in configs.iter().enumerate() {
        let mut valid = true;

        for (code, path) in &config.error_pages {
            if *code < 100 || *code > 599 {
                log::warn!(
                    "server '{}' has invalid error page status code {code}",
                    config.server_name
                );
                valid = false;
            }
            if std::fs::File::open(path).is_err() {
                log::warn!(
                    "server '{}' error page for {code} does not exist at '{path}'",
                    config.server_name
                );
                valid = false;
            }
        }

        for route in &config.routes {
            let root = route.root.as_deref().unwrap_or(&config.root);
            if route.redirection.is_none() && std::fs::read_dir(root).is_err() {
                log::warn!(
                    "server '{}' route '{}' has invalid root directory '{root}'",
                    config.server_name,
                    route.path
                );
                valid = false;
            }
            if route.upload_create_dirs && route.upload_dir.is_empty() {
                log::warn!(
                    "server '{}' route '{}' sets upload_create_dirs without upload_dir",
                    config.server_name,
                    route.path
                );
                valid = false;
            }
            if let Some(ext) = &route.cgi_ext {
                if route.cgi_path.is_none() && resolve_interpreter(ext).is_none() {
                    log::warn!(
                        "server '{}' route '{}' has cgi_ext '{ext}' with no resolvable interpreter",
                        config.server_name,
                        route.path
                    );
                    valid = false;
                }
            }
        }

        if !valid {
            conflict_indices.insert(idx);
        }
    }

    if !conflict_indices.is_empty() {
        log::warn!(
            "{} server configuration(s) dropped due to validation failures",
            conflict_indices.len()
        );
    }

    configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !conflict_indices.contains(idx))
        .map(|(_, c)| c)
        .collect()
}

/// Well-known interpreter by extension, used when a route names a `cgi_ext`
/// but no explicit `cgi_path`.
pub fn resolve_interpreter(ext: &str) -> Option<&'static str> {
    match ext.trim_start_matches('.') {
        "py" => Some("python3"),
        "sh" => Some("bash"),
        "pl" => Some("perl"),
        "php" => Some("php-cgi"),
        "cgi" => None, // executed directly, no interpreter needed
        _ => None,
    }
}
