use crate::config::types::ServerConfig;

/// Emits a concise summary of the loaded configuration at startup, one
/// `log::info!` line per server block and route, for operators watching
/// `RUST_LOG=info`.
pub fn display_config(configs: &[ServerConfig]) {
    log::info!("loaded {} server block(s)", configs.len());
    for server in configs {
        log::info!(
            "server '{}' on {}:{:?} (default={}, root='{}', body_limit={}B)",
            server.server_name,
            server.host,
            server.ports,
            server.default_server,
            server.root,
            server.client_max_body_size
        );
        if !server.error_pages.is_empty() {
            log::info!("  custom error pages: {:?}", server.error_pages);
        }
        for route in &server.routes {
            log::info!(
                "  route '{}': methods={:?} root={:?} cgi_ext={:?} upload_dir='{}'",
                route.path,
                route.methods,
                route.root,
                route.cgi_ext,
                route.upload_dir
            );
        }
    }
}
