fn main() {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());

    let configs = match webserv::config::load_config(&config_path) {
        Ok(configs) => configs,
        Err(e) => {
            log::error!("failed to load {config_path}: {e}");
            std::process::exit(1);
        }
    };

    webserv::config::display_config(&configs);

    let mut server = match webserv::Server::new(configs) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        log::error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
