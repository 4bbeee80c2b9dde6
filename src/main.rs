use std::sync::Arc;

use tracing::{error, info};

use elfinder_connector::{Config, Connector, VolumeConfig, WebServer};

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Using default configuration with a ./files volume.");
            let mut config = Config::default();
            config.volumes.push(VolumeConfig::new("files"));
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = elfinder_connector::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        elfinder_connector::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("elFinder connector");
    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    let connector = Connector::from_config(&config);
    if let Err(e) = connector.setup().await {
        error!("Failed to prepare volumes: {}", e);
        std::process::exit(1);
    }

    let server = match WebServer::new(&config.server, Arc::new(connector)) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Web server error: {}", e);
        std::process::exit(1);
    }
}
