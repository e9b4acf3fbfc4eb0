//! roomchat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the address from config.toml (default 127.0.0.1:5000)
//! roomchat-server
//!
//! # Listen on all interfaces, port 6000
//! roomchat-server 0.0.0.0 --port 6000
//! ```

use clap::Parser;
use tracing::{error, info};

use roomchat::{ChatServer, Config};

/// Multi-room chat server
#[derive(Parser, Debug)]
#[command(name = "roomchat-server")]
#[command(about = "Multi-room chat server with per-room history")]
#[command(version)]
struct Args {
    /// Address to bind to (overrides config)
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::load_with_env(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config);
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Err(e) = roomchat::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        roomchat::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("roomchat server starting");

    let server = match ChatServer::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server on {}: {}", config.server.bind_addr(), e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = server.run_until(shutdown).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
