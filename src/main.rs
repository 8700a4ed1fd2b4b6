//! Bastion: an HTTPS origin server for single-page application builds.
//!
//! This is the application entry point. It loads configuration from a TOML
//! file and command-line flags, initializes tracing, wires the disk
//! filesystem and the two network layers into the server, and runs it until
//! the secure listener stops.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bastion::config::{Options, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use bastion::http::{setup_shutdown_handler, AxumServerLayer, NetworkLayer, Server};
use bastion::vfs::OsFileSystem;

/// Bastion: serve a static site over HTTPS with a fixed security posture
#[derive(Parser, Debug)]
#[command(name = "bastion", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "bastion=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Directory the static content path is resolved against
    #[arg(long, default_value = ".")]
    root: String,

    /// Address both listeners bind to
    #[arg(long)]
    address: Option<String>,

    /// HTTPS port
    #[arg(long)]
    port: Option<u16>,

    /// HTTP redirect port
    #[arg(long)]
    insecure_port: Option<u16>,

    /// PEM certificate file
    #[arg(long)]
    cert_file: Option<String>,

    /// PEM private key file
    #[arg(long)]
    key_file: Option<String>,

    /// Site build directory, relative to --root
    #[arg(long)]
    static_content: Option<String>,
}

impl Args {
    fn overrides(&self) -> Options {
        Options {
            address: self.address.clone(),
            port: self.port,
            insecure_port: self.insecure_port,
            key_file: self.key_file.clone(),
            cert_file: self.cert_file.clone(),
            static_content: self.static_content.clone(),
            ..Options::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration: file first, then flags on top
    let options = Options::load(&args.config)?.merge(args.overrides());

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let json = options.logging.format == "json";
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("TLS crypto provider already installed");
    }

    tracing::info!(config = %args.config, root = %args.root, "Loaded configuration");

    let secure: Arc<dyn NetworkLayer> = Arc::new(AxumServerLayer::new());
    let insecure: Arc<dyn NetworkLayer> = Arc::new(AxumServerLayer::new());
    setup_shutdown_handler(vec![secure.clone(), insecure.clone()]);

    let server = Server::new(
        &options,
        Arc::new(OsFileSystem::new(&args.root)),
        secure,
        insecure,
    );
    server.start().await?;

    tracing::info!("Server stopped");
    Ok(())
}
