// src/main.rs
use anyhow::Result;
use clap::Parser;
use hit_counter::{HitCounterService, ServiceConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hit-counter", version, about = "Counts hits per path and forwards requests downstream")]
struct Args {
    /// Path to the configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address from the configuration
    #[arg(short, long)]
    listen_addr: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration from file by default
    let config_path = args
        .config
        .or_else(|| std::env::var("CONFIG_FILE").ok())
        .unwrap_or_else(|| "config.yml".to_string());
    let mut config = ServiceConfig::load_from_file(&config_path)?;
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }

    init_logging(&config);

    if args.check {
        config.validate()?;
        tracing::info!("Configuration '{}' is valid", config_path);
        return Ok(());
    }

    HitCounterService::new(config).start().await
}

fn init_logging(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hit_counter=debug", config.logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
