use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use bofang::config::{Config, ConfigManager};

#[derive(Parser)]
#[command(name = "bofang")]
#[command(about = "A local media proxy and content-resolution gateway")]
struct Args {
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    /// Preferred listen port; 0 picks any free port
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file_with_env(&args.config).await?;

    // Initialize tracing
    let level = if args.verbose {
        "bofang=debug".to_string()
    } else {
        config.logging.env_filter()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    info!("Starting bofang media proxy");
    info!("Loaded configuration from {}", args.config);

    let server = bofang::build_server(&config).await?;
    let rules = server.rules_handle();

    // Hot-reload swaps the rule list atomically on config changes
    let mut manager = ConfigManager::new(&args.config).await?;
    manager.set_reload_hook(move |fresh| {
        let rule_list = fresh.rules.clone().unwrap_or_default();
        info!("replacing {} proxy rules", rule_list.rules.len());
        rules.replace_rules(rule_list.rules);
    });
    manager.start_hot_reload().await?;

    let preferred_port = args.port.unwrap_or(config.server.port);
    let port = server.start(preferred_port).await?;
    info!("listening on 127.0.0.1:{}", port);
    info!("player route: http://127.0.0.1:{}/player?url=<encoded>", port);

    // Run until CTRL+C, then force-close everything
    signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    warn!("Received CTRL+C, shutting down...");

    server.stop().await;
    info!("Bofang shutdown complete");
    Ok(())
}
