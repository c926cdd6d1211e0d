// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Portico — Plugin-Hosting REST Gateway
//
//  Discovery:  filesystem manifests, hot refresh on change
//  Dispatch:   mounted plugin routes → ExecuteBackend
//  Events:     registry/health SSE fan-out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use clap::Parser;
use portico_core::config::GatewayConfig;
use portico_gateway::platform::PlatformServices;
use portico_gateway::{EchoBackend, Gateway};
use portico_registry::FsDiscoveryProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "portico", version, about = "Portico — plugin-hosting REST gateway")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Plugin manifest directory (overrides config)
    #[arg(long)]
    plugins_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    portico_observability::logger::init(&cli.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Portico starting");

    // ── Config ──
    let mut config = GatewayConfig::load(cli.config.as_deref().and_then(|p| p.to_str()))?;
    if let Some(dir) = cli.plugins_dir {
        config.plugins.dir = dir;
    }

    // ── Runtime ──
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let provider = Arc::new(FsDiscoveryProvider::new(config.plugins.dir.clone()));
        let backend = Arc::new(EchoBackend::new());
        let platform = Arc::new(PlatformServices::with_defaults());

        // Startup failures (config, initial discovery, listener bind)
        // bubble up and exit with code 1.
        let gateway = Gateway::bootstrap(config, provider, backend, platform).await?;
        gateway.run().await
    })
}
