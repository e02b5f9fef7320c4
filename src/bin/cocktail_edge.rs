//! Standalone edge server binary.
//!
//! Usage:
//! ```text
//! cargo run --bin cocktail_edge -- --storage-path ./cocktail_edge_data --port 3000
//! ```

use cocktail_edge::api::edge_api::{init_core, start_edge, stop_edge, EdgeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_args(EdgeConfig::from_env());
    init_core(Some(config.storage_path.clone())).map_err(anyhow::Error::msg)?;

    start_edge(config).await.map_err(anyhow::Error::msg)?;
    wait_for_shutdown().await;

    tracing::info!("Shutdown requested");
    stop_edge().await.map_err(anyhow::Error::msg)?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Could not listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

fn parse_args(mut config: EdgeConfig) -> EdgeConfig {
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--storage-path" => {
                if let Some(path) = args.next() {
                    config.storage_path = path;
                }
            }
            "--port" => match args.next().map(|p| p.parse::<u16>()) {
                Some(Ok(port)) => config.port = port,
                Some(Err(e)) => eprintln!("Invalid --port value: {e}"),
                None => eprintln!("--port needs a value"),
            },
            "--help" | "-h" => {
                eprintln!("Cocktail edge server");
                eprintln!();
                eprintln!("Usage: cocktail_edge [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --storage-path <PATH>   Directory for the offline database and logs");
                eprintln!("  --port <PORT>           Port to listen on (default: 3000)");
                eprintln!("  --help, -h              Show this help");
                eprintln!();
                eprintln!("Environment: BACKEND_URL, EDGE_MODE, EDGE_PORT, EDGE_BIND_ADDRESS,");
                eprintln!("  EDGE_STORAGE_PATH, EDGE_SHELL_ORIGIN, EDGE_UPSTREAM_TIMEOUT_SECS,");
                eprintln!("  EDGE_PROBE_INTERVAL_SECS, EDGE_CACHE_VERSION");
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {arg}");
            }
        }
    }

    config
}
