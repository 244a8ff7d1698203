use launchwatch::config::Config;
use launchwatch::onchain::{listener, ConnectionState, ProtocolMonitor, EVENT_TOPIC};
use std::path::Path;
use tracing::{error, info, warn};

const CONFIG_PATH: &str = "launchwatch.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(Path::new(CONFIG_PATH))?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("launchwatch v{} starting", env!("CARGO_PKG_VERSION"));
    if !Path::new(CONFIG_PATH).exists() {
        info!("no {} found, using env-only config", CONFIG_PATH);
    }

    let monitor = ProtocolMonitor::from_config(&config)?;
    info!(
        programs = monitor.registry().entries().len(),
        "watching launchpad and AMM programs"
    );

    monitor.on(
        EVENT_TOPIC,
        listener(|event| {
            let line = serde_json::to_string(event)?;
            info!(event = %line, "launch event");
            Ok(())
        }),
    );

    let mut state_rx = monitor.watch_state();
    monitor.connect();

    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    warn!("state channel closed");
                    break;
                }
                let state = *state_rx.borrow_and_update();
                info!(state = %state, "connection state");
                if state == ConnectionState::Failed {
                    error!("giving up on the transaction stream");
                    monitor.disconnect();
                    anyhow::bail!("transaction stream failed after retries");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down...");
                monitor.disconnect();
                break;
            }
        }
    }

    Ok(())
}
