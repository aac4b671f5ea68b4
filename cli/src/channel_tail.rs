use anyhow::Result;
use lib_realtime::ChannelClient;
use lib_realtime::loggers::setup_logging;
use tokio::signal;

mod tail_logic;
use tail_logic::{config, printer};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let _log_guard = setup_logging(&config.log_options())?;

    if config.channels().is_empty() {
        tracing::warn!("No channels given; only lifecycle events will be shown. Use --channel.");
    }

    let client = ChannelClient::new(config.client_config()?);
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(printer::run_events(
        client.events(),
        shutdown_tx.subscribe(),
    )));
    for channel in config.channels() {
        handles.push(tokio::spawn(printer::run_feed(
            client.open_channel(channel),
            config.output(),
            shutdown_tx.subscribe(),
        )));
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    client.close().await?;

    tracing::info!("Shutdown complete.");
    Ok(())
}
