use lib_realtime::{ChannelFeed, ConnectionEvent, Message};
use tokio::sync::broadcast;

use crate::tail_logic::config::OutputFormat;

/// Renders one message according to `format`.
pub fn render(message: &Message, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => message
            .to_text()
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
        OutputFormat::Text => format!(
            "{} [{}] {} {}",
            message.timestamp,
            message.channel.as_deref().unwrap_or("-"),
            message.kind,
            message.data
        ),
    }
}

/// Prints every message arriving on `feed` until shutdown.
pub async fn run_feed(mut feed: ChannelFeed, format: OutputFormat, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!(channel = feed.channel(), "tailing channel");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(channel = feed.channel(), "feed received shutdown signal");
                break;
            }
            next = feed.recv() => match next {
                Some(message) => println!("{}", render(&message, format)),
                None => break,
            }
        }
    }
    feed.dispose();
}

/// Logs lifecycle events and user-facing notifications.
pub async fn run_events(mut events: broadcast::Receiver<ConnectionEvent>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let event = tokio::select! {
            _ = shutdown.recv() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(ConnectionEvent::Opened) => tracing::info!("connected"),
            Ok(ConnectionEvent::Closed { clean, reason }) => {
                tracing::info!(clean, reason = %reason, "connection closed")
            }
            Ok(ConnectionEvent::ReconnectScheduled { attempt, delay }) => tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            ),
            Ok(ConnectionEvent::TransportError(reason)) => {
                tracing::warn!(reason = %reason, "transport error")
            }
            Ok(ConnectionEvent::Notice(notice)) => eprintln!("{notice}"),
            Ok(ConnectionEvent::Message(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
