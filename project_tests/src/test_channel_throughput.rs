use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use lib_realtime::loggers::{LogOptions, setup_logging};
use lib_realtime::{ChannelClient, ClientConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Per-channel message rates from a live event server", long_about = None)]
struct Args {
    /// Event server WebSocket URL
    #[clap(long, default_value = "ws://localhost:8000/ws")]
    url: String,

    /// Channels to subscribe to
    #[clap(short, long = "channel", value_delimiter = ',', default_value = "fire_updates,weather_updates")]
    channels: Vec<String>,

    /// Report interval in minutes
    #[clap(short, long, default_value_t = 1)]
    report_interval_minutes: u64,
}

#[derive(Default)]
struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Utc>>,
    channel_timestamps: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = setup_logging(&LogOptions::default())?;

    let client = ChannelClient::new(ClientConfig::with_url(args.url.clone()));
    let stats = Arc::new(Mutex::new(Stats::default()));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_minutes.max(1) * 60;
    let state_client = client.clone();
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let one_minute_ago = Utc::now() - Duration::minutes(1);

            let Ok(mut data) = stats_reporter.lock() else {
                break;
            };

            // Clean global
            while data.global_timestamps.front().is_some_and(|&t| t < one_minute_ago) {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            // Clean per channel and collect rates
            let mut rates: Vec<(String, usize)> = Vec::new();
            for (channel, dq) in data.channel_timestamps.iter_mut() {
                while dq.front().is_some_and(|&t| t < one_minute_ago) {
                    dq.pop_front();
                }
                if !dq.is_empty() {
                    rates.push((channel.clone(), dq.len()));
                }
            }

            // Sort DESC by msg/min
            rates.sort_by(|a, b| b.1.cmp(&a.1));

            let report = rates
                .iter()
                .map(|(c, r)| format!("{}: {} msg/min", c, r))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("Connection: {}", state_client.state());
            println!("Global rate: {} msg/min", global_rate);
            println!("Channels: {}", if report.is_empty() { "No data" } else { &report });
            println!("----------------------------\n");
        }
    });

    println!("Connecting to {}...", args.url);
    for channel in &args.channels {
        let mut feed = client.open_channel(channel);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Some(message) = feed.recv().await {
                let now = Utc::now();
                if let Ok(mut data) = stats.lock() {
                    data.global_timestamps.push_back(now);
                    data.channel_timestamps
                        .entry(message.channel.clone().unwrap_or_default())
                        .or_default()
                        .push_back(now);
                }
            }
        });
    }
    println!("Subscribed to {}. Press Ctrl+C to stop.", args.channels.join(", "));

    tokio::signal::ctrl_c().await?;
    client.close().await?;
    Ok(())
}
