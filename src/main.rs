use std::time::Duration;

use streambook::StreambookError;
use streambook::config::fetch_config;
use streambook::models::Credentials;
use streambook::websocket::{Connection, StreamOptions};
use tracing::{debug, info};

/// How often the top of the book is logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), StreambookError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    let config = fetch_config()?;
    let credentials = config
        .credentials()
        .unwrap_or_else(|| Credentials::new("", ""));

    let options = StreamOptions::new()
        .with_websocket_url(config.websocket_url.as_str())
        .with_settings(config.settings.clone())
        .with_connect_callback(|| info!("Stream connected"))
        .with_update_callback(|update| {
            debug!(
                sequence = update.sequence,
                trades = update.trade_updates.len(),
                created = update.create_update.is_some(),
                deleted = update.delete_update.is_some(),
                "Update applied"
            );
        });

    let conn = Connection::open(credentials, &config.pair, options)?;
    info!(pair = %config.pair, "Stream opened");

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = conn.snapshot();
                if snapshot.sequence == 0 {
                    info!(state = ?conn.state(), "Waiting for order book snapshot");
                    continue;
                }
                info!(
                    sequence = snapshot.sequence,
                    status = ?snapshot.status,
                    bids = snapshot.bids.len(),
                    asks = snapshot.asks.len(),
                    best_bid = snapshot.best_bid().map(|o| o.price.to_string()),
                    best_ask = snapshot.best_ask().map(|o| o.price.to_string()),
                    "Order book"
                );
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    debug!("Failed to listen for Ctrl-C: {e}");
                }
                break;
            }
        }
    }

    conn.shutdown().await;
    Ok(())
}
