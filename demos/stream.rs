//! Streams public trades from a Bybit-style endpoint for a minute.
//!
//! ```sh
//! RUST_LOG=exchange_ws=debug cargo run --example stream -- wss://stream.bybit.com/v5/public/spot BTCUSDT
//! ```

use std::time::Duration;

use exchange_ws::error::Error;
use exchange_ws::{Config, ConnectionManager, Frame};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Envelope {
    topic: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .unwrap_or_else(|| "wss://stream.bybit.com/v5/public/spot".to_owned());
    let symbol = args.next().unwrap_or_else(|| "BTCUSDT".to_owned());

    let handler = |payload: &[u8]| -> exchange_ws::Result<()> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        if let Some(topic) = envelope.topic {
            info!(%topic, data = %envelope.data, "trade");
        }
        Ok(())
    };

    let config = Config::new(endpoint, handler)
        .with_heartbeat(Duration::from_secs(20), Frame::from(r#"{"op":"ping"}"#))
        .with_error_handler(|e: &Error| warn!(error = %e, "stream error"));

    let connection = ConnectionManager::start(config).await?;
    connection
        .subscribe(&json!({ "op": "subscribe", "args": [format!("publicTrade.{symbol}")] }))
        .await?;

    tokio::time::sleep(Duration::from_secs(60)).await;
    connection.shutdown().await;
    Ok(())
}
