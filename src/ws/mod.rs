//! Self-healing WebSocket connection management.
//!
//! A [`ConnectionManager`] keeps one duplex session to an exchange streaming
//! endpoint alive: it heartbeats, watches for silence, reconnects with backoff and
//! replays every subscription the caller made. The exchange protocol itself is left
//! to the caller's [`MessageHandler`].
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns the connection, the send gate and the background tasks
//! - [`Config`]: immutable settings, validated once at start
//! - [`MessageHandler`], [`Decompressor`], [`ErrorHandler`]: caller-supplied seams
//!
//! # Example
//!
//! ```ignore
//! let config = Config::new("wss://stream.example.com/ws", MyProtocol::default())
//!     .with_heartbeat(Duration::from_secs(20), Frame::from(r#"{"op":"ping"}"#))
//!     .with_error_handler(|e: &Error| eprintln!("{e}"));
//!
//! let connection = ConnectionManager::start(config).await?;
//! connection.subscribe(&json!({ "op": "subscribe", "args": ["orderbook.50.BTCUSDT"] })).await?;
//! ```

pub mod config;
mod connect;
pub mod connection;
pub mod error;
mod heartbeat;
mod proxy;
mod receive;
pub mod subscription;
pub mod traits;

pub use config::{Config, OnConnect, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState, ReconnectReason};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use subscription::SubscriptionEntry;
pub use traits::*;
