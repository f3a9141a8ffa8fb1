#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// WebSocket connection was closed, either by the peer or by shutdown
    ConnectionClosed,
    /// No connection is currently installed (a reconnect is in progress)
    NotConnected,
    /// Operation timed out
    Timeout,
    /// The proxy refused or failed to open a tunnel
    Proxy(String),
    /// Consecutive reconnect failures reached the configured maximum
    ReconnectExhausted {
        /// Number of failed attempts
        attempts: u32,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::NotConnected => write!(f, "WebSocket not connected"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::Proxy(reason) => write!(f, "Proxy tunnel failed: {reason}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Giving up after {attempts} failed reconnect attempts")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

impl From<std::io::Error> for crate::error::Error {
    fn from(e: std::io::Error) -> Self {
        WsError::Connection(e.into()).into()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, Kind};

    use super::*;

    #[test]
    fn reconnect_exhausted_display() {
        let error = WsError::ReconnectExhausted { attempts: 3 };
        assert_eq!(error.to_string(), "Giving up after 3 failed reconnect attempts");
    }

    #[test]
    fn io_error_becomes_websocket_kind() {
        let error: Error = std::io::Error::other("reset by peer").into();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::Connection(_))
        ));
    }
}
