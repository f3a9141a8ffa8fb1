//! Callback seams between the connection manager and the caller's protocol code.

use crate::error::Error;

/// Protocol interpreter receiving every inbound payload.
///
/// The manager has no knowledge of the exchange wire format: text payloads and
/// (possibly decompressed) binary payloads are handed over verbatim. Returning an
/// error routes it to the configured [`ErrorHandler`]; the receive loop keeps going.
///
/// Plain closures implement this trait:
///
/// ```ignore
/// let handler = |payload: &[u8]| -> exchange_ws::Result<()> {
///     let msg: MyMessage = serde_json::from_slice(payload)?;
///     tx.send(msg).map_err(|e| Error::protocol(e.to_string()))
/// };
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, payload: &[u8]) -> crate::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) -> crate::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, payload: &[u8]) -> crate::Result<()> {
        self(payload)
    }
}

/// Inflates binary frames before they reach the [`MessageHandler`].
///
/// Only binary frames pass through the decompressor; text frames never do.
pub trait Decompressor: Send + Sync + 'static {
    fn decompress(&self, payload: &[u8]) -> crate::Result<Vec<u8>>;
}

impl<F> Decompressor for F
where
    F: Fn(&[u8]) -> crate::Result<Vec<u8>> + Send + Sync + 'static,
{
    fn decompress(&self, payload: &[u8]) -> crate::Result<Vec<u8>> {
        self(payload)
    }
}

/// Receives every non-fatal error raised by the background tasks.
pub trait ErrorHandler: Send + Sync + 'static {
    fn on_error(&self, error: &Error);
}

impl<F> ErrorHandler for F
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    fn on_error(&self, error: &Error) {
        self(error);
    }
}

/// Default [`ErrorHandler`] that logs through `tracing`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrors;

impl ErrorHandler for LogErrors {
    fn on_error(&self, error: &Error) {
        tracing::warn!(error = %error, kind = ?error.kind(), "WebSocket error");
    }
}
