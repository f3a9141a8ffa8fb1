//! The receive loop: reads frames and dispatches payloads to the protocol interpreter.

use std::borrow::Cow;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

use super::connection::{Inner, ReaderHandoff, WsSource};
use super::error::WsError;
use crate::Result;

/// Read from whichever connection is currently attached until shutdown.
///
/// Read failures are reported and retried after `retry_pause`; they never trigger a
/// reconnect from here. A close frame from the peer shuts the manager down.
pub(crate) async fn receive_loop(
    inner: Arc<Inner>,
    mut readers: mpsc::UnboundedReceiver<ReaderHandoff>,
) {
    let mut source: Option<WsSource> = None;

    loop {
        let read = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            handoff = readers.recv() => {
                match handoff {
                    Some(ReaderHandoff::Attach(next)) => source = Some(next),
                    Some(ReaderHandoff::Detach) => source = None,
                    None => break,
                }
                continue;
            }
            read = next_frame(source.as_mut(), inner.config.read_timeout) => read,
        };

        match read {
            Ok(message) => {
                if dispatch(&inner, message).await.is_break() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket read failed");
                inner.report(&e);

                tokio::select! {
                    biased;
                    () = inner.shutdown.cancelled() => break,
                    () = sleep(inner.config.retry_pause) => {}
                }
            }
        }
    }

    tracing::debug!("Receive loop terminated");
}

/// Next frame from the attached reader; pending forever while none is attached.
async fn next_frame(source: Option<&mut WsSource>, read_timeout: Option<Duration>) -> Result<Message> {
    let Some(source) = source else {
        return std::future::pending().await;
    };

    let next = match read_timeout {
        Some(limit) => timeout(limit, source.next())
            .await
            .map_err(|_e| WsError::Timeout)?,
        None => source.next().await,
    };

    match next {
        Some(Ok(message)) => Ok(message),
        Some(Err(e)) => Err(e.into()),
        None => Err(WsError::ConnectionClosed.into()),
    }
}

async fn dispatch(inner: &Inner, message: Message) -> ControlFlow<()> {
    match message {
        Message::Text(text) => {
            inner.touch();
            tracing::trace!(text = %text.as_str(), "Received WebSocket text message");

            if let Err(e) = inner.config.handler.handle(text.as_bytes()) {
                tracing::debug!(error = %e, "Protocol handler rejected text payload");
                inner.report(&e);
            }
        }
        Message::Binary(bytes) => {
            inner.touch();
            tracing::trace!(len = bytes.len(), "Received WebSocket binary message");

            let payload: Cow<'_, [u8]> = match &inner.config.decompressor {
                Some(decompressor) => match decompressor.decompress(&bytes) {
                    Ok(inflated) => Cow::Owned(inflated),
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping frame that failed to decompress");
                        inner.report(&e);
                        return ControlFlow::Continue(());
                    }
                },
                None => Cow::Borrowed(&bytes),
            };

            if let Err(e) = inner.config.handler.handle(&payload) {
                tracing::debug!(error = %e, "Protocol handler rejected binary payload");
                inner.report(&e);
            }
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Control frames still prove the peer is alive; tungstenite answers pings.
            inner.touch();
        }
        Message::Close(frame) => {
            tracing::info!(?frame, "Peer closed the connection, shutting down");
            inner.shutdown().await;
            return ControlFlow::Break(());
        }
        Message::Frame(_) => {
            tracing::debug!("Dropping raw WebSocket frame");
        }
    }

    ControlFlow::Continue(())
}
