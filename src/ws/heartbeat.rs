//! Heartbeat emitter and liveness monitor.
//!
//! Both run only when a heartbeat interval is configured and share it as their
//! tick period. The emitter keeps intermediaries from timing the session out; the
//! monitor notices when the peer has gone silent and forces a reconnect.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

use super::connection::{Inner, ReconnectReason};
use crate::types::Frame;

/// Write `frame` through the send gate on every tick.
///
/// A failed write is reported and followed by a short pause; the emitter keeps
/// going until shutdown, leaving dead-peer detection to the liveness monitor.
pub(crate) async fn emit(inner: Arc<Inner>, frame: Frame) {
    let period = inner.config.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => {
                tracing::debug!("Heartbeat cancellation requested, terminating...");
                break;
            }
            _ = ticker.tick() => {
                match inner.send(frame.clone()).await {
                    Ok(()) => tracing::trace!(kind = %frame.kind(), "Heartbeat sent"),
                    Err(e) => {
                        if inner.is_shutdown() {
                            break;
                        }
                        tracing::warn!(error = %e, "Unable to send heartbeat");
                        inner.report(&e);

                        tokio::select! {
                            biased;
                            () = inner.shutdown.cancelled() => break,
                            () = sleep(inner.config.retry_pause) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Reconnect whenever nothing was received for more than twice the heartbeat interval.
///
/// The reconnect runs inline, so a slow redial delays the next check instead of
/// overlapping with it.
pub(crate) async fn monitor(inner: Arc<Inner>) {
    let period = inner.config.heartbeat_interval;
    let threshold = inner.liveness_threshold();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let idle = inner.last_activity().elapsed();
                if idle <= threshold {
                    continue;
                }

                tracing::warn!(?idle, ?threshold, "No inbound activity, connection presumed dead");
                if let Err(e) = inner.reconnect(ReconnectReason::Stale).await {
                    if inner.is_shutdown() {
                        break;
                    }
                    inner.report(&e);
                }
                ticker.reset();
            }
        }
    }

    tracing::debug!("Liveness monitor terminated");
}
