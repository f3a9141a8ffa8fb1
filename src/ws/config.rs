#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use url::Url;

use super::traits::{Decompressor, ErrorHandler, LogErrors, MessageHandler};
use crate::Result;
use crate::error::Error;
use crate::types::{Frame, FrameKind};

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_PAUSE_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Frames to send after every successful (re)connection, before subscriptions are replayed.
pub type OnConnect = Arc<dyn Fn() -> Vec<Frame> + Send + Sync>;

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
///
/// The value is moved into the manager by
/// [`ConnectionManager::start`](super::ConnectionManager::start), which runs
/// [`Config::validate`] first. It is never modified afterwards.
#[non_exhaustive]
#[derive(Clone)]
pub struct Config {
    /// `ws://` or `wss://` URL to dial
    pub endpoint: String,
    /// Optional `http://[user:password@]host:port` proxy to tunnel the dial through
    pub proxy: Option<String>,
    /// Extra handshake headers, applied in order; names may repeat
    pub headers: Vec<(String, String)>,
    /// Heartbeat period, also the liveness check period. `Duration::ZERO` disables both.
    pub heartbeat_interval: Duration,
    /// Heartbeat payload written on every heartbeat tick
    pub heartbeat_payload: Option<Vec<u8>>,
    /// Frame kind used to write the heartbeat payload
    pub heartbeat_kind: Option<FrameKind>,
    /// Period of unconditional reconnects. `Duration::ZERO` disables the timer.
    pub reconnect_interval: Duration,
    /// Upper bound for a dial including proxy tunnel and handshake
    pub connect_timeout: Duration,
    /// A read producing nothing for this long is reported as a read failure
    pub read_timeout: Option<Duration>,
    /// Pause after a failed heartbeat write or a failed read
    pub retry_pause: Duration,
    /// Backoff applied before each redial
    pub reconnect: ReconnectConfig,
    /// Dump the handshake response through `tracing` on every connect
    pub dump: bool,
    /// Protocol interpreter receiving every inbound payload
    pub handler: Arc<dyn MessageHandler>,
    /// Optional decompressor for binary frames
    pub decompressor: Option<Arc<dyn Decompressor>>,
    /// Sink for non-fatal errors raised by the background tasks
    pub error_handler: Arc<dyn ErrorHandler>,
    /// Optional hook producing login frames for every new connection
    pub on_connect: Option<OnConnect>,
}

impl Config {
    /// Create a configuration with heartbeats and forced reconnects disabled.
    pub fn new<E: Into<String>, H: MessageHandler>(endpoint: E, handler: H) -> Self {
        Self {
            endpoint: endpoint.into(),
            proxy: None,
            headers: Vec::new(),
            heartbeat_interval: Duration::ZERO,
            heartbeat_payload: None,
            heartbeat_kind: None,
            reconnect_interval: Duration::ZERO,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            read_timeout: None,
            retry_pause: DEFAULT_RETRY_PAUSE_DURATION,
            reconnect: ReconnectConfig::default(),
            dump: false,
            handler: Arc::new(handler),
            decompressor: None,
            error_handler: Arc::new(LogErrors),
            on_connect: None,
        }
    }

    /// Enable heartbeats (and the liveness monitor) with the given period and frame.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, frame: Frame) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_kind = Some(frame.kind());
        self.heartbeat_payload = Some(frame.payload().to_vec());
        self
    }

    #[must_use]
    pub fn with_proxy<S: Into<String>>(mut self, proxy: S) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_decompressor<D: Decompressor>(mut self, decompressor: D) -> Self {
        self.decompressor = Some(Arc::new(decompressor));
        self
    }

    #[must_use]
    pub fn with_error_handler<H: ErrorHandler>(mut self, error_handler: H) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    #[must_use]
    pub fn with_on_connect<F>(mut self, on_connect: F) -> Self
    where
        F: Fn() -> Vec<Frame> + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(on_connect));
        self
    }

    /// Check the configuration for invalid combinations.
    ///
    /// A malformed proxy URL is deliberately not rejected here: it is reported at dial
    /// time and the connection proceeds direct.
    pub fn validate(&self) -> Result<()> {
        let endpoint = Url::parse(&self.endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint scheme must be ws or wss, got {}",
                endpoint.scheme()
            )));
        }

        match (&self.heartbeat_payload, self.heartbeat_kind) {
            (Some(_), None) => {
                return Err(Error::validation("heartbeat payload set without a frame kind"));
            }
            (None, Some(_)) => {
                return Err(Error::validation("heartbeat frame kind set without a payload"));
            }
            (None, None) if !self.heartbeat_interval.is_zero() => {
                return Err(Error::validation("heartbeat interval set without a payload"));
            }
            (Some(payload), Some(kind)) => {
                if Frame::from_parts(kind, payload.clone()).is_none() {
                    return Err(Error::validation("text heartbeat payload is not valid UTF-8"));
                }
            }
            (None, None) => {}
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())?;
            HeaderValue::from_str(value)?;
        }

        if self.retry_pause.is_zero() {
            return Err(Error::validation("retry pause must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::validation("connect timeout must be greater than zero"));
        }

        self.reconnect.validate()
    }

    /// The frame written on every heartbeat tick, if heartbeats are enabled.
    pub(crate) fn heartbeat_frame(&self) -> Option<Frame> {
        if self.heartbeat_interval.is_zero() {
            return None;
        }
        let kind = self.heartbeat_kind?;
        let payload = self.heartbeat_payload.clone()?;
        Frame::from_parts(kind, payload)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("proxy", &self.proxy.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.len())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_kind", &self.heartbeat_kind)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("retry_pause", &self.retry_pause)
            .field("reconnect", &self.reconnect)
            .field("dump", &self.dump)
            .field("decompressor", &self.decompressor.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed reconnects before the manager shuts down.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Pause before the first redial
    pub initial_backoff: Duration,
    /// Maximum pause between redials
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            return Err(Error::validation("max reconnect attempts must be at least one"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::validation(
                "initial reconnect backoff exceeds the maximum backoff",
            ));
        }
        if self.initial_backoff.is_zero() {
            return Err(Error::validation("initial reconnect backoff must be greater than zero"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::validation(
                "backoff multiplier must be a finite number of at least 1.0",
            ));
        }
        Ok(())
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None, // Infinite reconnection by default
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
