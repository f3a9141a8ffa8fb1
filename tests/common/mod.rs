#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use exchange_ws::error::{Error, Kind};
use exchange_ws::ws::{ErrorHandler, MessageHandler};
use exchange_ws::{Config, Result};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tracing_subscriber::EnvFilter;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Instructions fanned out to every live server-side connection.
#[derive(Clone, Debug)]
pub enum Command {
    Send(Message),
    /// Drop the connection without a close handshake
    Kick,
}

/// Mock WebSocket server.
///
/// Records every text, binary and ping frame it receives together with the index of
/// the connection it arrived on. Connections are numbered from zero in accept order.
pub struct MockWsServer {
    pub addr: SocketAddr,
    /// Broadcast commands to ALL connected clients
    command_tx: broadcast::Sender<Command>,
    received_rx: mpsc::UnboundedReceiver<(usize, Message)>,
    headers_rx: mpsc::UnboundedReceiver<HeaderMap>,
    connections: Arc<AtomicUsize>,
    acceptor: JoinHandle<()>,
}

impl MockWsServer {
    /// Start a server that answers every `"ping"` text frame with `"pong"`.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that never sends anything unless told to.
    pub async fn silent() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(answer_pings: bool) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (headers_tx, headers_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = command_tx.clone();
        let counter = Arc::clone(&connections);

        let acceptor = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake so nothing sent right after the client
                // connects is lost.
                let mut command_rx = broadcast_tx.subscribe();
                let id = counter.fetch_add(1, Ordering::SeqCst);

                let headers_tx = headers_tx.clone();
                let callback =
                    move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                        drop(headers_tx.send(request.headers().clone()));
                        Ok(response)
                    };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if answer_pings
                                            && text.as_str() == "ping"
                                            && write.send(Message::text("pong")).await.is_err()
                                        {
                                            break;
                                        }
                                        drop(received_tx.send((id, Message::Text(text))));
                                    }
                                    Some(Ok(message @ (Message::Binary(_) | Message::Ping(_)))) => {
                                        drop(received_tx.send((id, message)));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Send(message)) => {
                                        if write.send(message).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Kick) | Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
            headers_rx,
            connections,
            acceptor,
        }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Send a message to all connected clients.
    pub fn send(&self, message: Message) {
        drop(self.command_tx.send(Command::Send(message)));
    }

    pub fn send_text(&self, text: &str) {
        self.send(Message::text(text));
    }

    /// Drop all connections without closing them.
    pub fn kick_all(&self) {
        drop(self.command_tx.send(Command::Kick));
    }

    /// Close the listening socket; established connections stay up.
    pub async fn stop_accepting(&self) {
        self.acceptor.abort();
        while !self.acceptor.is_finished() {
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Number of TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: usize) -> bool {
        timeout(RECV_TIMEOUT, async {
            while self.connections() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Receive the next recorded frame.
    pub async fn recv(&mut self) -> Option<(usize, Message)> {
        timeout(RECV_TIMEOUT, self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Receive the next recorded text frame, skipping everything else.
    pub async fn recv_text(&mut self) -> Option<(usize, String)> {
        loop {
            if let (id, Message::Text(text)) = self.recv().await? {
                return Some((id, text.to_string()));
            }
        }
    }

    /// Whether any frame arrives within `window`.
    pub async fn receives_within(&mut self, window: Duration) -> bool {
        matches!(timeout(window, self.received_rx.recv()).await, Ok(Some(_)))
    }

    pub fn drain(&mut self) {
        while self.received_rx.try_recv().is_ok() {}
    }

    /// Handshake headers of the next accepted connection.
    pub async fn recv_headers(&mut self) -> Option<HeaderMap> {
        timeout(RECV_TIMEOUT, self.headers_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Route crate logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log sink shared between a `tracing` subscriber and the test reading it.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Send this thread's `info` logs into `logs` while the guard lives.
///
/// Only covers work polled on the current thread, so pair it with the default
/// single-threaded `#[tokio::test]` runtime.
pub fn capture_logs(logs: &CapturedLogs) -> tracing::subscriber::DefaultGuard {
    let logs = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || logs.clone())
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// Mock HTTP `CONNECT` proxy. Yields the request head of every tunnel it opens.
pub async fn start_proxy() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut client, _)) = listener.accept().await {
            let head_tx = head_tx.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut byte = [0_u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    if client.read(&mut byte).await.unwrap_or(0) == 0 {
                        return;
                    }
                    head.push(byte[0]);
                }

                let head = String::from_utf8(head).unwrap();
                let target = head.split_whitespace().nth(1).unwrap().to_owned();
                drop(head_tx.send(head));

                let Ok(mut upstream) = TcpStream::connect(target).await else {
                    return;
                };
                client
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .unwrap();
                _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
            });
        }
    });

    (addr, head_rx)
}

/// Handler forwarding every payload into a channel.
pub fn collector() -> (impl MessageHandler, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |payload: &[u8]| -> Result<()> {
        drop(tx.send(payload.to_vec()));
        Ok(())
    };
    (handler, rx)
}

/// Error handler forwarding every reported error into a channel.
pub fn error_collector() -> (impl ErrorHandler, mpsc::UnboundedReceiver<(Kind, String)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |error: &Error| {
        drop(tx.send((error.kind(), error.to_string())));
    };
    (handler, rx)
}

pub async fn recv_payload(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
    timeout(RECV_TIMEOUT, rx.recv()).await.ok().flatten()
}

pub async fn recv_error(rx: &mut mpsc::UnboundedReceiver<(Kind, String)>) -> Option<(Kind, String)> {
    timeout(RECV_TIMEOUT, rx.recv()).await.ok().flatten()
}

/// Shrink every pause so reconnect tests finish quickly.
pub fn fast(mut config: Config) -> Config {
    config.reconnect.initial_backoff = Duration::from_millis(10);
    config.reconnect.max_backoff = Duration::from_millis(50);
    config.retry_pause = Duration::from_millis(50);
    config.connect_timeout = Duration::from_secs(2);
    config
}
