//! HTTP `CONNECT` tunnelling for WebSocket dials.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret as _, SecretString};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use url::Url;

use super::error::WsError;
use crate::Result;
use crate::error::Error;

/// Upper bound on the size of the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// A parsed `http://[user:password@]host:port` proxy.
#[derive(Debug)]
pub(crate) struct Proxy {
    host: String,
    port: u16,
    /// Pre-encoded `Basic` credentials
    authorization: Option<SecretString>,
}

impl Proxy {
    /// Parse a proxy URL. Only plain `http` proxies are supported.
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)?;
        if url.scheme() != "http" {
            return Err(Error::validation(format!(
                "unsupported proxy scheme {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::validation("proxy URL has no host"))?
            .to_owned();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::validation("proxy URL has no port"))?;

        let authorization = if url.username().is_empty() {
            None
        } else {
            let credentials = format!("{}:{}", url.username(), url.password().unwrap_or_default());
            Some(SecretString::from(STANDARD.encode(credentials)))
        };

        Ok(Self {
            host,
            port,
            authorization,
        })
    }

    /// Open a TCP connection to the proxy and ask it to tunnel to `host:port`.
    ///
    /// On success the returned stream is connected end-to-end to the target and the
    /// WebSocket handshake can run over it.
    pub(crate) async fn tunnel(&self, host: &str, port: u16) -> Result<TcpStream> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let authority = format!("{host}:{port}");
        let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
        if let Some(authorization) = &self.authorization {
            _ = write!(
                request,
                "Proxy-Authorization: Basic {}\r\n",
                authorization.expose_secret()
            );
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        // Read byte by byte so nothing past the response head is consumed.
        let mut head = Vec::with_capacity(128);
        let mut byte = [0_u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_RESPONSE_HEAD {
                return Err(WsError::Proxy("response head too large".to_owned()).into());
            }
            if stream.read(&mut byte).await? == 0 {
                return Err(
                    WsError::Proxy("proxy closed the connection during CONNECT".to_owned()).into(),
                );
            }
            head.push(byte[0]);
        }

        let status = parse_status(&head)?;
        if !(200..300).contains(&status) {
            return Err(WsError::Proxy(format!("CONNECT rejected with status {status}")).into());
        }

        tracing::debug!(proxy = %self.host, %authority, "Proxy tunnel established");
        Ok(stream)
    }
}

fn parse_status(head: &[u8]) -> Result<u16> {
    let head = String::from_utf8_lossy(head);
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();

    match (parts.next(), parts.next().map(str::parse::<u16>)) {
        (Some(version), Some(Ok(status))) if version.starts_with("HTTP/") => Ok(status),
        _ => Err(WsError::Proxy(format!("malformed CONNECT response: {status_line}")).into()),
    }
}
