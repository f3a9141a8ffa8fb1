//! Dialing and handshaking a single WebSocket connection.

use std::fmt::Write as _;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, client_async_tls_with_config, connect_async,
};
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::proxy::Proxy;
use crate::Result;
use crate::error::Error;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket to the configured endpoint.
///
/// Routes through the proxy when one is configured and parses; a proxy URL that
/// cannot be used is reported through the error handler and the dial goes direct.
/// The whole dial, tunnel and handshake included, is bounded by `connect_timeout`.
pub(crate) async fn establish(config: &Config) -> Result<WsStream> {
    let request = handshake_request(config)?;
    let proxy = config
        .proxy
        .as_deref()
        .and_then(|raw| match Proxy::parse(raw) {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unusable proxy, connecting direct");
                config.error_handler.on_error(&e);
                None
            }
        });

    let (stream, response) = timeout(config.connect_timeout, dial(config, request, proxy))
        .await
        .map_err(|_e| WsError::Timeout)??;

    tracing::info!(endpoint = %config.endpoint, status = %response.status(), "WebSocket connected");
    if config.dump {
        tracing::info!(
            endpoint = %config.endpoint,
            response = %dump_response(&response),
            "WebSocket handshake response"
        );
    }

    Ok(stream)
}

async fn dial(
    config: &Config,
    request: Request,
    proxy: Option<Proxy>,
) -> Result<(WsStream, Response)> {
    let Some(proxy) = proxy else {
        return Ok(connect_async(request).await?);
    };

    let endpoint = Url::parse(&config.endpoint)?;
    let host = endpoint
        .host_str()
        .ok_or_else(|| Error::validation("endpoint has no host"))?;
    let port = endpoint
        .port_or_known_default()
        .ok_or_else(|| Error::validation("endpoint has no port"))?;

    let stream = proxy.tunnel(host, port).await?;
    Ok(client_async_tls_with_config(request, stream, None, None).await?)
}

fn handshake_request(config: &Config) -> Result<Request> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    let headers = request.headers_mut();
    for (name, value) in &config.headers {
        headers.append(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }
    Ok(request)
}

fn dump_response(response: &Response) -> String {
    let mut dump = format!("{:?} {}\r\n", response.version(), response.status());
    for (name, value) in response.headers() {
        _ = write!(
            dump,
            "{name}: {}\r\n",
            value.to_str().unwrap_or("<non-ascii>")
        );
    }
    if let Some(body) = response.body() {
        _ = write!(dump, "\r\n{}", String::from_utf8_lossy(body));
    }
    dump
}
