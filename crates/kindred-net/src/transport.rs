//! Text-frame transport to the broker.
//!
//! The session only needs an ordered duplex pipe of text messages, so the
//! transport is abstracted behind [`Connector`]. [`WebSocketConnector`] is the
//! production implementation; tests plug in an in-memory broker.

use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens duplex text connections to a broker endpoint.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        endpoint: &str,
    ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>>;
}

/// Turn a configured endpoint into the URL to dial.
///
/// `http`/`https` map to `ws`/`wss`. SockJS endpoints expose a raw
/// WebSocket under `{endpoint}/websocket`; `sockjs` selects that path.
pub fn resolve_endpoint(raw: &str, sockjs: bool) -> Result<String, TransportError> {
    let mut url =
        Url::parse(raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "{raw}: unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("{raw}: cannot switch to {scheme}")))?;

    if sockjs {
        let path = url.path().trim_end_matches('/').to_string();
        if !path.ends_with("/websocket") {
            url.set_path(&format!("{path}/websocket"));
        }
    }

    Ok(url.to_string())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        endpoint: &str,
    ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        let endpoint = endpoint.to_string();
        Box::pin(async move {
            let (ws, response) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
            debug!(endpoint = %endpoint, status = %response.status(), "WebSocket upgraded");

            let (sink, stream) = ws.split();

            let sink = sink
                .sink_map_err(TransportError::from)
                .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

            let stream = stream.filter_map(|item| {
                future::ready(match item {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => Some(
                        String::from_utf8(data.to_vec()).map_err(|_| TransportError::InvalidPayload),
                    ),
                    Ok(Message::Close(frame)) => Some(Err(TransportError::Closed(
                        frame
                            .map(|f| f.reason.as_str().to_owned())
                            .unwrap_or_else(|| "closed by peer".to_string()),
                    ))),
                    // ping/pong are answered by tungstenite itself
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok((Box::pin(sink) as FrameSink, Box::pin(stream) as FrameStream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_sockjs_endpoint() {
        assert_eq!(
            resolve_endpoint("http://192.168.1.105:8080/ws", true).unwrap(),
            "ws://192.168.1.105:8080/ws/websocket"
        );
        assert_eq!(
            resolve_endpoint("wss://example.com/ws/", true).unwrap(),
            "wss://example.com/ws/websocket"
        );
        assert_eq!(
            resolve_endpoint("https://example.com/ws/websocket", true).unwrap(),
            "wss://example.com/ws/websocket"
        );
    }

    #[test]
    fn test_resolve_plain_endpoint() {
        assert_eq!(
            resolve_endpoint("https://example.com/stomp", false).unwrap(),
            "wss://example.com/stomp"
        );
    }

    #[test]
    fn test_resolve_rejects_bad_urls() {
        assert!(matches!(
            resolve_endpoint("not a url", false),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            resolve_endpoint("ftp://example.com/ws", false),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
