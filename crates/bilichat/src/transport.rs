//! Duplex binary-message connection collaborator.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use std::sync::Once;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace};

use crate::error::{DanmakuError, Result};
use crate::http::Pairs;

/// Write half: binary frames out.
pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = DanmakuError> + Send>>;

/// Read half: binary frames in. The stream ends when the peer closes cleanly.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Adapt a binary-frame sink whose errors convert into [`DanmakuError`].
pub(crate) fn frame_sink<S>(sink: S) -> FrameSink
where
    S: Sink<Bytes> + Send + 'static,
    DanmakuError: From<S::Error>,
{
    Box::pin(sink.with(|bytes: Bytes| future::ready(Ok::<_, DanmakuError>(bytes))))
}

/// An open duplex connection, already split into halves.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens duplex connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, headers: Pairs<'_>) -> Result<Connection>;
}

static CRYPTO_PROVIDER: Once = Once::new();

fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Another component may already have installed one.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// [`Connector`] over WebSocket (`wss://host:port/sub`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, headers: Pairs<'_>) -> Result<Connection> {
        install_crypto_provider();

        let mut request = url
            .into_client_request()
            .map_err(|e| DanmakuError::connection(format!("invalid url {url}: {e}")))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DanmakuError::connection(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| DanmakuError::connection(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| DanmakuError::connection(format!("connect {url}: {e}")))?;
        debug!(url, "WebSocket connected");

        let (write, read) = ws_stream.split();

        // `with` converts every error through `From`; `sink_map_err` panics on the second.
        let sink =
            write.with(|bytes: Bytes| future::ready(Ok::<_, DanmakuError>(Message::Binary(bytes))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Close(frame)) => Some(Err(DanmakuError::connection(match frame {
                    Some(f) => format!("closed by server: {} {}", f.code, f.reason),
                    None => "closed by server".to_string(),
                }))),
                Ok(other) => {
                    trace!("Ignoring non-binary message: {:?}", other);
                    None
                }
                Err(e) => Some(Err(DanmakuError::connection(e.to_string()))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
