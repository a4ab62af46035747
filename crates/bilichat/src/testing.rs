//! In-crate test doubles for the HTTP and connection collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{DanmakuError, Result};
use crate::http::{HttpClient, HttpResponse, Pairs};
use crate::packet::{Packet, op, ver};
use crate::transport::{Connection, Connector, frame_sink};

/// Debug-level log output captured by the test harness.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn owned(pairs: Pairs<'_>) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    /// Query parameters or form fields
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Canned responses keyed by exact URL; unknown URLs fail.
#[derive(Default)]
pub(crate) struct MockHttp {
    routes: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttp {
    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn respond_json(&self, url: &str, body: Value) {
        self.respond(url, HttpResponse::new(200, body.to_string()));
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    fn handle(
        &self,
        method: &'static str,
        url: &str,
        params: Pairs<'_>,
        headers: Pairs<'_>,
    ) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            params: owned(params),
            headers: owned(headers),
        });
        self.routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DanmakuError::http(format!("no route for {method} {url}")))
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn get(&self, url: &str, query: Pairs<'_>, headers: Pairs<'_>) -> Result<HttpResponse> {
        self.handle("GET", url, query, headers)
    }

    async fn post_form(
        &self,
        url: &str,
        form: Pairs<'_>,
        headers: Pairs<'_>,
    ) -> Result<HttpResponse> {
        self.handle("POST", url, form, headers)
    }
}

/// Server side of a [`MockConnector`] connection.
pub(crate) struct MockServer {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Packets written by the client
    pub received: mpsc::UnboundedReceiver<Bytes>,
    /// Messages delivered to the client's read half
    pub outgoing: mpsc::UnboundedSender<Result<Bytes>>,
}

impl MockServer {
    pub fn push(&self, message: Bytes) {
        let _ = self.outgoing.unbounded_send(Ok(message));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .outgoing
            .unbounded_send(Err(DanmakuError::connection(reason.to_string())));
    }

    /// Next packet written by the client, if one is already queued.
    pub fn try_received(&mut self) -> Option<Packet> {
        match self.received.try_next() {
            Ok(Some(bytes)) => Packet::decode(&bytes).ok(),
            _ => None,
        }
    }
}

/// Accepts every URL except those containing a refused host; queues the
/// greeting messages on each accepted connection.
#[derive(Default)]
pub(crate) struct MockConnector {
    refused: Vec<String>,
    greeting: Vec<Bytes>,
    attempts: Mutex<Vec<String>>,
    servers: Mutex<Vec<MockServer>>,
}

impl MockConnector {
    /// A connector that answers the handshake with `{"code":0}`.
    pub fn accepting() -> Self {
        Self::default().greet(auth_reply(r#"{"code":0}"#))
    }

    pub fn refuse(mut self, host: &str) -> Self {
        self.refused.push(host.to_string());
        self
    }

    pub fn greet(mut self, message: Bytes) -> Self {
        self.greeting.push(message);
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn take_server(&self) -> MockServer {
        self.servers.lock().unwrap().remove(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str, headers: Pairs<'_>) -> Result<Connection> {
        self.attempts.lock().unwrap().push(url.to_string());
        if self.refused.iter().any(|h| url.contains(h.as_str())) {
            return Err(DanmakuError::connection(format!("connection refused: {url}")));
        }

        let (client_tx, server_rx) = mpsc::unbounded::<Bytes>();
        let (server_tx, client_rx) = mpsc::unbounded::<Result<Bytes>>();
        for message in &self.greeting {
            let _ = server_tx.unbounded_send(Ok(message.clone()));
        }

        self.servers.lock().unwrap().push(MockServer {
            url: url.to_string(),
            headers: owned(headers),
            received: server_rx,
            outgoing: server_tx,
        });

        Ok(Connection {
            sink: frame_sink(client_tx),
            stream: Box::pin(client_rx),
        })
    }
}

pub(crate) fn auth_reply(body: &str) -> Bytes {
    Packet::encode(ver::POPULARITY, op::AUTH_REPLY, 1, body.as_bytes())
}

/// A plain JSON notification packet.
pub(crate) fn notification(body: &Value) -> Bytes {
    Packet::encode(ver::RAW_JSON, op::NOTIFICATION, 0, body.to_string().as_bytes())
}
