//! HTTP collaborator.
//!
//! The session only needs GET with query/header injection and a form POST,
//! returning the raw status and body. [`ReqwestHttpClient`] is the default
//! implementation; tests substitute their own.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DanmakuError, Result};
use crate::json::JsonPath;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

/// Request parameters or headers as ordered name/value pairs.
pub type Pairs<'a> = &'a [(&'a str, String)];

/// Raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON, rejecting non-2xx statuses and empty bodies.
    pub fn json(&self, what: &str) -> Result<Value> {
        if !self.is_success() || self.body.is_empty() {
            return Err(DanmakuError::http(format!(
                "{what}: status {}, {} body bytes",
                self.status,
                self.body.len()
            )));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| DanmakuError::http(format!("{what}: invalid JSON: {e}")))
    }

    /// Like [`HttpResponse::json`], additionally requiring the API envelope's
    /// `code` to be zero.
    pub fn api_json(&self, what: &str) -> Result<Value> {
        let json = self.json(what)?;
        let code = json.path_i64("code");
        if code != 0 {
            let message = json.path_str("message");
            return Err(DanmakuError::http(format!(
                "{what}: code {code}: {message}"
            )));
        }
        Ok(json)
    }
}

/// Minimal HTTP client used by the session.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, query: Pairs<'_>, headers: Pairs<'_>) -> Result<HttpResponse>;

    async fn post_form(
        &self,
        url: &str,
        form: Pairs<'_>,
        headers: Pairs<'_>,
    ) -> Result<HttpResponse>;
}

/// Build the default reqwest client: rustls with the platform verifier and a
/// 30 second overall timeout.
pub fn default_client() -> Result<Client> {
    let provider = Arc::new(ring::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DanmakuError::other(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| DanmakuError::other(format!("TLS platform verifier: {e}")))?
        .with_no_client_auth();

    Client::builder()
        .use_preconfigured_tls(tls_config)
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| DanmakuError::other(format!("Failed to create HTTP client: {e}")))
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(default_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| DanmakuError::http(format!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| DanmakuError::http(format!("failed to read body: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}

fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: Pairs<'_>,
) -> reqwest::RequestBuilder {
    request = request.header(reqwest::header::USER_AGENT, DEFAULT_UA);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    request
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, query: Pairs<'_>, headers: Pairs<'_>) -> Result<HttpResponse> {
        let request = apply_headers(self.client.get(url).query(query), headers);
        self.execute(request).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: Pairs<'_>,
        headers: Pairs<'_>,
    ) -> Result<HttpResponse> {
        let request = apply_headers(self.client.post(url).form(form), headers);
        self.execute(request).await
    }
}
