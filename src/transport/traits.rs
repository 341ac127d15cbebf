//! HTTP transport abstraction.
//!
//! Every platform call goes through [`Transport`], so the protocol layer can be
//! driven by the production [`ReqwestTransport`](super::ReqwestTransport) or by the
//! scripted [`MockTransport`](super::MockTransport) in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// HTTP headers keyed by name.
pub type Headers = HashMap<String, String>;

/// Transport-level failures. Always retryable from the protocol's point of view.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("invalid request: {0}")]
    Request(String),
}

/// Response returned by a transport call.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// `name=value` pairs from every `Set-Cookie` header.
    pub set_cookies: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            set_cookies: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_cookies.push((name.into(), value.into()));
        self
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Fields of a `multipart/form-data` upload: text fields plus one file part.
///
/// Only describes the form; the transport does the wire encoding.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub file_field: String,
    pub file_name: String,
    pub file_mime: String,
    pub file_bytes: Bytes,
}

impl MultipartForm {
    pub fn new(
        file_field: impl Into<String>,
        file_name: impl Into<String>,
        file_mime: impl Into<String>,
        file_bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            fields: Vec::new(),
            file_field: file_field.into(),
            file_name: file_name.into(),
            file_mime: file_mime.into(),
            file_bytes: file_bytes.into(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Raw HTTP access used by the protocol layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    async fn upload(
        &self,
        url: &str,
        form: &MultipartForm,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}
