//! Production transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};

use super::{Headers, HttpResponse, MultipartForm, Transport, TransportError};

/// Upper bound on a single response body (QR images, media, JSON batches).
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// HTTP transport using a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> RequestBuilder {
        let mut request = self.client.request(method, url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn execute(
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut response = request.send().await.map_err(|e| map_error(e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let set_cookies = response
            .cookies()
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| map_error(e, timeout))? {
            append_capped(&mut body, &chunk, MAX_BODY_BYTES)?;
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            body: Bytes::from(body),
            set_cookies,
        })
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if let Some(status) = err.status() {
        TransportError::Status(status.as_u16())
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(err.to_string())
    } else if err.is_builder() {
        TransportError::Request(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Append `chunk`, failing once the body would exceed `limit` bytes.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), TransportError> {
    if body.len() + chunk.len() > limit {
        return Err(TransportError::Body(format!(
            "response body exceeds {limit} bytes"
        )));
    }
    body.extend_from_slice(chunk);
    Ok(())
}

fn to_multipart(form: &MultipartForm) -> Result<Form, TransportError> {
    let file = Part::bytes(form.file_bytes.to_vec())
        .file_name(form.file_name.clone())
        .mime_str(&form.file_mime)
        .map_err(|e| TransportError::Request(format!("bad mime {:?}: {e}", form.file_mime)))?;

    let multipart = form
        .fields
        .iter()
        .fold(Form::new(), |multipart, (name, value)| {
            multipart.text(name.clone(), value.clone())
        });
    Ok(multipart.part(form.file_field.clone(), file))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        Self::execute(self.request(Method::GET, url, headers, timeout), timeout).await
    }

    async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.request(Method::POST, url, headers, timeout).body(body);
        Self::execute(request, timeout).await
    }

    async fn upload(
        &self,
        url: &str,
        form: &MultipartForm,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let request = self
            .request(Method::POST, url, headers, timeout)
            .multipart(to_multipart(form)?);
        Self::execute(request, timeout).await
    }
}
