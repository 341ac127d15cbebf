//! Scripted transport for tests.
//!
//! Replies are registered against a URL substring. Each pattern keeps a queue:
//! replies are consumed in order and the last one stays in place, so a single
//! registration answers any number of calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Headers, HttpResponse, MultipartForm, Transport, TransportError};

/// A request seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    /// Form sent by an upload.
    pub form: Option<MultipartForm>,
}

/// Configured outcome for a matching request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Ok(HttpResponse),
    Err(TransportError),
}

impl MockReply {
    pub fn text(body: impl Into<String>) -> Self {
        MockReply::Ok(HttpResponse::new(200, body.into()))
    }

    pub fn json(value: serde_json::Value) -> Self {
        MockReply::Ok(HttpResponse::new(200, value.to_string()))
    }

    pub fn bytes(body: impl Into<Bytes>) -> Self {
        MockReply::Ok(HttpResponse::new(200, body))
    }
}

#[derive(Debug, Default)]
struct Routes {
    entries: Vec<(String, VecDeque<MockReply>)>,
}

/// Transport double returning scripted replies and recording every request.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<Routes>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for URLs containing `pattern`.
    ///
    /// Patterns are checked in registration order; the first match wins.
    pub fn on(&self, pattern: &str, reply: MockReply) -> &Self {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes.entries.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(reply),
            None => routes
                .entries
                .push((pattern.to_string(), VecDeque::from([reply]))),
        }
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Requests whose URL contains `pattern`.
    pub fn requests_matching(&self, pattern: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(pattern))
            .collect()
    }

    fn respond(
        &self,
        method: &'static str,
        url: &str,
        headers: &Headers,
        body: Option<Bytes>,
        form: Option<MultipartForm>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                method,
                url: url.to_string(),
                headers: headers.clone(),
                body,
                form,
            });

        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let queue = routes
            .entries
            .iter_mut()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, queue)| queue)
            .ok_or_else(|| TransportError::Connection(format!("no mock route for {url}")))?;

        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(MockReply::Ok(response)) => Ok(response),
            Some(MockReply::Err(err)) => Err(err),
            None => Err(TransportError::Connection(format!("empty mock route for {url}"))),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        url: &str,
        headers: &Headers,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.respond("GET", url, headers, None, None)
    }

    async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: &Headers,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.respond("POST", url, headers, Some(body), None)
    }

    async fn upload(
        &self,
        url: &str,
        form: &MultipartForm,
        headers: &Headers,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.respond("UPLOAD", url, headers, None, Some(form.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_replies_then_sticky_last() {
        let mock = MockTransport::new();
        mock.on("/a", MockReply::text("first"))
            .on("/a", MockReply::text("second"));

        let headers = Headers::new();
        let timeout = Duration::from_secs(1);
        let r1 = mock.get("https://x/a", &headers, timeout).await.unwrap();
        let r2 = mock.get("https://x/a", &headers, timeout).await.unwrap();
        let r3 = mock.get("https://x/a", &headers, timeout).await.unwrap();

        assert_eq!(r1.text(), "first");
        assert_eq!(r2.text(), "second");
        assert_eq!(r3.text(), "second");
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_unrouted_url_is_connection_error() {
        let mock = MockTransport::new();
        let err = mock
            .get("https://nowhere", &Headers::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
