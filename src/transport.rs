//! HTTP transport seam: one request/response exchange
//!
//! Everything network-shaped goes through the [`Transport`] trait so the
//! whole auth pipeline runs against [`MockTransport`] in tests. The real
//! implementation is a thin reqwest wrapper; it never follows redirects
//! itself (the redirect policy lives in `protocol::classify`).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PushError;
use crate::request::{Method, Request};

/// Response as the pipeline sees it
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Executes a single request/response exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, PushError>;
}

/// Production transport backed by reqwest
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Response, PushError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?
            .to_vec();

        tracing::debug!(status, bytes = body.len(), "response received");

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Test transport with stubbed responses and recorded requests
///
/// Responses are queued per URL (FIFO), so a retried endpoint can answer
/// differently on each attempt. Every request is recorded for assertions.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<Response, PushError>>>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a URL
    pub fn stub(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue a transport failure for a URL
    pub fn stub_error(&self, url: &str, error: PushError) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// All requests made, in order
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Response, PushError> {
        self.requests.lock().unwrap().push(request.clone());
        let queued = self
            .responses
            .lock()
            .unwrap()
            .get_mut(request.url.as_str())
            .and_then(|queue| queue.pop_front());
        match queued {
            Some(result) => result,
            None => Err(PushError::Network(format!(
                "no stubbed response for {}",
                request.url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(url: &str) -> Request {
        Request::new(Method::Post, Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_mock_queues_responses_per_url() {
        let transport = MockTransport::new();
        transport.stub("https://h.example/a", Response::new(401).with_body("first"));
        transport.stub("https://h.example/a", Response::new(200).with_body("second"));

        let r1 = transport.send(&request("https://h.example/a")).await.unwrap();
        let r2 = transport.send(&request("https://h.example/a")).await.unwrap();

        assert_eq!(r1.status, 401);
        assert_eq!(r2.body_text(), "second");
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let transport = MockTransport::new();
        transport.stub("https://h.example/a", Response::new(200));

        let sent = request("https://h.example/a").with_second_factor("111111");
        transport.send(&sent).await.unwrap();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(
            transport.last_request().unwrap().header("OTP"),
            Some("111111")
        );
    }

    #[tokio::test]
    async fn test_mock_unstubbed_url_is_network_error() {
        let transport = MockTransport::new();
        let err = transport
            .send(&request("https://h.example/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Network(_)));
    }

    #[tokio::test]
    async fn test_mock_stubbed_error_is_returned() {
        let transport = MockTransport::new();
        transport.stub_error(
            "https://h.example/a",
            PushError::Network("connection refused".to_string()),
        );
        let err = transport.send(&request("https://h.example/a")).await.unwrap_err();
        assert!(matches!(err, PushError::Network(_)));
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let response = Response::new(308).with_header("Location", "https://new.example");
        assert_eq!(response.header("location"), Some("https://new.example"));
    }
}
