//! Upload request values and body framing
//!
//! Requests are plain owned values. Retry variants (adding a second-factor
//! header, swapping the API key) are produced by pure `with_*` methods
//! returning a new value, so the orchestrator's retries stay testable in
//! isolation. Body builders are pure and deterministic given a boundary.

use rand::distributions::Alphanumeric;
use rand::Rng;
use url::Url;

use crate::package::Package;

pub const AUTHORIZATION: &str = "Authorization";
pub const SECOND_FACTOR_HEADER: &str = "OTP";

const OCTET_STREAM: &str = "application/octet-stream";
const BOUNDARY_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// One HTTP exchange as the transport sees it
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Set the body with its framing headers (Content-Type, Content-Length)
    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.set_header("Content-Type", content_type);
        self.set_header("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace the Authorization header with a raw API key
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.set_header(AUTHORIZATION, api_key);
        self
    }

    /// Attach (or replace) the second-factor header
    pub fn with_second_factor(mut self, token: &str) -> Self {
        self.set_header(SECOND_FACTOR_HEADER, token);
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// Build the upload body: raw bytes without attestations, multipart with.
/// Returns the Content-Type and the serialized body.
pub fn upload_body(package: &Package, attestations: &[Vec<u8>]) -> (String, Vec<u8>) {
    if attestations.is_empty() {
        return (OCTET_STREAM.to_string(), package.bytes.clone());
    }
    let boundary = generate_boundary(package, attestations);
    let body = multipart_body(package, attestations, &boundary);
    (
        format!("multipart/form-data; boundary={boundary}"),
        body,
    )
}

/// Serialize the two-part body for a fixed boundary. Pure; exposed so tests
/// can pin the framing byte for byte.
pub fn multipart_body(package: &Package, attestations: &[Vec<u8>], boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"package\"; filename=\"{}\"\r\n\
             Content-Type: {OCTET_STREAM}\r\n\r\n",
            package.path.display()
        )
        .as_bytes(),
    );
    body.extend_from_slice(&package.bytes);

    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"attestations\"\r\n\r\n[");
    for (i, attestation) in attestations.iter().enumerate() {
        if i > 0 {
            body.push(b',');
        }
        body.extend_from_slice(attestation);
    }
    body.extend_from_slice(b"]");

    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Random alphanumeric boundary, regenerated until it collides with nothing
/// in the part contents.
fn generate_boundary(package: &Package, attestations: &[Vec<u8>]) -> String {
    loop {
        let candidate: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LEN)
            .map(char::from)
            .collect();
        let needle = candidate.as_bytes();
        let collides = contains(&package.bytes, needle)
            || attestations.iter().any(|a| contains(a, needle));
        if !collides {
            return candidate;
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
