//! Browser-mediated security device verification
//!
//! The registry hands back a verification URL; the user completes the
//! ceremony in a browser. The one-time token comes back over exactly one of
//! two delivery modes, chosen by the discovery response:
//!
//! - **local callback**: we bind an ephemeral localhost port, append it to
//!   the verification URL, and the registry's browser page delivers the
//!   token with a `GET /?code=...` to that port;
//! - **polling**: we poll the verification status endpoint at a fixed
//!   interval until the token, an error, or the attempt budget arrives.
//!
//! Both waits are bounded. The listener socket closes on every exit path:
//! success, ceremony error, timeout, and cancellation all drop it.

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use crate::clock::Clock;
use crate::error::PushError;
use crate::prompt::Prompter;
use crate::protocol;
use crate::request::{Method, Request};
use crate::transport::Transport;

const TIMED_OUT: &str = "timed out waiting for the browser ceremony";

/// Bounds for both delivery modes
#[derive(Debug, Clone)]
pub struct WebauthnConfig {
    /// Total wait on the local callback
    pub wait_timeout: Duration,
    /// Pause between status polls
    pub poll_interval: Duration,
    /// Status poll budget
    pub max_polls: u32,
}

impl Default for WebauthnConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            max_polls: 60,
        }
    }
}

/// Discovery payload from POST api/v1/webauthn_verification
#[derive(Debug, Deserialize)]
pub struct Verification {
    pub url: String,
    pub token: String,
    #[serde(default)]
    pub polling: bool,
}

/// Outcome of waiting on the local callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebauthnResult {
    Token(String),
    Error(String),
    TimedOut,
}

/// Run the whole ceremony. `Ok(None)` means the account has no security
/// device and the caller should fall back to the OTP prompt.
pub async fn verify(
    transport: &dyn Transport,
    clock: &dyn Clock,
    prompter: &dyn Prompter,
    host: &Url,
    api_key: Option<&str>,
    config: &WebauthnConfig,
) -> Result<Option<String>, PushError> {
    let Some(verification) = discover(transport, host, api_key).await? else {
        return Ok(None);
    };

    let code = if verification.polling {
        prompter.say(&device_notice(&verification.url));
        poll_for_code(transport, clock, host, &verification.token, config).await?
    } else {
        let listener = WebauthnListener::bind().await?;
        prompter.say(&device_notice(&format!(
            "{}?port={}",
            verification.url,
            listener.port()
        )));
        // If the timeout wins the race, dropping the wait future closes
        // the socket.
        let outcome = tokio::select! {
            outcome = listener.wait() => outcome,
            _ = clock.sleep(config.wait_timeout) => WebauthnResult::TimedOut,
        };
        match outcome {
            WebauthnResult::Token(code) => code,
            WebauthnResult::Error(message) => return Err(PushError::Webauthn(message)),
            WebauthnResult::TimedOut => return Err(PushError::Webauthn(TIMED_OUT.to_string())),
        }
    };

    prompter.say("You are verified with a security device. You may close the browser window.");
    Ok(Some(code))
}

/// Ask the registry whether a security device ceremony is available.
/// Any non-2xx answer (e.g. 422 "You don't have any security devices")
/// means no.
pub async fn discover(
    transport: &dyn Transport,
    host: &Url,
    api_key: Option<&str>,
) -> Result<Option<Verification>, PushError> {
    let url = protocol::endpoint(host, protocol::WEBAUTHN_PATH)?;
    let mut request = Request::new(Method::Post, url);
    if let Some(key) = api_key {
        request = request.with_api_key(key);
    }

    let response = transport.send(&request).await?;
    if !response.is_success() {
        tracing::debug!(status = response.status, "no security device available");
        return Ok(None);
    }

    let verification = serde_json::from_slice(&response.body)
        .map_err(|e| PushError::Webauthn(format!("malformed verification response: {e}")))?;
    Ok(Some(verification))
}

fn device_notice(url: &str) -> String {
    format!(
        "You have enabled multi-factor authentication. Please visit {url} to authenticate \
         via security device. If you can't verify using a security device but have OTP \
         enabled, you can re-run with the `--otp [your_code]` option."
    )
}

// ============================================================================
// LOCAL CALLBACK LISTENER
// ============================================================================

/// Ephemeral localhost endpoint receiving the ceremony token
pub struct WebauthnListener {
    listener: TcpListener,
    port: u16,
}

impl WebauthnListener {
    /// Bind an ephemeral port on the loopback interface.
    pub async fn bind() -> Result<Self, PushError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        tracing::debug!(port, "webauthn listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until a token arrives or the ceremony fails. Consumes the
    /// listener, so the socket is closed by the time this returns (and on
    /// cancellation, when the future is dropped).
    pub async fn wait(self) -> WebauthnResult {
        loop {
            let (mut stream, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => return WebauthnResult::Error(e.to_string()),
            };

            let mut buf = vec![0u8; 4096];
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return WebauthnResult::Error(e.to_string()),
            };
            let raw = String::from_utf8_lossy(&buf[..n]);

            match parse_callback(&raw) {
                Callback::Preflight => {
                    // CORS preflight from the registry page; answer and
                    // keep waiting for the real delivery.
                    let _ = stream.write_all(http_response("204 No Content", "").as_bytes()).await;
                }
                Callback::Token(code) => {
                    let _ = stream.write_all(http_response("200 OK", "success").as_bytes()).await;
                    return WebauthnResult::Token(code);
                }
                Callback::Rejected { status, message } => {
                    let _ = stream.write_all(http_response(status, message).as_bytes()).await;
                    return WebauthnResult::Error(message.to_string());
                }
            }
        }
    }
}

enum Callback {
    Preflight,
    Token(String),
    Rejected {
        status: &'static str,
        message: &'static str,
    },
}

fn parse_callback(raw: &str) -> Callback {
    let request_line = raw.lines().next().unwrap_or_default();
    let mut pieces = request_line.split_whitespace();
    let method = pieces.next().unwrap_or_default();
    let target = pieces.next().unwrap_or_default();

    if method == "OPTIONS" {
        return Callback::Preflight;
    }
    if method != "GET" {
        return Callback::Rejected {
            status: "405 Method Not Allowed",
            message: "method not allowed",
        };
    }

    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return Callback::Rejected {
            status: "400 Bad Request",
            message: "invalid request",
        };
    };
    if url.path() != "/" {
        return Callback::Rejected {
            status: "404 Not Found",
            message: "not found",
        };
    }
    match url.query_pairs().find(|(name, _)| name == "code") {
        Some((_, code)) if !code.is_empty() => Callback::Token(code.into_owned()),
        _ => Callback::Rejected {
            status: "400 Bad Request",
            message: "missing code parameter",
        },
    }
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Connection: close\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, OPTIONS\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

// ============================================================================
// POLLING FALLBACK
// ============================================================================

#[derive(Debug, Deserialize)]
struct PollStatus {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Poll the status endpoint until the token, an error, or the budget runs
/// out.
async fn poll_for_code(
    transport: &dyn Transport,
    clock: &dyn Clock,
    host: &Url,
    token: &str,
    config: &WebauthnConfig,
) -> Result<String, PushError> {
    let url = protocol::endpoint(host, &format!("{}/{token}/status", protocol::WEBAUTHN_PATH))?;

    for attempt in 0..config.max_polls {
        let response = transport.send(&Request::new(Method::Get, url.clone())).await?;
        let status: PollStatus = serde_json::from_slice(&response.body)
            .map_err(|e| PushError::Webauthn(format!("malformed status response: {e}")))?;

        match status.status.as_str() {
            "pending" => {
                tracing::debug!(attempt, "verification still pending");
                clock.sleep(config.poll_interval).await;
            }
            "success" => {
                return status
                    .code
                    .ok_or_else(|| PushError::Webauthn("status response carried no code".to_string()));
            }
            other => {
                // Expired links and ceremony failures surface the remote
                // message verbatim.
                return Err(PushError::Webauthn(
                    status
                        .message
                        .unwrap_or_else(|| format!("verification {other}")),
                ));
            }
        }
    }

    Err(PushError::Webauthn(TIMED_OUT.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{InstantClock, NeverClock};
    use crate::prompt::ScriptedPrompter;
    use crate::transport::{MockTransport, Response};
    use tokio::net::TcpStream;

    const HOST: &str = "https://registry.example";
    const DISCOVERY_URL: &str = "https://registry.example/api/v1/webauthn_verification";
    const STATUS_URL: &str =
        "https://registry.example/api/v1/webauthn_verification/tok123/status";

    fn host() -> Url {
        Url::parse(HOST).unwrap()
    }

    fn config() -> WebauthnConfig {
        WebauthnConfig {
            max_polls: 3,
            ..Default::default()
        }
    }

    async fn browser_get(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_listener_delivers_token() {
        let listener = WebauthnListener::bind().await.unwrap();
        let port = listener.port();

        let browser = tokio::spawn(async move { browser_get(port, "/?code=Uvh6T57tkWuUnWYo").await });

        let outcome = listener.wait().await;
        assert_eq!(outcome, WebauthnResult::Token("Uvh6T57tkWuUnWYo".to_string()));

        let reply = browser.await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
        assert!(reply.contains("success"));
    }

    #[tokio::test]
    async fn test_listener_survives_preflight() {
        let listener = WebauthnListener::bind().await.unwrap();
        let port = listener.port();

        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"OPTIONS / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await.unwrap();
            assert!(reply.starts_with("HTTP/1.1 204"));

            browser_get(port, "/?code=abc").await
        });

        let outcome = listener.wait().await;
        assert_eq!(outcome, WebauthnResult::Token("abc".to_string()));
        browser.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_rejects_wrong_path() {
        let listener = WebauthnListener::bind().await.unwrap();
        let port = listener.port();

        tokio::spawn(async move { browser_get(port, "/favicon.ico").await });

        let outcome = listener.wait().await;
        assert_eq!(outcome, WebauthnResult::Error("not found".to_string()));
    }

    #[tokio::test]
    async fn test_listener_rejects_missing_code() {
        let listener = WebauthnListener::bind().await.unwrap();
        let port = listener.port();

        tokio::spawn(async move { browser_get(port, "/?foo=bar").await });

        let outcome = listener.wait().await;
        assert_eq!(outcome, WebauthnResult::Error("missing code parameter".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_closes_the_socket() {
        let listener = WebauthnListener::bind().await.unwrap();
        let port = listener.port();

        let outcome = tokio::select! {
            outcome = listener.wait() => outcome,
            _ = InstantClock.sleep(Duration::from_secs(300)) => WebauthnResult::TimedOut,
        };
        assert_eq!(outcome, WebauthnResult::TimedOut);

        // Listener dropped with the losing branch: nothing is accepting.
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_discover_falls_back_when_no_device() {
        let transport = MockTransport::new();
        transport.stub(
            DISCOVERY_URL,
            Response::new(422).with_body("You don't have any security devices"),
        );

        let found = discover(&transport, &host(), Some("KEY")).await.unwrap();
        assert!(found.is_none());
        assert_eq!(
            transport.last_request().unwrap().header("Authorization"),
            Some("KEY")
        );
    }

    #[tokio::test]
    async fn test_verify_via_polling() {
        let transport = MockTransport::new();
        transport.stub(
            DISCOVERY_URL,
            Response::new(200).with_body(
                r#"{"url":"https://registry.example/verify/tok123","token":"tok123","polling":true}"#,
            ),
        );
        transport.stub(STATUS_URL, Response::new(200).with_body(r#"{"status":"pending"}"#));
        transport.stub(
            STATUS_URL,
            Response::new(200).with_body(r#"{"status":"success","code":"Uvh6T57tkWuUnWYo"}"#),
        );

        let prompter = ScriptedPrompter::new(Vec::<String>::new());
        let code = verify(&transport, &InstantClock, &prompter, &host(), Some("KEY"), &config())
            .await
            .unwrap();

        assert_eq!(code.as_deref(), Some("Uvh6T57tkWuUnWYo"));
        assert!(prompter.saw("https://registry.example/verify/tok123"));
        assert!(prompter.saw("You are verified with a security device"));
        // discovery + two polls
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_verify_polling_surfaces_expired_message() {
        let transport = MockTransport::new();
        transport.stub(
            DISCOVERY_URL,
            Response::new(200).with_body(
                r#"{"url":"https://registry.example/verify/tok123","token":"tok123","polling":true}"#,
            ),
        );
        transport.stub(
            STATUS_URL,
            Response::new(200).with_body(
                r#"{"status":"expired","message":"The token in the link you used has either expired or been used already."}"#,
            ),
        );

        let prompter = ScriptedPrompter::new(Vec::<String>::new());
        let err = verify(&transport, &InstantClock, &prompter, &host(), Some("KEY"), &config())
            .await
            .unwrap_err();

        match err {
            PushError::Webauthn(message) => {
                assert_eq!(
                    message,
                    "The token in the link you used has either expired or been used already."
                );
            }
            other => panic!("expected Webauthn error, got {other:?}"),
        }
        assert!(!prompter.saw("You are verified"));
    }

    #[tokio::test]
    async fn test_verify_polling_budget_exhausted() {
        let transport = MockTransport::new();
        transport.stub(
            DISCOVERY_URL,
            Response::new(200).with_body(
                r#"{"url":"https://registry.example/verify/tok123","token":"tok123","polling":true}"#,
            ),
        );
        for _ in 0..3 {
            transport.stub(STATUS_URL, Response::new(200).with_body(r#"{"status":"pending"}"#));
        }

        let prompter = ScriptedPrompter::new(Vec::<String>::new());
        let err = verify(&transport, &InstantClock, &prompter, &host(), Some("KEY"), &config())
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Webauthn(m) if m.contains("timed out")));
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_verify_local_callback_end_to_end() {
        // polling=false takes the listener path with a real socket; drive
        // it with a scripted browser reading the port from the notice.
        let transport = MockTransport::new();
        transport.stub(
            DISCOVERY_URL,
            Response::new(200).with_body(
                r#"{"url":"https://registry.example/verify/tok123","token":"tok123","polling":false}"#,
            ),
        );

        let prompter = ScriptedPrompter::new(Vec::<String>::new());
        let host = host();
        let config = config();
        let verifying = verify(
            &transport,
            &NeverClock,
            &prompter,
            &host,
            Some("KEY"),
            &config,
        );
        tokio::pin!(verifying);

        // Let verify() bind and announce the port, then play the browser.
        let mut browser_started = false;
        let code = loop {
            tokio::select! {
                outcome = &mut verifying => break outcome.unwrap(),
                _ = tokio::task::yield_now() => {
                    if !browser_started {
                        if let Some(port) = announced_port(&prompter.transcript()) {
                            browser_started = true;
                            tokio::spawn(async move {
                                browser_get(port, "/?code=fromlistener").await
                            });
                        }
                    }
                }
            }
        };

        assert_eq!(code.as_deref(), Some("fromlistener"));
    }

    fn announced_port(transcript: &[String]) -> Option<u16> {
        transcript
            .iter()
            .find_map(|line| line.split("?port=").nth(1))
            .and_then(|rest| {
                rest.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .ok()
            })
    }
}
