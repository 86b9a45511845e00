//! Interactive sign-in and scope elevation
//!
//! Exchanges a username and password for an API key carrying the push
//! scope. The key-issuance request can itself demand a second factor; that
//! sub-flow runs exactly once (one nesting level), then one retry with the
//! token attached. A second MFA rejection is fatal.

use base64ct::{Base64, Encoding};
use url::Url;

use crate::clock::Clock;
use crate::error::PushError;
use crate::prompt::Prompter;
use crate::protocol::{self, classify, Disposition};
use crate::request::{Method, Request, AUTHORIZATION};
use crate::transport::Transport;
use crate::webauthn::{self, WebauthnConfig};
use crate::host;

/// Scope required to upload packages
pub const PUSH_SCOPE: &str = "push";

/// Notice printed before the OTP prompt
pub const MFA_NOTICE: &str =
    "You have enabled multi-factor authentication. Please enter OTP code.";

/// Obtain a second-factor token: the security device ceremony when the
/// account has one, the OTP prompt otherwise.
pub async fn obtain_second_factor(
    transport: &dyn Transport,
    prompter: &dyn Prompter,
    clock: &dyn Clock,
    host: &Url,
    api_key: Option<&str>,
    config: &WebauthnConfig,
) -> Result<String, PushError> {
    if let Some(code) = webauthn::verify(transport, clock, prompter, host, api_key, config).await? {
        return Ok(code);
    }
    prompter.say(MFA_NOTICE);
    Ok(prompter.ask("Code: ")?)
}

/// Prompt for credentials and issue a fresh API key scoped for pushing.
/// The caller stores and persists the key before retrying the upload.
pub async fn acquire_api_key(
    transport: &dyn Transport,
    prompter: &dyn Prompter,
    clock: &dyn Clock,
    host: &Url,
    existing_key: Option<&str>,
    config: &WebauthnConfig,
) -> Result<String, PushError> {
    prompter.say(&format!("Enter your {} credentials.", host::display(host)));
    let username = prompter.ask("Username/email: ")?;
    let password = prompter.ask_hidden("Password: ")?;

    let url = protocol::endpoint(host, protocol::API_KEY_PATH)?;
    let request = Request::new(Method::Post, url)
        .with_body(
            "application/x-www-form-urlencoded",
            format!("scopes={PUSH_SCOPE}").into_bytes(),
        )
        .with_header(AUTHORIZATION, basic_auth(&username, &password));

    let mut response = transport.send(&request).await?;

    if classify(&response) == Disposition::MfaRequired {
        let token =
            obtain_second_factor(transport, prompter, clock, host, existing_key, config).await?;
        let retry = request.with_second_factor(&token);
        response = transport.send(&retry).await?;
        if classify(&response) == Disposition::MfaRequired {
            return Err(PushError::InvalidOtp);
        }
    }

    if !response.is_success() {
        return Err(PushError::SignInFailed {
            host: host::display(host),
            detail: response.body_text(),
        });
    }

    let api_key = response.body_text().trim().to_string();
    if api_key.is_empty() {
        return Err(PushError::SignInFailed {
            host: host::display(host),
            detail: "registry returned an empty API key".to_string(),
        });
    }

    prompter.say("Signed in with API key.");
    tracing::debug!(host = %host, "issued a push-scoped API key");
    Ok(api_key)
}

fn basic_auth(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!("Basic {}", Base64::encode_string(raw.as_bytes()))
}
