//! Push orchestration: resolve, authenticate, upload, retry
//!
//! One [`Pusher::push`] call drives a whole logical push. The flow is a
//! small state machine over classified responses:
//!
//! 1. resolve host (allow-list checked before any network call) and key
//!    (interactive sign-in when none exists);
//! 2. send the upload;
//! 3. on an MFA signal, run the second-factor sub-flow and retry once;
//! 4. on a scope signal, elevate the key and retry once;
//! 5. anything else is terminal.
//!
//! At most one second-factor retry and one scope-elevation retry happen per
//! push; a repeated MFA signal after either retry is fatal.

use std::path::PathBuf;

use url::Url;

use crate::clock::Clock;
use crate::credentials::CredentialStore;
use crate::error::PushError;
use crate::host;
use crate::package::Package;
use crate::prompt::Prompter;
use crate::protocol::{self, classify, Disposition};
use crate::request::{self, Method, Request};
use crate::signin;
use crate::transport::Transport;
use crate::webauthn::WebauthnConfig;

/// Per-push inputs from the CLI and environment. The caller reads the
/// environment; the orchestrator never does.
#[derive(Debug, Clone, Default)]
pub struct PushConfig {
    /// `--host` override
    pub host: Option<String>,
    /// `CRANE_HOST` override
    pub env_host: Option<String>,
    /// `--otp`, attached to the first request
    pub otp: Option<String>,
    /// `--key`, a named credentials file entry
    pub key_name: Option<String>,
    /// `--attestation` files uploaded alongside the archive
    pub attestations: Vec<PathBuf>,
    pub webauthn: WebauthnConfig,
}

pub struct Pusher<'a> {
    transport: &'a dyn Transport,
    prompter: &'a dyn Prompter,
    clock: &'a dyn Clock,
    store: &'a mut CredentialStore,
}

impl<'a> Pusher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        prompter: &'a dyn Prompter,
        clock: &'a dyn Clock,
        store: &'a mut CredentialStore,
    ) -> Self {
        Self {
            transport,
            prompter,
            clock,
            store,
        }
    }

    /// Push one package. Returns the registry's success message.
    pub async fn push(&mut self, package: &Package, config: &PushConfig) -> Result<String, PushError> {
        let host = host::resolve(config.host.as_deref(), config.env_host.as_deref(), &package.meta)?;
        tracing::debug!(host = %host, package = %package.identity(), "resolved push host");

        let api_key = self.resolve_api_key(&host, config).await?;

        let attestations = read_attestations(&config.attestations)?;
        let (content_type, body) = request::upload_body(package, &attestations);
        let mut upload = Request::new(Method::Post, protocol::endpoint(&host, protocol::UPLOAD_PATH)?)
            .with_body(&content_type, body)
            .with_api_key(&api_key);
        if let Some(otp) = &config.otp {
            upload = upload.with_second_factor(otp);
        }

        self.prompter.say(&format!(
            "Pushing {} to {}...",
            package.identity(),
            host::display(&host)
        ));

        let mut response = self.transport.send(&upload).await?;

        if classify(&response) == Disposition::MfaRequired {
            let token = signin::obtain_second_factor(
                self.transport,
                self.prompter,
                self.clock,
                &host,
                Some(&api_key),
                &config.webauthn,
            )
            .await?;
            upload = upload.with_second_factor(&token);
            response = self.transport.send(&upload).await?;
            if classify(&response) == Disposition::MfaRequired {
                return Err(PushError::InvalidOtp);
            }
        }

        if classify(&response) == Disposition::ScopeForbidden {
            self.prompter.say(&format!(
                "Your API key doesn't have the {} scope on {}. Please sign in to update access.",
                signin::PUSH_SCOPE,
                host::display(&host)
            ));
            let new_key = signin::acquire_api_key(
                self.transport,
                self.prompter,
                self.clock,
                &host,
                Some(&api_key),
                &config.webauthn,
            )
            .await?;
            // Persist before the retry so an interrupted push keeps the
            // elevated key.
            self.store.store(&host, &new_key)?;
            upload = upload.with_api_key(&new_key);
            response = self.transport.send(&upload).await?;
        }

        match classify(&response) {
            Disposition::Success => Ok(response.body_text()),
            Disposition::PermanentRedirect { location } => Err(PushError::Redirect {
                location: location.unwrap_or_else(|| "(no location given)".to_string()),
            }),
            Disposition::MfaRequired => Err(PushError::InvalidOtp),
            Disposition::ScopeForbidden | Disposition::Failure => Err(PushError::Server {
                status: response.status,
                body: response.body_text(),
            }),
        }
    }

    /// Named key > env/file lookup > interactive sign-in.
    async fn resolve_api_key(&mut self, host: &Url, config: &PushConfig) -> Result<String, PushError> {
        if let Some(name) = &config.key_name {
            return self
                .store
                .named(name)
                .map(str::to_string)
                .ok_or_else(|| PushError::SignInFailed {
                    host: host::display(host),
                    detail: format!("no API key named \"{name}\" in the credentials file"),
                });
        }
        if let Some(api_key) = self.store.lookup(host) {
            return Ok(api_key);
        }
        let api_key = signin::acquire_api_key(
            self.transport,
            self.prompter,
            self.clock,
            host,
            None,
            &config.webauthn,
        )
        .await?;
        self.store.store(host, &api_key)?;
        Ok(api_key)
    }
}

fn read_attestations(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>, PushError> {
    paths.iter().map(|path| Ok(std::fs::read(path)?)).collect()
}
