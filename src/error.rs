//! Push error taxonomy with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Every way a push can fail. All variants are terminal for the current
/// push; nothing is retried beyond the bounded OTP and scope-elevation
/// retries driven by the orchestrator.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("\"{attempted}\" is not allowed by the package manifest, which only allows \"{allowed}\"")]
    DisallowedHost { attempted: String, allowed: String },

    #[error("invalid push host \"{host}\": {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("the request has redirected permanently to {location}; check your configured push host")]
    Redirect { location: String },

    #[error("multi-factor authentication is enabled but the code was not accepted")]
    InvalidOtp,

    #[error("security device verification failed: {0}")]
    Webauthn(String),

    #[error("signing in to {host} failed: {detail}")]
    SignInFailed { host: String, detail: String },

    #[error("{body}")]
    Server { status: u16, body: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixSuggestion for PushError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PushError::DisallowedHost { .. } => {
                Some("Push to the host the manifest allows, or drop allowed_push_host from the metadata sidecar")
            }
            PushError::InvalidHost { .. } => Some("Use a full URL like https://registry.example.com"),
            PushError::Network(_) => Some("Check your connection and the push host URL"),
            PushError::Redirect { .. } => Some("Update --host (or CRANE_HOST) to the new location"),
            PushError::InvalidOtp => Some("Re-run with --otp <code> using a fresh code from your authenticator"),
            PushError::Webauthn(_) => {
                Some("If you have OTP enabled, re-run with --otp <code> instead of the security device")
            }
            PushError::SignInFailed { .. } => Some("Check your username and password for the push host"),
            PushError::Server { .. } => None,
            PushError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            PushError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disallowed_host_message() {
        let error = PushError::DisallowedHost {
            attempted: "https://registry.example".to_string(),
            allowed: "https://private.example".to_string(),
        };
        let msg = format!("{}", error);
        assert!(msg.contains("https://registry.example"));
        assert!(msg.contains("only allows \"https://private.example\""));
    }

    #[test]
    fn test_redirect_message_names_location() {
        let error = PushError::Redirect {
            location: "https://registry.example/api/v1/packages".to_string(),
        };
        assert!(format!("{}", error).contains("https://registry.example/api/v1/packages"));
    }

    #[test]
    fn test_server_error_surfaces_body_verbatim() {
        let error = PushError::Server {
            status: 403,
            body: "You don't have permission to push this package".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "You don't have permission to push this package"
        );
    }

    #[test]
    fn test_fix_suggestions() {
        assert!(PushError::InvalidOtp.fix_suggestion().unwrap().contains("--otp"));
        assert!(PushError::Webauthn("timed out".into()).fix_suggestion().is_some());
        assert!(PushError::Server { status: 500, body: "boom".into() }
            .fix_suggestion()
            .is_none());
    }
}
