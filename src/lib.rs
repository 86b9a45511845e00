//! Crane - publishing client for the Crane package registry
//!
//! The library drives the whole authenticated upload pipeline: host
//! resolution with allow-list enforcement, credential lookup, request
//! framing, second-factor flows (OTP and browser-mediated security
//! devices), scope elevation, and the bounded retry rules tying them
//! together. All external effects go through injected capabilities
//! ([`transport::Transport`], [`clock::Clock`], [`prompt::Prompter`]).

pub mod clock;
pub mod credentials;
pub mod error;
pub mod host;
pub mod package;
pub mod prompt;
pub mod protocol;
pub mod push;
pub mod request;
pub mod signin;
pub mod transport;
pub mod webauthn;

pub use error::{FixSuggestion, PushError};
pub use package::{Package, PackageMeta};
pub use push::{PushConfig, Pusher};
pub use transport::{HttpTransport, MockTransport, Response, Transport};
