//! Injected time capability
//!
//! The WebAuthn wait and the polling loop are the only places the pipeline
//! touches the clock. Injecting it keeps those paths deterministic in tests
//! with no global stubbing.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the tokio timer
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Every sleep returns immediately: timeouts fire at once, polls don't wait
pub struct InstantClock;

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, _duration: Duration) {}
}

/// Sleeps never complete: timeouts never fire
pub struct NeverClock;

#[async_trait]
impl Clock for NeverClock {
    async fn sleep(&self, _duration: Duration) {
        futures::future::pending::<()>().await;
    }
}
