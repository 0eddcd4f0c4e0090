//! Isolated rendering of untrusted URLs.
//!
//! A [`Sandbox`] opens one [`SandboxSession`] per job (a browser process with
//! a throw-away profile). The session hands out one [`SandboxContext`] per
//! device profile; every request the context's page makes is answered by the
//! [`policy`] engine before it leaves the browser.
//!
//! [`capture::capture_profile`] drives a context through navigate, settle,
//! extract, banner and screenshot.

pub mod capture;
pub mod cdp;
pub mod chrome;
pub mod extract;
pub mod policy;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use async_trait::async_trait;
use phishnet_core::{DeviceProfile, Result};
use serde_json::Value;
use std::sync::Arc;

pub use capture::{capture_profile, CaptureSettings};
pub use chrome::{find_browser_binary, list_available_browsers, ChromeSandbox};
pub use policy::{decide, origin_of, BlockReason, Decision, PolicyState};

/// Launches sessions. One session per job, never reused.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn open(&self, job_id: &str) -> Result<Box<dyn SandboxSession>>;
}

#[async_trait]
pub trait SandboxSession: Send + Sync {
    /// A fresh isolated context for `profile`, with interception installed
    /// and answering through `policy` before this returns.
    async fn create_context(
        &mut self,
        profile: DeviceProfile,
        policy: Arc<PolicyState>,
    ) -> Result<Box<dyn SandboxContext>>;

    /// Tear down the browser. Idempotent.
    async fn close(&mut self);
}

/// One profile's browsing context.
///
/// Page-level operations report failures as plain strings; the capture
/// pipeline decides which of them are fatal.
#[async_trait]
pub trait SandboxContext: Send + Sync {
    fn profile(&self) -> DeviceProfile;

    fn policy(&self) -> &PolicyState;

    /// Navigate and wait for the load event. `Err` carries the browser's
    /// error text.
    async fn navigate(&self, url: &str) -> std::result::Result<(), String>;

    /// Evaluate an expression, returning its value by value.
    async fn evaluate(&self, expression: &str) -> std::result::Result<Value, String>;

    /// Full-page PNG bytes.
    async fn screenshot(&self) -> std::result::Result<Vec<u8>, String>;

    /// Dispose the context. Idempotent.
    async fn close(&mut self);
}
