//! In-process sandbox that serves canned pages.
//!
//! Used to drive the capture pipeline and job runner without a browser.
//! Navigation and subresource loads go through the context's [`PolicyState`]
//! exactly as intercepted requests do, so counters and blocked hosts behave
//! like a real render.

use async_trait::async_trait;
use phishnet_core::{DeviceProfile, Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::{INNER_TEXT_JS, OUTER_HTML_JS};
use crate::policy::PolicyState;
use crate::{Sandbox, SandboxContext, SandboxSession};

/// Error text reported for a navigation the policy refused.
pub const BLOCKED_BY_CLIENT: &str = "net::ERR_BLOCKED_BY_CLIENT";

/// 1x1 transparent PNG.
const BLANK_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// A canned page.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    /// Requests the page makes after the main document loads.
    pub subresources: Vec<String>,
    pub inner_text: String,
    pub html: String,
    /// Every script evaluation on this page throws.
    pub script_error: bool,
    /// Navigation never completes.
    pub hang: bool,
}

impl ScriptedPage {
    pub fn text(inner_text: &str) -> Self {
        Self {
            inner_text: inner_text.to_string(),
            html: format!("<html><body>{}</body></html>", inner_text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    pages: HashMap<String, ScriptedPage>,
    fail_open: bool,
    fail_context: Option<DeviceProfile>,
    fail_screenshot: Option<DeviceProfile>,
}

/// Lifecycle events recorded by a [`ScriptedSandbox`], in order.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// A [`Sandbox`] with scripted pages and failures.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSandbox {
    script: Arc<Script>,
    events: EventLog,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, page: ScriptedPage) -> Self {
        self.script_mut().pages.insert(url.to_string(), page);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.script_mut().fail_open = true;
        self
    }

    pub fn failing_context(mut self, profile: DeviceProfile) -> Self {
        self.script_mut().fail_context = Some(profile);
        self
    }

    pub fn failing_screenshot(mut self, profile: DeviceProfile) -> Self {
        self.script_mut().fail_screenshot = Some(profile);
        self
    }

    /// Snapshot of everything opened and closed so far.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }
}

fn record(events: &EventLog, event: String) {
    if let Ok(mut log) = events.lock() {
        log.push(event);
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn open(&self, job_id: &str) -> Result<Box<dyn SandboxSession>> {
        if self.script.fail_open {
            return Err(Error::Browser("scripted launch failure".into()));
        }
        record(&self.events, format!("open {}", job_id));
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            events: self.events.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    events: EventLog,
    closed: bool,
}

#[async_trait]
impl SandboxSession for ScriptedSession {
    async fn create_context(
        &mut self,
        profile: DeviceProfile,
        policy: Arc<PolicyState>,
    ) -> Result<Box<dyn SandboxContext>> {
        if self.script.fail_context == Some(profile) {
            return Err(Error::Browser(format!("{} context: scripted failure", profile)));
        }
        record(&self.events, format!("context {}", profile));
        Ok(Box::new(ScriptedContext {
            profile,
            policy,
            script: self.script.clone(),
            events: self.events.clone(),
            loaded: Mutex::new(None),
            closed: false,
        }))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        record(&self.events, "close session".into());
    }
}

struct ScriptedContext {
    profile: DeviceProfile,
    policy: Arc<PolicyState>,
    script: Arc<Script>,
    events: EventLog,
    loaded: Mutex<Option<ScriptedPage>>,
    closed: bool,
}

impl ScriptedContext {
    fn loaded_page(&self) -> Option<ScriptedPage> {
        self.loaded.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl SandboxContext for ScriptedContext {
    fn profile(&self) -> DeviceProfile {
        self.profile
    }

    fn policy(&self) -> &PolicyState {
        &self.policy
    }

    async fn navigate(&self, url: &str) -> std::result::Result<(), String> {
        if !self.policy.evaluate(url).await.is_allow() {
            return Err(BLOCKED_BY_CLIENT.to_string());
        }
        let page = self
            .script
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| "net::ERR_NAME_NOT_RESOLVED".to_string())?;
        if page.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        for sub in &page.subresources {
            self.policy.evaluate(sub).await;
        }
        if let Ok(mut loaded) = self.loaded.lock() {
            *loaded = Some(page);
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> std::result::Result<Value, String> {
        let page = self.loaded_page().unwrap_or_default();
        if page.script_error {
            return Err("ReferenceError: scripted".into());
        }
        if expression == INNER_TEXT_JS {
            Ok(Value::String(page.inner_text))
        } else if expression == OUTER_HTML_JS {
            Ok(Value::String(page.html))
        } else {
            record(&self.events, format!("banner {}", self.profile));
            Ok(Value::Bool(true))
        }
    }

    async fn screenshot(&self) -> std::result::Result<Vec<u8>, String> {
        if self.script.fail_screenshot == Some(self.profile) {
            return Err("scripted screenshot failure".into());
        }
        Ok(BLANK_PNG.to_vec())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        record(&self.events, format!("close {}", self.profile));
    }
}
