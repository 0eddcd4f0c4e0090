//! Chrome-backed sandbox.
//!
//! One headless browser process per job with a throw-away user-data dir.
//! Each device profile gets its own browser context (separate cookies,
//! storage and cache) and page target, with request interception enabled
//! before the page is allowed to navigate anywhere.
//!
//! Interception covers more than the page's own requests. WebSocket
//! handshakes never reach the Fetch domain, so `ws://`/`wss://` are blocked
//! outright. Workers and out-of-process frames are auto-attached paused and
//! only resumed once their own interception is on. WebRTC is limited to
//! proxied UDP, and no proxy is configured.

use async_trait::async_trait;
use phishnet_core::{DeviceProfile, Emulation, Error, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cdp::{CdpClient, SESSION_ID};
use crate::policy::PolicyState;
use crate::{Sandbox, SandboxContext, SandboxSession};

/// Screenshots are clipped to this many CSS pixels of document height.
const MAX_CAPTURE_HEIGHT: f64 = 16_384.0;

/// URL patterns blocked before they reach the network stack.
const BLOCKED_URL_PATTERNS: [&str; 2] = ["ws://*", "wss://*"];

fn cdp_err(e: String) -> Error {
    Error::Browser(e)
}

/// Launches a fresh browser per job.
pub struct ChromeSandbox {
    browser_path: Option<String>,
    headless: bool,
    launch_timeout: Duration,
    profiles_dir: PathBuf,
}

impl ChromeSandbox {
    pub fn new(
        browser_path: Option<String>,
        headless: bool,
        launch_timeout: Duration,
        profiles_dir: PathBuf,
    ) -> Self {
        Self {
            browser_path,
            headless,
            launch_timeout,
            profiles_dir,
        }
    }

    fn resolve_binary(&self) -> Result<String> {
        if let Some(path) = self.browser_path.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(path.to_string());
        }
        find_browser_binary().ok_or_else(|| {
            Error::Browser("No Chrome/Chromium/Edge binary found. Set sandbox.browserPath.".into())
        })
    }
}

#[async_trait]
impl Sandbox for ChromeSandbox {
    async fn open(&self, job_id: &str) -> Result<Box<dyn SandboxSession>> {
        let browser_path = self.resolve_binary()?;

        let user_data_dir = self.profiles_dir.join(format!(
            "{}-{}",
            job_id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        std::fs::create_dir_all(&user_data_dir)?;

        let debug_port = match find_free_port().await {
            Ok(p) => p,
            Err(e) => {
                remove_profile_dir(&user_data_dir);
                return Err(cdp_err(e));
            }
        };
        let args = build_browser_args(debug_port, &user_data_dir, self.headless);

        info!(
            job_id,
            port = debug_port,
            browser = %browser_path,
            "Launching sandbox browser"
        );

        let mut child = match Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                remove_profile_dir(&user_data_dir);
                return Err(Error::Browser(format!("Failed to launch {}: {}", browser_path, e)));
            }
        };

        let connected = async {
            let ws_url = wait_for_cdp_ready(debug_port, self.launch_timeout).await?;
            CdpClient::connect(&ws_url).await
        }
        .await;

        let browser = match connected {
            Ok(c) => c,
            Err(e) => {
                let _ = child.kill().await;
                remove_profile_dir(&user_data_dir);
                return Err(cdp_err(e));
            }
        };

        debug!(job_id, "Browser-level CDP connection established");

        Ok(Box::new(ChromeSession {
            job_id: job_id.to_string(),
            debug_port,
            child,
            browser: Arc::new(browser),
            user_data_dir,
            closed: false,
        }))
    }
}

/// A running browser process and its browser-level CDP connection.
pub struct ChromeSession {
    job_id: String,
    debug_port: u16,
    child: Child,
    browser: Arc<CdpClient>,
    user_data_dir: PathBuf,
    closed: bool,
}

impl ChromeSession {
    /// Page target inside `browser_context_id`. On failure everything created
    /// here, including the browser context, has been released.
    async fn open_page(
        &self,
        profile: DeviceProfile,
        browser_context_id: &str,
        policy: Arc<PolicyState>,
    ) -> std::result::Result<ChromeContext, String> {
        let target_id = match self
            .browser
            .create_target("about:blank", browser_context_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                let _ = self.browser.dispose_browser_context(browser_context_id).await;
                return Err(e);
            }
        };

        let page = async {
            let ws_url = get_target_ws_url(self.debug_port, &target_id).await?;
            CdpClient::connect(&ws_url).await
        }
        .await;
        let page = match page {
            Ok(p) => Arc::new(p),
            Err(e) => {
                let _ = self.browser.close_target(&target_id).await;
                let _ = self.browser.dispose_browser_context(browser_context_id).await;
                return Err(e);
            }
        };

        let mut context = ChromeContext {
            profile,
            page,
            browser: self.browser.clone(),
            browser_context_id: browser_context_id.to_string(),
            target_id,
            policy,
            tasks: Vec::new(),
            closed: false,
        };

        if let Err(e) = context.prepare().await {
            context.release().await;
            return Err(e);
        }
        Ok(context)
    }
}

#[async_trait]
impl SandboxSession for ChromeSession {
    async fn create_context(
        &mut self,
        profile: DeviceProfile,
        policy: Arc<PolicyState>,
    ) -> Result<Box<dyn SandboxContext>> {
        let browser_context_id = self
            .browser
            .create_browser_context()
            .await
            .map_err(cdp_err)?;

        match self.open_page(profile, &browser_context_id, policy).await {
            Ok(context) => {
                info!(job_id = %self.job_id, profile = %profile, "Browsing context ready");
                Ok(Box::new(context))
            }
            Err(e) => Err(Error::Browser(format!("{} context: {}", profile, e))),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.browser.close_browser().await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let _ = self.child.kill().await;
        remove_profile_dir(&self.user_data_dir);
        info!(job_id = %self.job_id, "Sandbox browser closed");
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(job_id = %self.job_id, "Sandbox session dropped without close, killing browser");
            let _ = self.child.start_kill();
            remove_profile_dir(&self.user_data_dir);
        }
    }
}

/// One device profile's isolated browser context and page.
pub struct ChromeContext {
    profile: DeviceProfile,
    page: Arc<CdpClient>,
    browser: Arc<CdpClient>,
    browser_context_id: String,
    target_id: String,
    policy: Arc<PolicyState>,
    /// Interceptor, target attacher and WebSocket recorder.
    tasks: Vec<tokio::task::JoinHandle<()>>,
    closed: bool,
}

impl ChromeContext {
    /// Emulation first, then interception, all before the first navigation.
    async fn prepare(&mut self) -> std::result::Result<(), String> {
        // Subscribe before enabling so the first event is not missed.
        let paused = self.page.subscribe_event("Fetch.requestPaused").await;
        let attached = self.page.subscribe_event("Target.attachedToTarget").await;
        let sockets = self.page.subscribe_event("Network.webSocketCreated").await;
        self.tasks.push(tokio::spawn(intercept_requests(
            self.page.clone(),
            self.policy.clone(),
            paused,
        )));
        self.tasks.push(tokio::spawn(attach_targets(self.page.clone(), attached)));
        self.tasks.push(tokio::spawn(record_websockets(self.policy.clone(), sockets)));

        for (method, params) in page_setup_commands(&self.profile.emulation()) {
            self.page.send_command(method, params).await?;
        }
        Ok(())
    }

    async fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
        if let Err(e) = self.browser.close_target(&self.target_id).await {
            debug!(profile = %self.profile, "closeTarget failed: {}", e);
        }
        if let Err(e) = self
            .browser
            .dispose_browser_context(&self.browser_context_id)
            .await
        {
            debug!(profile = %self.profile, "disposeBrowserContext failed: {}", e);
        }
    }
}

impl Drop for ChromeContext {
    fn drop(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl SandboxContext for ChromeContext {
    fn profile(&self) -> DeviceProfile {
        self.profile
    }

    fn policy(&self) -> &PolicyState {
        &self.policy
    }

    async fn navigate(&self, url: &str) -> std::result::Result<(), String> {
        let mut load = self.page.subscribe_event("Page.loadEventFired").await;
        let result = self.page.navigate(url).await?;
        if let Some(error_text) = result
            .get("errorText")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return Err(error_text.to_string());
        }
        // Same-document navigations have no loaderId and fire no load event.
        if result.get("loaderId").and_then(|v| v.as_str()).is_some() {
            let _ = load.recv().await;
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> std::result::Result<Value, String> {
        let result = self.page.evaluate_js(expression).await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("script exception");
            return Err(text.to_string());
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn screenshot(&self) -> std::result::Result<Vec<u8>, String> {
        use base64::Engine;

        let emulation = self.profile.emulation();
        let (width, height) = self.page.content_size().await.unwrap_or((0.0, 0.0));
        let width = width.max(emulation.width as f64);
        let height = height.max(emulation.height as f64).min(MAX_CAPTURE_HEIGHT);

        let data = self.page.screenshot_clip(width, height).await?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| format!("base64 decode: {}", e))
    }

    async fn close(&mut self) {
        self.release().await;
    }
}

/// Page-session commands, in order. Interception (`Fetch.enable`) goes last
/// so that everything it must see is already configured.
fn page_setup_commands(emulation: &Emulation) -> Vec<(&'static str, Value)> {
    let mut touch = json!({"enabled": emulation.touch});
    if emulation.touch {
        touch["maxTouchPoints"] = json!(5);
    }
    vec![
        ("Page.enable", json!({})),
        ("Runtime.enable", json!({})),
        ("Network.enable", json!({})),
        (
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": emulation.width,
                "height": emulation.height,
                "deviceScaleFactor": emulation.device_scale_factor,
                "mobile": emulation.mobile,
            }),
        ),
        (
            "Emulation.setUserAgentOverride",
            json!({"userAgent": emulation.user_agent}),
        ),
        ("Emulation.setTouchEmulationEnabled", touch),
        // route page requests around any service worker so they reach interception
        ("Network.setBypassServiceWorker", json!({"bypass": true})),
        ("Network.setBlockedURLs", json!({"urls": BLOCKED_URL_PATTERNS})),
        ("Target.setAutoAttach", auto_attach_params()),
        ("Fetch.enable", fetch_enable_params()),
    ]
}

/// Commands for a freshly attached child target, which is paused waiting for
/// the debugger. It is resumed by the last command only.
fn attached_target_commands() -> Vec<(&'static str, Value)> {
    vec![
        ("Fetch.enable", fetch_enable_params()),
        ("Network.enable", json!({})),
        ("Network.setBlockedURLs", json!({"urls": BLOCKED_URL_PATTERNS})),
        ("Target.setAutoAttach", auto_attach_params()),
        ("Runtime.runIfWaitingForDebugger", json!({})),
    ]
}

fn fetch_enable_params() -> Value {
    json!({
        "patterns": [{"urlPattern": "*", "requestStage": "Request"}],
        "handleAuthRequests": false,
    })
}

fn auto_attach_params() -> Value {
    json!({"autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true})
}

/// Answers every paused request with the policy's decision, in whichever
/// session it was paused.
async fn intercept_requests(
    page: Arc<CdpClient>,
    policy: Arc<PolicyState>,
    mut paused: mpsc::Receiver<Value>,
) {
    while let Some(params) = paused.recv().await {
        let Some(request_id) = params.get("requestId").and_then(|v| v.as_str()) else {
            continue;
        };
        let session_id = params.get(SESSION_ID).and_then(|v| v.as_str());
        let url = params
            .get("request")
            .and_then(|r| r.get("url"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let decision = policy.evaluate(url).await;
        let outcome = if decision.is_allow() {
            page.fetch_continue(session_id, request_id).await
        } else {
            debug!(url, ?decision, session_id, "Request blocked");
            page.fetch_fail(session_id, request_id, "BlockedByClient").await
        };
        if let Err(e) = outcome {
            debug!(url, "Failed to answer paused request: {}", e);
        }
    }
}

/// Turns on interception in each auto-attached target before letting it run.
/// A target whose setup fails is left paused.
async fn attach_targets(page: Arc<CdpClient>, mut attached: mpsc::Receiver<Value>) {
    while let Some(params) = attached.recv().await {
        let Some(session_id) = params.get(SESSION_ID).and_then(|v| v.as_str()) else {
            continue;
        };
        let target_type = params
            .get("targetInfo")
            .and_then(|t| t.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        let mut ready = true;
        for (method, command_params) in attached_target_commands() {
            if let Err(e) = page.send_session_command(session_id, method, command_params).await {
                warn!(target_type, method, "Attached target left paused: {}", e);
                ready = false;
                break;
            }
        }
        if ready {
            debug!(target_type, session_id, "Attached target intercepted and resumed");
        }
    }
}

/// WebSocket handshakes are blocked by URL pattern and never reach
/// interception; count them against the policy anyway.
async fn record_websockets(policy: Arc<PolicyState>, mut sockets: mpsc::Receiver<Value>) {
    while let Some(params) = sockets.recv().await {
        if let Some(url) = params.get("url").and_then(|v| v.as_str()) {
            let decision = policy.evaluate(url).await;
            debug!(url, ?decision, "WebSocket attempt");
        }
    }
}

fn remove_profile_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!(dir = %dir.display(), "Failed to remove browser profile dir: {}", e);
    }
}

/// Browser command line. Cross-site frames are kept in-process so the page's
/// interception sees them.
fn build_browser_args(debug_port: u16, user_data_dir: &Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        "--remote-debugging-address=127.0.0.1".to_string(),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-component-update".to_string(),
        "--disable-domain-reliability".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--disable-features=IsolateOrigins,site-per-process,InterestFeedContentSuggestions".to_string(),
        "--force-webrtc-ip-handling-policy=disable_non_proxied_udp".to_string(),
        "--webrtc-ip-handling-policy=disable_non_proxied_udp".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
        "--mute-audio".to_string(),
        "--hide-scrollbars".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Find a Chromium-family browser binary on the system.
pub fn find_browser_binary() -> Option<String> {
    for candidate in browser_candidates() {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Every candidate that resolves on this system, in search order.
pub fn list_available_browsers() -> Vec<String> {
    browser_candidates()
        .into_iter()
        .filter_map(|candidate| {
            if Path::new(candidate).exists() {
                return Some(candidate.to_string());
            }
            if candidate.contains('/') || candidate.contains('\\') {
                return None;
            }
            which::which(candidate)
                .ok()
                .map(|p| p.display().to_string())
        })
        .collect()
}

fn browser_candidates() -> Vec<&'static str> {
    if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "chromium",
            "chromium-browser",
            "google-chrome",
            "google-chrome-stable",
            "microsoft-edge",
            "/usr/bin/chromium",
            "/usr/bin/google-chrome",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    }
}

/// Find a free TCP port.
async fn find_free_port() -> std::result::Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the browser-level WebSocket URL is available.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> std::result::Result<String, String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            ));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
/// Retries a few times since a new target may not be listed immediately.
async fn get_target_ws_url(port: u16, target_id: &str) -> std::result::Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("id").and_then(|v| v.as_str()) == Some(target_id)
                || target.get("targetId").and_then(|v| v.as_str()) == Some(target_id)
            {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(format!(
        "No WebSocket URL found for targetId '{}' after retries",
        target_id
    ))
}
