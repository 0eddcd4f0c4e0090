//! Per-profile capture: navigate, settle, extract, banner, screenshot.
//!
//! Only the screenshot and its write are fatal. Navigation failures become
//! data, and extraction and banner failures are discarded at the call site.

use phishnet_core::config::SandboxConfig;
use phishnet_core::{CaptureResult, Error, NetworkCounters, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::extract::{strip_markup, truncate_chars};
use crate::policy::PolicyState;
use crate::SandboxContext;

pub const INNER_TEXT_JS: &str = "document.body ? document.body.innerText : ''";
pub const OUTER_HTML_JS: &str =
    "document.documentElement ? document.documentElement.outerHTML : ''";

/// Blocked hosts shown on the banner.
const BANNER_HOST_SAMPLE: usize = 3;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub navigation_timeout: Duration,
    pub settle: Duration,
    pub max_text_chars: usize,
}

impl CaptureSettings {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            settle: Duration::from_millis(config.settle_ms),
            max_text_chars: config.max_text_chars,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

/// Capture one profile into `out_dir/<profile>.png`.
pub async fn capture_profile(
    ctx: &dyn SandboxContext,
    target_url: &str,
    out_dir: &Path,
    settings: &CaptureSettings,
) -> Result<CaptureResult> {
    let profile = ctx.profile();

    let navigation_error =
        match tokio::time::timeout(settings.navigation_timeout, ctx.navigate(target_url)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(format!(
                "navigation timed out after {}s",
                settings.navigation_timeout.as_secs()
            )),
        };
    if let Some(e) = &navigation_error {
        info!(profile = %profile, error = %e, "Navigation failed, continuing capture");
    }

    tokio::time::sleep(settings.settle).await;

    let extracted_text = match extract_text(ctx, settings.max_text_chars).await {
        Ok(text) => text,
        Err(e) => {
            debug!(profile = %profile, "Text extraction failed: {}", e);
            String::new()
        }
    };

    let banner = banner_text(ctx.policy(), &ctx.policy().snapshot().await);
    if let Err(e) = inject_banner(ctx, &banner).await {
        debug!(profile = %profile, "Banner injection failed: {}", e);
    }

    let png = ctx
        .screenshot()
        .await
        .map_err(|e| Error::Capture(format!("{} screenshot: {}", profile, e)))?;
    let screenshot_path = out_dir.join(profile.screenshot_file());
    write_new(&screenshot_path, &png).await?;

    let network = ctx.policy().snapshot().await;
    info!(
        profile = %profile,
        allowed = network.allowed,
        blocked = network.blocked,
        text_chars = extracted_text.chars().count(),
        "Profile captured"
    );

    Ok(CaptureResult {
        profile,
        screenshot_path,
        extracted_text,
        navigation_error,
        network,
    })
}

/// Visible text, falling back to stripped markup when the page reports none.
pub async fn extract_text(
    ctx: &dyn SandboxContext,
    max_chars: usize,
) -> std::result::Result<String, String> {
    let visible = ctx.evaluate(INNER_TEXT_JS).await;
    if let Ok(text) = &visible {
        let text = text.as_str().unwrap_or("").trim();
        if !text.is_empty() {
            return Ok(truncate_chars(text, max_chars));
        }
    }

    let html = ctx.evaluate(OUTER_HTML_JS).await.map_err(|e| match &visible {
        Err(first) => format!("{}; {}", first, e),
        Ok(_) => e,
    })?;
    let html = html.as_str().unwrap_or("");
    Ok(truncate_chars(&strip_markup(html), max_chars))
}

/// One-line summary of the active policy and what it has done so far.
pub fn banner_text(policy: &PolicyState, counters: &NetworkCounters) -> String {
    let mode = if policy.allow_target_origin() {
        match policy.target_origin() {
            Some(origin) => format!("default deny, target origin {} allowed", origin),
            None => "default deny".to_string(),
        }
    } else {
        "default deny, all network blocked".to_string()
    };
    let mut text = format!(
        "PhishNet sandbox | {} | allowed {} / blocked {}",
        mode, counters.allowed, counters.blocked
    );
    if !counters.blocked_hosts.is_empty() {
        let sample: Vec<&str> = counters
            .blocked_hosts
            .iter()
            .take(BANNER_HOST_SAMPLE)
            .map(|h| h.as_str())
            .collect();
        text.push_str(" | blocked: ");
        text.push_str(&sample.join(", "));
    }
    text
}

/// Overlay script for `text`. The banner never takes pointer events.
pub fn banner_script(text: &str) -> String {
    let literal = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
  const root = document.body || document.documentElement;
  if (!root) return false;
  const el = document.createElement('div');
  el.setAttribute('data-phishnet-banner', '1');
  el.style.cssText = 'position:fixed;top:0;left:0;right:0;z-index:2147483647;pointer-events:none;' +
    'background:rgba(180,0,0,0.88);color:#fff;font:12px/1.4 monospace;padding:4px 8px;' +
    'white-space:nowrap;overflow:hidden;text-overflow:ellipsis;';
  el.textContent = {};
  root.appendChild(el);
  return true;
}})()"#,
        literal
    )
}

async fn inject_banner(ctx: &dyn SandboxContext, text: &str) -> std::result::Result<(), String> {
    let injected = ctx.evaluate(&banner_script(text)).await?;
    if injected.as_bool() == Some(false) {
        return Err("page has no document root".into());
    }
    Ok(())
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedPage, ScriptedSandbox, BLOCKED_BY_CLIENT};
    use crate::Sandbox;
    use phishnet_core::DeviceProfile;
    use std::sync::Arc;

    fn fast() -> CaptureSettings {
        CaptureSettings {
            navigation_timeout: Duration::from_millis(200),
            settle: Duration::from_millis(1),
            max_text_chars: 20_000,
        }
    }

    async fn capture(
        sandbox: &ScriptedSandbox,
        url: &str,
        allow: bool,
        out: &Path,
    ) -> Result<CaptureResult> {
        let mut session = sandbox.open("job").await?;
        let policy = Arc::new(PolicyState::new(url, allow));
        let mut ctx = session.create_context(DeviceProfile::Desktop, policy).await?;
        let result = capture_profile(ctx.as_ref(), url, out, &fast()).await;
        ctx.close().await;
        session.close().await;
        result
    }

    #[test]
    fn test_settings_from_config() {
        let s = CaptureSettings::default();
        assert_eq!(s.navigation_timeout, Duration::from_secs(15));
        assert_eq!(s.settle, Duration::from_millis(900));
        assert_eq!(s.max_text_chars, 20_000);
    }

    #[tokio::test]
    async fn test_allowed_page_is_captured() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = "https://example.com/login";
        let page = ScriptedPage {
            subresources: vec![
                "https://example.com/app.js".into(),
                "https://cdn.tracker.test/pixel.gif".into(),
            ],
            ..ScriptedPage::text("Sign in to continue")
        };
        let sandbox = ScriptedSandbox::new().with_page(url, page);

        let result = capture(&sandbox, url, true, dir.path()).await.unwrap();
        assert_eq!(result.navigation_error, None);
        assert_eq!(result.extracted_text, "Sign in to continue");
        assert_eq!(result.network.allowed, 2);
        assert_eq!(result.network.blocked, 1);
        assert_eq!(result.network.blocked_hosts, vec!["cdn.tracker.test"]);
        assert_eq!(result.screenshot_path, dir.path().join("desktop.png"));
        assert!(result.screenshot_path.exists());
        assert!(sandbox.events().contains(&"banner desktop".to_string()));
    }

    #[tokio::test]
    async fn test_blocked_navigation_still_screenshots() {
        let dir = tempfile::TempDir::new().unwrap();
        let sandbox = ScriptedSandbox::new();
        let result = capture(&sandbox, "http://127.0.0.1:9999/", true, dir.path())
            .await
            .unwrap();
        assert_eq!(result.navigation_error.as_deref(), Some(BLOCKED_BY_CLIENT));
        assert_eq!(result.extracted_text, "");
        assert_eq!(result.network.blocked_hosts, vec!["127.0.0.1"]);
        assert!(result.screenshot_path.exists());
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_recorded() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = "https://slow.example/";
        let page = ScriptedPage {
            hang: true,
            ..ScriptedPage::text("never")
        };
        let sandbox = ScriptedSandbox::new().with_page(url, page);
        let result = capture(&sandbox, url, true, dir.path()).await.unwrap();
        assert!(result
            .navigation_error
            .as_deref()
            .unwrap()
            .starts_with("navigation timed out after"));
    }

    #[tokio::test]
    async fn test_text_falls_back_to_markup() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = "https://example.com/";
        let page = ScriptedPage {
            inner_text: "   ".into(),
            html: "<html><body><script>x=1</script><p>Reset   password</p></body></html>".into(),
            ..Default::default()
        };
        let sandbox = ScriptedSandbox::new().with_page(url, page);
        let result = capture(&sandbox, url, true, dir.path()).await.unwrap();
        assert_eq!(result.extracted_text, "Reset password");
    }

    #[tokio::test]
    async fn test_text_is_truncated_on_both_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let long = "a".repeat(25_000);
        let visible = "https://example.com/visible";
        let markup = "https://example.com/markup";
        let sandbox = ScriptedSandbox::new()
            .with_page(visible, ScriptedPage::text(&long))
            .with_page(
                markup,
                ScriptedPage {
                    html: format!("<p>{}</p>", long),
                    ..Default::default()
                },
            );

        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let r1 = capture(&sandbox, visible, true, &a).await.unwrap();
        let r2 = capture(&sandbox, markup, true, &b).await.unwrap();
        assert_eq!(r1.extracted_text.chars().count(), 20_000);
        assert_eq!(r2.extracted_text.chars().count(), 20_000);
    }

    #[tokio::test]
    async fn test_script_errors_are_discarded() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = "https://example.com/";
        let page = ScriptedPage {
            script_error: true,
            ..ScriptedPage::text("hidden")
        };
        let sandbox = ScriptedSandbox::new().with_page(url, page);

        let result = capture(&sandbox, url, true, dir.path()).await.unwrap();
        assert_eq!(result.extracted_text, "");
        assert!(!sandbox.events().contains(&"banner desktop".to_string()));
        assert!(result.screenshot_path.exists());
    }

    #[tokio::test]
    async fn test_screenshot_failure_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = "https://example.com/";
        let sandbox = ScriptedSandbox::new()
            .with_page(url, ScriptedPage::text("x"))
            .failing_screenshot(DeviceProfile::Desktop);
        let err = capture(&sandbox, url, true, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
        assert!(!dir.path().join("desktop.png").exists());
    }

    #[tokio::test]
    async fn test_existing_screenshot_is_not_overwritten() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("desktop.png"), b"earlier").unwrap();
        let url = "https://example.com/";
        let sandbox = ScriptedSandbox::new().with_page(url, ScriptedPage::text("x"));
        let err = capture(&sandbox, url, true, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(std::fs::read(dir.path().join("desktop.png")).unwrap(), b"earlier");
    }

    #[test]
    fn test_banner_text_summarises_policy() {
        let policy = PolicyState::new("https://example.com/x", false);
        let counters = NetworkCounters {
            allowed: 0,
            blocked: 5,
            blocked_hosts: vec!["a.test".into(), "b.test".into(), "c.test".into(), "d.test".into()],
        };
        let text = banner_text(&policy, &counters);
        assert!(text.contains("all network blocked"));
        assert!(text.contains("allowed 0 / blocked 5"));
        assert!(text.ends_with("blocked: a.test, b.test, c.test"));

        let allowing = PolicyState::new("https://example.com/x", true);
        let text = banner_text(&allowing, &NetworkCounters::default());
        assert!(text.contains("target origin https://example.com allowed"));
        assert!(!text.contains("blocked:"));
    }

    #[test]
    fn test_banner_script_escapes_text() {
        let script = banner_script("evil\"); alert(1); (\"");
        assert!(script.contains(r#"el.textContent = "evil\"); alert(1); (\"";"#));
        assert!(script.contains("pointer-events:none"));
    }
}
