//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One client per WebSocket endpoint: the browser-level endpoint drives
//! browser contexts and targets, page-level endpoints drive navigation,
//! emulation, evaluation, screenshots and request interception.
//!
//! Child targets attached with `flatten: true` (workers, out-of-process
//! frames) share the page endpoint. Commands for them carry a `sessionId`,
//! and their events are delivered with the `sessionId` copied into the params.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer per event subscription. A paused request whose event is dropped
/// stays paused, so this is sized well above a page's burst of subresources.
const EVENT_BUFFER: usize = 1024;

/// Key under which a child session's id is exposed in event params.
pub const SESSION_ID: &str = "sessionId";

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type ListenerMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: PendingMap,
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channel).
    event_listeners: ListenerMap,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, String> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: reads from WebSocket, dispatches responses and events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get(method) {
                                let params = event_params(&val);
                                for tx in senders {
                                    if tx.try_send(params.clone()).is_err() {
                                        warn!(event = method, "CDP event dropped (listener full or gone)");
                                    }
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            reader_handle,
            writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, String> {
        self.send(None, method, params).await
    }

    /// Send a command to an attached child session.
    pub async fn send_session_command(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, String> {
        self.send(Some(session_id), method, params).await
    }

    async fn send(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session_id) = session_id {
            msg[SESSION_ID] = json!(session_id);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| format!("Failed to send CDP command: {}", e))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(format!("CDP error: {}", error))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err("CDP response channel closed".to_string()),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                ))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut listeners = self.event_listeners.lock().await;
        listeners.entry(method.to_string()).or_default().push(tx);
        rx
    }

    /// Start a navigation. The result carries `errorText` when the browser
    /// refused or failed the main document request.
    pub async fn navigate(&self, url: &str) -> Result<Value, String> {
        self.send_command("Page.navigate", json!({"url": url})).await
    }

    /// Evaluate JavaScript in the page context.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, String> {
        self.send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await
    }

    /// Capture a PNG of `width`×`height` CSS pixels from the top of the
    /// document, beyond the viewport. Returns base64 data.
    pub async fn screenshot_clip(&self, width: f64, height: f64) -> Result<String, String> {
        let params = json!({
            "format": "png",
            "captureBeyondViewport": true,
            "clip": {"x": 0, "y": 0, "width": width, "height": height, "scale": 1},
        });
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No screenshot data returned".to_string())
    }

    /// Full document size in CSS pixels, as `(width, height)`.
    pub async fn content_size(&self) -> Result<(f64, f64), String> {
        let metrics = self.send_command("Page.getLayoutMetrics", json!({})).await?;
        let size = metrics
            .get("cssContentSize")
            .or_else(|| metrics.get("contentSize"))
            .ok_or_else(|| "No content size in layout metrics".to_string())?;
        let width = size.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let height = size.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok((width, height))
    }

    // ─── Browser contexts / targets (browser-level endpoint) ──────────

    /// Create an isolated (incognito-like) browser context.
    pub async fn create_browser_context(&self) -> Result<String, String> {
        let result = self
            .send_command(
                "Target.createBrowserContext",
                json!({"disposeOnDetach": true}),
            )
            .await?;
        result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No browserContextId returned".to_string())
    }

    pub async fn dispose_browser_context(&self, browser_context_id: &str) -> Result<(), String> {
        self.send_command(
            "Target.disposeBrowserContext",
            json!({"browserContextId": browser_context_id}),
        )
        .await?;
        Ok(())
    }

    /// Create a page target inside a browser context.
    pub async fn create_target(&self, url: &str, browser_context_id: &str) -> Result<String, String> {
        let result = self
            .send_command(
                "Target.createTarget",
                json!({"url": url, "browserContextId": browser_context_id}),
            )
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No targetId returned from createTarget".to_string())
    }

    pub async fn close_target(&self, target_id: &str) -> Result<(), String> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    pub async fn close_browser(&self) -> Result<(), String> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }

    // ─── Network interception (Fetch domain) ──────────────────────────

    /// Release a paused request unmodified. `session_id` is the child session
    /// the request was paused in, if any.
    pub async fn fetch_continue(&self, session_id: Option<&str>, request_id: &str) -> Result<(), String> {
        self.send(session_id, "Fetch.continueRequest", json!({"requestId": request_id}))
            .await?;
        Ok(())
    }

    /// Fail a paused request with a specific error reason.
    pub async fn fetch_fail(
        &self,
        session_id: Option<&str>,
        request_id: &str,
        reason: &str,
    ) -> Result<(), String> {
        self.send(
            session_id,
            "Fetch.failRequest",
            json!({"requestId": request_id, "errorReason": reason}),
        )
        .await?;
        Ok(())
    }
}

/// Event params, tagged with the originating child session when there is one.
/// Params that already name a session (`Target.attachedToTarget`) are left alone.
fn event_params(message: &Value) -> Value {
    let mut params = message.get("params").cloned().unwrap_or(Value::Null);
    if let (Some(session_id), Some(map)) = (message.get(SESSION_ID), params.as_object_mut()) {
        map.entry(SESSION_ID).or_insert_with(|| session_id.clone());
    }
    params
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
