use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use phishnet_core::{Config, Error, Paths};
use phishnet_jobs::{JobService, RenderRequest};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<JobService>,
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Client-facing message, without the variant prefix for expected failures.
fn error_message(error: &Error) -> String {
    match error {
        Error::Validation(m) | Error::Conflict(m) | Error::Busy(m) | Error::NotFound(m) => {
            m.clone()
        }
        other => other.to_string(),
    }
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    let admission = state.service.admission();
    Json(json!({
        "ok": true,
        "artifact_dir": state.service.artifact_root().display().to_string(),
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": {
            "admitted": admission.admitted(),
            "running": admission.running(),
        },
    }))
}

async fn handle_render(State(state): State<GatewayState>, body: Bytes) -> Response {
    let request: RenderRequest = if body.iter().all(|b| b.is_ascii_whitespace()) {
        RenderRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"ok": false, "error": format!("invalid JSON body: {}", e)})),
                )
                    .into_response();
            }
        }
    };

    match state.service.submit(&request).await {
        Ok(rendered) => Json(json!({
            "ok": true,
            "job_id": rendered.job_id,
            "out_dir": rendered.out_dir.display().to_string(),
            "meta": rendered.meta,
        }))
        .into_response(),
        Err(rejected) => {
            let status = status_for(&rejected.error);
            let mut body = json!({"ok": false, "error": error_message(&rejected.error)});
            if let Some(job_id) = rejected.job_id {
                body["job_id"] = json!(job_id);
            }
            if let Some(out_dir) = rejected.out_dir {
                body["out_dir"] = json!(out_dir.display().to_string());
            }
            (status, Json(body)).into_response()
        }
    }
}

async fn handle_jobs(State(state): State<GatewayState>) -> impl IntoResponse {
    let jobs = state.service.registry().list().await;
    Json(json!({ "jobs": jobs }))
}

async fn handle_job_get(State(state): State<GatewayState>, Path(id): Path<String>) -> Response {
    match state.service.registry().get(&id).await {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": format!("job not found: {}", id)})),
        )
            .into_response(),
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/render", post(handle_render))
        .route("/jobs", get(handle_jobs))
        .route("/jobs/:id", get(handle_job_get))
        .layer(CorsLayer::permissive().allow_credentials(false))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let service = super::build_service(&config, &paths);
    std::fs::create_dir_all(service.artifact_root())?;
    let app = build_router(GatewayState {
        service: service.clone(),
    });

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        artifact_dir = %service.artifact_root().display(),
        "PhishNet render service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use phishnet_jobs::{Admission, JobRunner};
    use phishnet_sandbox::scripted::{ScriptedPage, ScriptedSandbox};
    use phishnet_sandbox::CaptureSettings;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(root: &TempDir) -> GatewayState {
        let sandbox = ScriptedSandbox::new()
            .with_page("https://example.com/", ScriptedPage::text("Example Domain"));
        let settings = CaptureSettings {
            navigation_timeout: Duration::from_millis(500),
            settle: Duration::from_millis(1),
            max_text_chars: 20_000,
        };
        let runner = JobRunner::new(Arc::new(sandbox), settings);
        GatewayState {
            service: Arc::new(JobService::new(
                runner,
                Admission::new(2, 16),
                root.path().to_path_buf(),
            )),
        }
    }

    fn post_render(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/render")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let root = TempDir::new().unwrap();
        let app = build_router(test_state(&root));

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["artifact_dir"], root.path().display().to_string());
    }

    #[tokio::test]
    async fn test_render_without_url_is_rejected() {
        let root = TempDir::new().unwrap();
        let app = build_router(test_state(&root));

        let response = app.oneshot(post_render("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "missing url");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_render_empty_and_malformed_bodies() {
        let root = TempDir::new().unwrap();
        let app = build_router(test_state(&root));

        let response = app.clone().oneshot(post_render("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "missing url");

        let response = app.oneshot(post_render("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_render_and_list_jobs() {
        let root = TempDir::new().unwrap();
        let app = build_router(test_state(&root));

        let response = app
            .clone()
            .oneshot(post_render(
                r#"{"url":"https://example.com/","job":"j1","outSubdir":"web","allowTargetOrigin":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["job_id"], "j1");
        assert_eq!(json["meta"]["job_uuid"], "j1");
        assert_eq!(json["meta"]["artifacts"]["desktop.png"]["path"], "web/j1/desktop.png");
        assert!(root.path().join("web/j1/meta.json").is_file());

        let response = app.clone().oneshot(get("/jobs")).await.unwrap();
        let json = json_body(response).await;
        assert_eq!(json["jobs"][0]["job_id"], "j1");
        assert_eq!(json["jobs"][0]["status"], "done");

        let response = app.clone().oneshot(get("/jobs/j1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/jobs/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_job_conflict() {
        let root = TempDir::new().unwrap();
        let app = build_router(test_state(&root));
        let body = r#"{"url":"https://example.com/","job":"dup"}"#;

        let first = app.clone().oneshot(post_render(body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post_render(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let json = json_body(second).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "job already exists");
        assert_eq!(json["job_id"], "dup");
        assert_eq!(json["out_dir"], root.path().join("dup").display().to_string());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::Busy("x".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&Error::Capture("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(error_message(&Error::Busy("render queue is full".into())), "render queue is full");
        assert_eq!(error_message(&Error::Browser("gone".into())), "Browser error: gone");
    }
}
