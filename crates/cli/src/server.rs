use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::batch::{Discovery, JobOutcome, Pipeline};
use crate::config::IndexKind;
use crate::metrics::RunStatsSnapshot;

struct AppState {
    pipeline: Arc<Pipeline>,
    // One batch at a time; runs share output folders and the Qdrant collections.
    run_lock: Mutex<()>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    llm: String,
    model: String,
    embedder: String,
    index: IndexKind,
}

#[derive(Deserialize)]
struct ReportRequest {
    path: String,
    /// Defaults to walking the whole tree for PDF folders
    #[serde(default)]
    recursive: Option<bool>,
}

#[derive(Serialize)]
struct ReportResponse {
    path: String,
    directories: Vec<JobOutcome>,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        run_lock: Mutex::new(()),
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/reports", post(create_reports))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(pipeline: Arc<Pipeline>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);

    axum::serve(listener, router(pipeline))
        .await
        .context("Server stopped unexpectedly")
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pipeline = &state.pipeline;
    Json(HealthResponse {
        status: "ok",
        llm: pipeline.model().name().to_string(),
        model: pipeline.model().model().to_string(),
        embedder: pipeline.embedder().name().to_string(),
        index: pipeline.config().index.backend,
    })
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<RunStatsSnapshot> {
    Json(state.pipeline.stats().snapshot())
}

async fn create_reports(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, StatusCode> {
    let path = PathBuf::from(&req.path);

    if !path.exists() {
        return Err(StatusCode::NOT_FOUND);
    }

    let discovery = if req.recursive.unwrap_or(true) {
        Discovery::Recursive
    } else {
        Discovery::Subdirectories
    };

    let _guard = state.run_lock.lock().await;

    let directories = state
        .pipeline
        .run_batch(&path, discovery, |_| {})
        .await
        .map_err(|e| {
            error!(path = %req.path, error = %format!("{:#}", e), "Report run failed");
            if index::is_fatal(&e) {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok(Json(ReportResponse {
        path: req.path,
        directories,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ParkingModel, RecoveringModel, RevokedKeyModel, pipeline, test_config, write_parking_pdf,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_reports(path: &std::path::Path) -> Request<Body> {
        post_json(serde_json::json!({ "path": path }))
    }

    fn post_json(body: serde_json::Value) -> Request<Body> {
        let body = body.to_string();
        Request::builder()
            .method("POST")
            .uri("/reports")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_clients() {
        let app = router(Arc::new(pipeline(test_config(), Arc::new(ParkingModel))));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model"], "parking-1");
        assert_eq!(json["embedder"], "hash");
        assert_eq!(json["index"], "memory");
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let app = router(Arc::new(pipeline(test_config(), Arc::new(ParkingModel))));
        let root = tempfile::tempdir().unwrap();
        let response = app.oneshot(post_reports(&root.path().join("missing"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_report_run_returns_tables_and_updates_stats() {
        let root = tempfile::tempdir().unwrap();
        write_parking_pdf(&root.path().join("site-a"));

        let pipeline = Arc::new(pipeline(test_config(), Arc::new(ParkingModel)));
        let app = router(pipeline.clone());

        let response = app.clone().oneshot(post_reports(root.path())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let site = &json["directories"][0];
        assert_eq!(site["status"], "completed");
        assert_eq!(site["name"], "site-a");
        let parking = site["table"]
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["component"] == "Parking Space")
            .unwrap();
        assert_eq!(parking["no_action"], 42.0);
        assert_eq!(parking["with_action"], 10.0);

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["directories_processed"], 1);
        assert_eq!(stats["values_found"], 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_fails_only_its_directory() {
        let root = tempfile::tempdir().unwrap();
        write_parking_pdf(&root.path().join("site-a"));
        write_parking_pdf(&root.path().join("site-b"));

        let app = router(Arc::new(pipeline(test_config(), Arc::new(RecoveringModel::default()))));
        let response = app.oneshot(post_reports(root.path())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["directories"][0]["name"], "site-a");
        assert_eq!(json["directories"][0]["status"], "failed");
        assert_eq!(json["directories"][1]["name"], "site-b");
        assert_eq!(json["directories"][1]["status"], "completed");
    }

    #[tokio::test]
    async fn test_stop_on_fatal_is_bad_gateway() {
        let root = tempfile::tempdir().unwrap();
        write_parking_pdf(&root.path().join("site-a"));

        let mut config = test_config();
        config.batch.stop_on_fatal = true;
        let app = router(Arc::new(pipeline(config, Arc::new(RevokedKeyModel))));
        let response = app.oneshot(post_reports(root.path())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_nested_project_folders_are_found() {
        let root = tempfile::tempdir().unwrap();
        write_parking_pdf(&root.path().join("region").join("site-a"));

        let pipeline = Arc::new(pipeline(test_config(), Arc::new(ParkingModel)));
        let app = router(pipeline);

        let response = app.clone().oneshot(post_reports(root.path())).await.unwrap();
        let json = body_json(response).await;
        let directories = json["directories"].as_array().unwrap();
        assert_eq!(directories.len(), 1);
        assert_eq!(directories[0]["name"], "site-a");
        assert_eq!(directories[0]["status"], "completed");

        let shallow = post_json(serde_json::json!({ "path": root.path(), "recursive": false }));
        let json = body_json(app.oneshot(shallow).await.unwrap()).await;
        assert_eq!(json["directories"][0]["name"], "region");
        assert_eq!(json["directories"][0]["status"], "skipped");
    }
}
