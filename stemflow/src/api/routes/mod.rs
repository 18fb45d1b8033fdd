//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod jobs;
pub mod logging;

use axum::Router;
use axum::routing::{get, post};

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/jobs", jobs::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        // Paths used by the React web frontend
        .route("/process", post(jobs::submit_job))
        .route("/ws/{id}", get(jobs::job_progress_ws))
        .route("/ws/status/{id}", get(jobs::job_progress_ws))
        .route("/download/stems/{id}", get(jobs::download_archive))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::response::Response;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{AppConfig, ToolPaths};
    use crate::jobs::{JobMutation, JobParams, JobRegistry, JobResult, JobStatus, StemCount};
    use crate::notify::{HubConfig, NotificationHub};
    use crate::pipeline::{Orchestrator, OrchestratorConfig, StageSet, WorkDirAllocator};
    use crate::submission::SubmissionService;

    /// State wired to tools that do not exist, so spawned runs fail fast.
    pub(crate) fn test_state() -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing-tool").display().to_string();
        let config = AppConfig {
            tools: ToolPaths {
                ffmpeg: missing.clone(),
                ytdlp: missing.clone(),
                spleeter: missing.clone(),
                analyzer: missing,
            },
            ..AppConfig::default()
        };

        let registry = Arc::new(JobRegistry::new());
        let hub = Arc::new(NotificationHub::new(registry.clone(), HubConfig::default()));
        let workdirs = Arc::new(WorkDirAllocator::new(dir.path().join("work")));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            hub.clone(),
            StageSet::from_config(&config),
            workdirs.clone(),
            OrchestratorConfig::default(),
        ));
        let submission = Arc::new(SubmissionService::new(
            registry.clone(),
            orchestrator,
            workdirs,
        ));

        (AppState::new(registry, hub, submission), dir)
    }

    pub(crate) async fn read_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_routes_are_mounted() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        for uri in ["/health", "/health/live"] {
            let response = app
                .clone()
                .oneshot(HttpRequest::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }

        // Handler-level 404 carries an error body; an unmatched route would not.
        for uri in [
            "/api/jobs/unknown",
            "/api/jobs/unknown/archive",
            "/api/jobs/unknown/report",
            "/download/stems/unknown",
        ] {
            let response = app
                .clone()
                .oneshot(HttpRequest::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(read_json(response).await["code"], "NOT_FOUND", "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_frontend_download_path_serves_archive() {
        let (state, dir) = test_state();
        let archive = dir.path().join("stems.zip");
        std::fs::write(&archive, b"PK\x05\x06").unwrap();
        let id = state
            .registry
            .create(JobParams::from_url(StemCount::TWO, "https://x/y"));
        state
            .registry
            .update(&id, JobMutation::Status(JobStatus::Downloading))
            .unwrap();
        state
            .registry
            .update(
                &id,
                JobMutation::Complete(JobResult {
                    key: "C major".to_string(),
                    chords: None,
                    melody: None,
                    stems_archive: archive,
                    report: None,
                }),
            )
            .unwrap();

        let response = create_router(state)
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/download/stems/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"PK\x05\x06");
    }

    #[tokio::test]
    async fn test_frontend_status_socket_requires_upgrade() {
        let (state, _dir) = test_state();
        let id = state
            .registry
            .create(JobParams::from_url(StemCount::TWO, "https://x/y"));

        // A plain GET reaches the handler and is refused for the missing
        // upgrade headers; an unmatched path would be a 404.
        let response = create_router(state)
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/ws/status/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_process_alias_validates() {
        let (state, _dir) = test_state();
        let app = create_router(state);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/process")
                    .header("content-type", "multipart/form-data; boundary=x")
                    .body(Body::from("--x\r\nContent-Disposition: form-data; name=\"stems\"\r\n\r\n7\r\n--x--\r\n"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
