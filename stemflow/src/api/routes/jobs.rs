//! Job routes.
//!
//! Submission, status polling, cancellation, live progress over WebSocket and
//! archive and report download.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Multipart, Path, State,
        multipart::MultipartError,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::jobs::JobStatus;
use crate::notify::JobEvent;
use crate::pipeline::{ArchiveFormat, REPORT_FILE};
use crate::submission::{SubmitRequest, Upload};

/// Heartbeat ping interval in seconds.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Response to an accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/{id}", get(get_job).delete(cancel_job))
        .route("/{id}/ws", get(job_progress_ws))
        .route("/{id}/archive", get(download_archive))
        .route("/{id}/report", get(download_report))
}

/// Submit a job from a multipart form.
///
/// Fields: `stems` (2, 3 or 4), and exactly one of `youtube_url` (or `url`)
/// and `file`. Returns `202` with the job id as soon as the job is queued.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let request = read_submission(&mut multipart).await?;
    let job_id = state.submission.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

async fn read_submission(multipart: &mut Multipart) -> ApiResult<SubmitRequest> {
    let mut stems: Option<i64> = None;
    let mut request = SubmitRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "stems" => {
                let text = field.text().await.map_err(multipart_error)?;
                let count = text.trim().parse::<i64>().map_err(|_| {
                    ApiError::invalid_parameter(format!("stems must be an integer (got '{}')", text))
                })?;
                stems = Some(count);
            }
            "youtube_url" | "url" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    request.source_url = Some(text);
                }
            }
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes: Bytes = field.bytes().await.map_err(multipart_error)?;
                // Browsers send an empty part when no file was picked.
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }
                request.upload = Some(Upload { filename, bytes });
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    request.stem_count = stems.ok_or_else(|| ApiError::invalid_parameter("stems is required"))?;
    Ok(request)
}

fn multipart_error(err: MultipartError) -> ApiError {
    match err.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::payload_too_large(err.body_text()),
        status if status.is_server_error() => ApiError::internal(err.body_text()),
        _ => ApiError::bad_request(err.body_text()),
    }
}

/// Current state of a job.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobEvent>> {
    let record = state.registry.get(&id)?;
    Ok(Json(JobEvent::snapshot(&record)))
}

/// Request cooperative cancellation.
///
/// The run stops at its next stage boundary and the job ends `Failed` with
/// kind `cancelled`; watch the job to observe it.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobEvent>)> {
    let record = state.registry.request_cancel(&id)?;
    Ok((StatusCode::ACCEPTED, Json(JobEvent::snapshot(&record))))
}

/// WebSocket progress stream for one job.
///
/// Sends the current snapshot, then one JSON text frame per transition. The
/// server closes the socket after the terminal event.
pub async fn job_progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    if !state.registry.contains(&id) {
        return Err(ApiError::not_found(format!("Job '{}' not found", id)));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, job_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut event_rx) = state.hub.channel();
    let subscription = match state.hub.subscribe(&job_id, tx) {
        Ok(subscription) => subscription,
        Err(e) => {
            debug!(job_id = %job_id, error = %e, "Cannot watch job");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                let Some(event) = event else {
                    // Terminal event delivered, or we were dropped as a slow subscriber.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed to encode job event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    debug!(job_id = %job_id, "Failed to send event, client disconnected");
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if awaiting_pong {
                    debug!("Client failed to respond to Ping, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_ok() {
                    awaiting_pong = true;
                } else {
                    debug!("Failed to send Ping, closing connection");
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(&subscription);
}

/// Stream the stems archive of a finished job.
pub async fn download_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let record = state.registry.get(&id)?;
    let path = match (record.status, record.result) {
        (JobStatus::Done, Some(result)) => result.stems_archive,
        (status, _) => {
            return Err(ApiError::not_found(format!(
                "Job '{}' has no archive (status: {})",
                id, status
            )));
        }
    };

    let content_type = ArchiveFormat::from_path(&path).map(|format| format.content_type());
    serve_artifact(&id, &path, "stems.zip", content_type).await
}

/// Stream the PDF analysis report of a finished job.
pub async fn download_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let record = state.registry.get(&id)?;
    let path = match (record.status, record.result.and_then(|r| r.report)) {
        (JobStatus::Done, Some(report)) => report,
        (status, _) => {
            return Err(ApiError::not_found(format!(
                "Job '{}' has no report (status: {})",
                id, status
            )));
        }
    };

    serve_artifact(&id, &path, REPORT_FILE, Some("application/pdf")).await
}

/// Serve a job artifact as an attachment named `<job id>-<file name>`.
async fn serve_artifact(
    id: &str,
    path: &std::path::Path,
    fallback_name: &str,
    content_type: Option<&'static str>,
) -> ApiResult<Response> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ApiError::not_found(format!(
            "Artifact for job '{}' not found",
            id
        )));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(fallback_name);
    let content_disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}-{}\"",
        id, file_name
    ))
    .map_err(|e| ApiError::internal(format!("Invalid header value: {}", e)))?;

    let req = axum::http::Request::builder()
        .body(axum::body::Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut response = match ServeFile::new(path).try_call(req).await {
        Ok(response) => response.into_response(),
        Err(e) => return Err(ApiError::internal(format!("Failed to serve file: {}", e))),
    };

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_DISPOSITION, content_disposition);
    if let Some(content_type) = content_type {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    Ok(response)
}
