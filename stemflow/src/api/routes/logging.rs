//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

/// Body of `PUT /api/logging`.
#[derive(Debug, Deserialize)]
pub struct SetLogFilter {
    pub filter: String,
}

/// Active filter plus the targets worth tuning.
#[derive(Debug, Serialize)]
pub struct LogFilterResponse {
    pub filter: String,
    pub targets: Vec<LogTarget>,
}

#[derive(Debug, Serialize)]
pub struct LogTarget {
    pub name: String,
    pub description: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_log_filter).put(set_log_filter))
}

async fn get_log_filter(
    State(state): State<AppState>,
) -> ApiResult<Json<LogFilterResponse>> {
    let logging_config = logging_config(&state)?;

    Ok(Json(response(logging_config.get_filter())))
}

/// Apply a new filter directive, e.g. `stemflow=debug,tower_http=warn`.
async fn set_log_filter(
    State(state): State<AppState>,
    Json(request): Json<SetLogFilter>,
) -> ApiResult<Json<LogFilterResponse>> {
    let logging_config = logging_config(&state)?;

    logging_config.set_filter(&request.filter)?;

    Ok(Json(response(logging_config.get_filter())))
}

fn logging_config(state: &AppState) -> ApiResult<&LoggingConfig> {
    state
        .logging_config
        .as_deref()
        .ok_or_else(|| ApiError::internal("Runtime log filtering is not enabled"))
}

fn response(filter: String) -> LogFilterResponse {
    let targets = available_modules()
        .into_iter()
        .map(|(name, description)| LogTarget {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect();

    LogFilterResponse {
        filter,
        targets,
    }
}
