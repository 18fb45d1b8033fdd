//! REST API and WebSocket surface.
//!
//! - `POST /api/jobs`: submit a job
//! - `GET /api/jobs/{id}`: current snapshot
//! - `DELETE /api/jobs/{id}`: request cancellation
//! - `GET /api/jobs/{id}/ws`: live progress
//! - `GET /api/jobs/{id}/archive`: download the stems archive
//! - `GET /api/jobs/{id}/report`: download the PDF analysis report

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
