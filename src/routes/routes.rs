//! Defines routes of the upload service.
//!
//! ## Structure
//! - `POST /upload/{type}`: upload into category `type` (`category` or
//!   `category.field`)
//! - `POST /upload`: answers with a missing-parameter error
//! - `GET  {files_route}/{*path}`: stream a stored file
//! - `GET  /healthz`, `GET /readyz`: probes

use crate::{
    handlers::{
        file_handlers::get_file,
        health_handlers::{healthz, readyz},
        upload_handlers::{upload, upload_missing_type},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Batch requests may carry several files of up to `max_upload_bytes` each.
const MAX_FILES_PER_REQUEST: u64 = 8;

/// Build the router. `files_route` mounts the file server when the public
/// URL prefix is local to this service.
pub fn routes(state: &AppState, files_route: Option<&str>) -> Router<AppState> {
    let body_limit =
        usize::try_from(state.max_upload_bytes.saturating_mul(MAX_FILES_PER_REQUEST))
            .unwrap_or(usize::MAX);

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_missing_type))
        .route(
            "/upload/{type}",
            post(upload).layer(DefaultBodyLimit::max(body_limit)),
        );

    if let Some(prefix) = files_route {
        router = router.route(&format!("{prefix}/{{*path}}"), get(get_file));
    }
    router
}
