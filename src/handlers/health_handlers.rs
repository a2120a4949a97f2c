//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and the storer

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Writes, reads back and deletes a probe file through the storer.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.repo.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let probe_path = format!(".readyz-{}", Uuid::new_v4().simple());
    let storage_check = match state
        .storer
        .put(&probe_path, Bytes::from_static(PROBE), true)
        .await
    {
        Ok(_) => {
            let read = state.storer.get(&probe_path).await;
            let removed = state.storer.delete(&probe_path).await;
            match (read, removed) {
                (Ok(bytes), Ok(())) if bytes.as_ref() == PROBE => CheckStatus::ok(),
                (Ok(bytes), Err(e)) if bytes.as_ref() == PROBE => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove probe file: {}", e)),
                },
                (Ok(_), _) => CheckStatus::failed("probe content mismatch".into()),
                (Err(e), _) => CheckStatus::failed(format!("could not read probe file: {}", e)),
            }
        }
        Err(e) => CheckStatus::failed(format!("could not write probe file: {}", e)),
    };

    let overall_ok = sqlite_check.ok && storage_check.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("storage", storage_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
