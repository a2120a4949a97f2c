//! Data models of the upload service.
//!
//! Records map to database tables via `sqlx::FromRow` and serialize as JSON
//! via `serde`; `upload` holds the in-flight request types.

pub mod file;
pub mod thumb;
pub mod upload;
pub mod user;
