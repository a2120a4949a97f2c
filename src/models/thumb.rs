//! A cropped thumbnail derived from an image file.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ThumbRecord {
    pub id: i64,

    /// Parent row in `files`.
    pub file_id: i64,

    /// Payload size in bytes.
    pub size: i64,

    pub width: i64,
    pub height: i64,
    pub save_name: String,
    pub save_path: String,
    pub view_url: String,
    pub md5: String,
}

/// Thumbnail row before insertion.
#[derive(Clone, Debug, Default)]
pub struct NewThumb {
    pub file_id: i64,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub save_name: String,
    pub save_path: String,
    pub view_url: String,
    pub md5: String,
}
