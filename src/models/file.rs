//! Represents an uploaded file.

use crate::models::upload::UploadResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row of a stored file. The payload itself lives in the storer
/// named by `storer_name`/`storer_id` at `save_path`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    pub id: i64,

    /// Kind of owner, currently always `user`.
    pub owner_type: String,

    /// Positive id of the owner.
    pub owner_id: i64,

    /// File name sent by the client.
    pub name: String,

    pub save_name: String,
    pub save_path: String,
    pub view_url: String,
    pub ext: String,
    pub mime: String,

    /// Detected type (`image`, `video`, ...).
    pub file_type: String,

    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub md5: String,
    pub storer_name: String,
    pub storer_id: String,

    /// Row in `table_name` this file belongs to; `0` while unbound.
    pub table_id: String,
    pub table_name: String,
    pub field_name: String,

    /// Upload category key.
    pub subdir: String,

    pub created_at: DateTime<Utc>,
}

/// A file row before insertion. The request-level part (owner, binding,
/// storer) is filled once; `set_by_upload_result` adds the per-file part.
#[derive(Clone, Debug, Default)]
pub struct NewFile {
    pub owner_type: String,
    pub owner_id: i64,
    pub name: String,
    pub save_name: String,
    pub save_path: String,
    pub view_url: String,
    pub ext: String,
    pub mime: String,
    pub file_type: String,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub md5: String,
    pub storer_name: String,
    pub storer_id: String,
    pub table_id: String,
    pub table_name: String,
    pub field_name: String,
    pub subdir: String,
}

impl NewFile {
    pub fn set_by_upload_result(&mut self, result: &UploadResult) {
        self.name.clone_from(&result.file_name);
        self.save_name.clone_from(&result.save_name);
        self.save_path.clone_from(&result.save_path);
        self.view_url.clone_from(&result.file_url);
        self.ext.clone_from(&result.ext);
        self.mime.clone_from(&result.mime);
        self.file_type = result.file_type.to_string();
        self.size = result.size as i64;
        self.width = result.width.unwrap_or_default() as i64;
        self.height = result.height.unwrap_or_default() as i64;
        self.md5.clone_from(&result.md5);
    }
}
