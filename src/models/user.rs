use serde::Serialize;
use sqlx::FromRow;

/// An admin account allowed to upload files.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,
}
