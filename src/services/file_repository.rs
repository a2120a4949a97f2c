//! SQLite persistence for file and thumbnail rows.
//!
//! Row writes take a `&mut SqliteConnection` so that callers decide the
//! transaction boundary; a file row and its thumbnails are always written
//! through the same transaction.

use crate::models::{
    file::{FileRecord, NewFile},
    thumb::{NewThumb, ThumbRecord},
    user::User,
};
use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;

const FILE_COLUMNS: &str = "id, owner_type, owner_id, name, save_name, save_path, view_url, ext, \
     mime, file_type, size, width, height, md5, storer_name, storer_id, table_id, table_name, \
     field_name, subdir, created_at";

const THUMB_COLUMNS: &str = "id, file_id, size, width, height, save_name, save_path, view_url, md5";

#[derive(Clone)]
pub struct FileRepository {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl FileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn begin(&self) -> sqlx::Result<Transaction<'static, Sqlite>> {
        self.db.begin().await
    }

    pub async fn insert_file(
        conn: &mut SqliteConnection,
        file: &NewFile,
    ) -> sqlx::Result<FileRecord> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (
                owner_type, owner_id, name, save_name, save_path, view_url, ext, mime,
                file_type, size, width, height, md5, storer_name, storer_id, table_id,
                table_name, field_name, subdir, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {FILE_COLUMNS}"
        ))
        .bind(&file.owner_type)
        .bind(file.owner_id)
        .bind(&file.name)
        .bind(&file.save_name)
        .bind(&file.save_path)
        .bind(&file.view_url)
        .bind(&file.ext)
        .bind(&file.mime)
        .bind(&file.file_type)
        .bind(file.size)
        .bind(file.width)
        .bind(file.height)
        .bind(&file.md5)
        .bind(&file.storer_name)
        .bind(&file.storer_id)
        .bind(&file.table_id)
        .bind(&file.table_name)
        .bind(&file.field_name)
        .bind(&file.subdir)
        .bind(Utc::now())
        .fetch_one(conn)
        .await
    }

    pub async fn insert_thumb(
        conn: &mut SqliteConnection,
        thumb: &NewThumb,
    ) -> sqlx::Result<ThumbRecord> {
        sqlx::query_as::<_, ThumbRecord>(&format!(
            "INSERT INTO file_thumbs (
                file_id, size, width, height, save_name, save_path, view_url, md5
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {THUMB_COLUMNS}"
        ))
        .bind(thumb.file_id)
        .bind(thumb.size)
        .bind(thumb.width)
        .bind(thumb.height)
        .bind(&thumb.save_name)
        .bind(&thumb.save_path)
        .bind(&thumb.view_url)
        .bind(&thumb.md5)
        .fetch_one(conn)
        .await
    }

    pub async fn find_file(&self, id: i64) -> sqlx::Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    pub async fn find_file_by_path(&self, save_path: &str) -> sqlx::Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE save_path = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(save_path)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn thumbs_for(&self, file_id: i64) -> sqlx::Result<Vec<ThumbRecord>> {
        sqlx::query_as::<_, ThumbRecord>(&format!(
            "SELECT {THUMB_COLUMNS} FROM file_thumbs WHERE file_id = ? ORDER BY id"
        ))
        .bind(file_id)
        .fetch_all(&*self.db)
        .await
    }

    pub async fn count_files(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&*self.db)
            .await
    }

    pub async fn count_thumbs(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM file_thumbs")
            .fetch_one(&*self.db)
            .await
    }

    pub async fn find_user_by_token(&self, token: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT id, username FROM users WHERE api_token = ?")
            .bind(token)
            .fetch_optional(&*self.db)
            .await
    }

    pub async fn create_user(&self, username: &str, api_token: &str) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, api_token) VALUES (?, ?) RETURNING id, username",
        )
        .bind(username)
        .bind(api_token)
        .fetch_one(&*self.db)
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    /// Repository over a fresh database file inside `dir`.
    pub(crate) async fn repository(dir: &tempfile::TempDir) -> FileRepository {
        let pool = db::connect(&format!(
            "sqlite://{}",
            dir.path().join("test.db").display()
        ))
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();
        FileRepository::new(Arc::new(pool))
    }

    fn new_file(owner_id: i64) -> NewFile {
        NewFile {
            owner_type: "user".into(),
            owner_id,
            name: "a.png".into(),
            save_name: "x.png".into(),
            save_path: "user/0/x.png".into(),
            view_url: "/files/user/0/x.png".into(),
            ext: "png".into(),
            mime: "image/png".into(),
            file_type: "image".into(),
            size: 3,
            md5: "abc".into(),
            storer_name: "local".into(),
            table_id: "0".into(),
            table_name: "user".into(),
            subdir: "user".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rollback_discards_file_and_thumbs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;

        let mut tx = repo.begin().await.unwrap();
        let file = FileRepository::insert_file(&mut tx, &new_file(1)).await.unwrap();
        FileRepository::insert_thumb(
            &mut tx,
            &NewThumb {
                file_id: file.id,
                save_path: "user/0/x_1_1.png".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(repo.count_files().await.unwrap(), 0);
        assert_eq!(repo.count_thumbs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn committed_rows_are_readable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;

        let mut tx = repo.begin().await.unwrap();
        let file = FileRepository::insert_file(&mut tx, &new_file(7)).await.unwrap();
        tx.commit().await.unwrap();

        let found = repo.find_file(file.id).await.unwrap().unwrap();
        assert_eq!(found.owner_id, 7);
        assert_eq!(found.view_url, "/files/user/0/x.png");
        assert_eq!(
            repo.find_file_by_path("user/0/x.png").await.unwrap().unwrap().id,
            file.id
        );
        assert!(repo.thumbs_for(file.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn owner_must_be_positive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;
        let mut conn = repo.db.acquire().await.unwrap();
        assert!(FileRepository::insert_file(&mut conn, &new_file(0)).await.is_err());
    }

    #[tokio::test]
    async fn users_are_found_by_token() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(&dir).await;
        let user = repo.create_user("admin", "secret").await.unwrap();
        assert_eq!(repo.find_user_by_token("secret").await.unwrap().unwrap().id, user.id);
        assert!(repo.find_user_by_token("other").await.unwrap().is_none());
    }
}
