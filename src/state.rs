//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    registry::{client::ClientRegistry, responder::ResponderRegistry, subdir::SubdirRegistry},
    services::{
        file_repository::FileRepository,
        prepare::UploadPreparer,
        storer::{LocalStorer, Storer},
        thumbnail::{ImageThumbnailer, Thumbnailer},
        watermark::Watermark,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub repo: FileRepository,
    pub storer: Arc<dyn Storer>,
    pub preparer: UploadPreparer,
    pub responders: Arc<ResponderRegistry>,
    pub clients: Arc<ClientRegistry>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
    pub watermark: Option<Watermark>,
    pub login_path: String,
    pub max_upload_bytes: u64,
}

impl AppState {
    /// Wire the default registries and the local storer from `cfg`.
    pub fn new(cfg: &AppConfig, db: Arc<SqlitePool>, watermark: Option<Watermark>) -> Self {
        let storer: Arc<dyn Storer> = Arc::new(LocalStorer::new(&cfg.storage_dir, &cfg.base_url));
        let registry = Arc::new(SubdirRegistry::with_defaults());
        Self {
            repo: FileRepository::new(db),
            preparer: UploadPreparer::new(
                registry,
                storer.clone(),
                cfg.thumb_sizes.clone(),
                cfg.max_upload_bytes,
            ),
            storer,
            responders: Arc::new(ResponderRegistry::with_plain_fields(cfg.plain_fields.clone())),
            clients: Arc::new(ClientRegistry::with_defaults()),
            thumbnailer: Arc::new(ImageThumbnailer),
            watermark,
            login_path: cfg.login_path.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }
}
