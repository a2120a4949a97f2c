//! Upload orchestration: validate, name, store, then record.
//!
//! Every stored file goes through `UploadCompletion::complete`, which writes
//! the file row and, for images, all thumbnails inside one transaction. If
//! any step fails the transaction is rolled back and every payload created
//! for that file is removed again, so a file either exists with all of its
//! thumbnails or not at all. Payloads are never stored over an existing
//! original, so a rollback cannot remove files that belong to another row.

use crate::{
    errors::UploadError,
    models::{
        file::{FileRecord, NewFile},
        thumb::NewThumb,
        upload::{IncomingFile, UploadResult},
    },
    services::{
        file_repository::FileRepository,
        prepare::{Checkin, UploadValidator},
        storer::Storer,
        thumbnail::{ThumbSize, Thumbnailer, add_suffix, dimensions},
        watermark::Watermark,
    },
};
use bytes::Bytes;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{info, warn};

/// Post-transfer step shared by single-client and batch uploads.
pub struct UploadCompletion<'a> {
    pub repo: &'a FileRepository,
    pub storer: &'a Arc<dyn Storer>,
    pub thumbnailer: &'a Arc<dyn Thumbnailer>,
    pub thumb_sizes: &'a [ThumbSize],
    pub watermark: Option<&'a Watermark>,
}

impl UploadCompletion<'_> {
    /// Record `result` (already stored) and derive its thumbnails.
    pub async fn complete(
        &self,
        template: &NewFile,
        result: &UploadResult,
        original: &Bytes,
    ) -> Result<FileRecord, UploadError> {
        let mut written = Vec::new();
        match self.record(template, result, original, &mut written).await {
            Ok(record) => {
                info!(
                    file_id = record.id,
                    path = %record.save_path,
                    thumbs = written.len(),
                    "upload recorded"
                );
                Ok(record)
            }
            Err(err) => {
                warn!(path = %result.save_path, error = %err, "upload rolled back");
                written.push(result.save_path.clone());
                for path in &written {
                    if let Err(e) = self.storer.delete(path).await {
                        warn!(path = %path, error = %e, "cleanup after rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    async fn record(
        &self,
        template: &NewFile,
        result: &UploadResult,
        original: &Bytes,
        written: &mut Vec<String>,
    ) -> Result<FileRecord, UploadError> {
        let mut file = template.clone();
        file.set_by_upload_result(result);

        let mut tx = self.repo.begin().await?;
        let record = FileRepository::insert_file(&mut tx, &file).await?;
        if !result.is_image() {
            tx.commit().await?;
            return Ok(record);
        }

        for size in self.thumb_sizes {
            // dropping `tx` on error rolls back the file row and earlier thumbs
            self.thumbnail(&mut tx, &record, result, original, *size, written)
                .await?;
        }
        tx.commit().await?;
        Ok(record)
    }

    async fn thumbnail(
        &self,
        conn: &mut SqliteConnection,
        record: &FileRecord,
        result: &UploadResult,
        original: &Bytes,
        size: ThumbSize,
        written: &mut Vec<String>,
    ) -> Result<(), UploadError> {
        let thumb_url = add_suffix(&result.file_url, &size.suffix());
        let dest = self.storer.url_to_path(&thumb_url);
        let existed = self.storer.exists(&dest).await?;

        // every crop reads the original from its first byte
        let source = original.clone();
        let thumbnailer = self.thumbnailer.clone();
        let ext = result.ext.clone();
        let watermark = self.watermark.cloned();
        let thumb = tokio::task::spawn_blocking(move || {
            thumbnailer.crop(&source, &ext, size, watermark.as_ref())
        })
        .await??;

        let md5 = format!("{:x}", md5::compute(&thumb.data));
        let byte_len = thumb.data.len() as i64;
        let view_url = self
            .storer
            .put(&dest, Bytes::from(thumb.data), true)
            .await?;
        if !existed {
            written.push(dest.clone());
        }

        FileRepository::insert_thumb(
            conn,
            &NewThumb {
                file_id: record.id,
                size: byte_len,
                width: thumb.width as i64,
                height: thumb.height as i64,
                save_name: file_name_of(&dest).to_string(),
                save_path: dest,
                view_url,
                md5,
            },
        )
        .await?;
        Ok(())
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Validate → name → store → complete, for one or many files.
pub struct UploadPipeline<'a> {
    pub validator: &'a dyn UploadValidator,
    pub checkin: &'a Checkin,
    pub template: &'a NewFile,
    pub completion: UploadCompletion<'a>,
}

impl UploadPipeline<'_> {
    /// Transfer one file. An existing target yields `UploadError::ExistsFile`
    /// before anything is stored or recorded.
    pub async fn upload_one(&self, file: &IncomingFile) -> Result<UploadResult, UploadError> {
        self.validator.validate(file)?;
        let save_path = self.checkin.save_filename(&file.file_name);
        let result = self.store(file, save_path).await?;
        self.completion
            .complete(self.template, &result, &file.data)
            .await?;
        Ok(result)
    }

    /// Upload `files` in order. A file whose fixed name is already taken
    /// reports the stored file. Stops at the first failure and returns the
    /// results gathered so far together with that failure.
    pub async fn upload_batch(
        &self,
        files: &[IncomingFile],
    ) -> (Vec<UploadResult>, Option<UploadError>) {
        if files.is_empty() {
            return (Vec::new(), Some(UploadError::NoFiles));
        }
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            match self.upload_one(file).await {
                Ok(result) => results.push(result),
                Err(UploadError::ExistsFile(path)) => {
                    info!(path = %path, "file already stored");
                    results.push(self.existing(file, path));
                }
                Err(err) => return (results, Some(err)),
            }
        }
        (results, None)
    }

    /// Result describing the file already stored at `path` for `file`.
    pub fn existing(&self, file: &IncomingFile, path: String) -> UploadResult {
        let mut result = UploadResult::from_incoming(file);
        result.file_url = self.completion.storer.public_url(&path);
        result.save_name = file_name_of(&path).to_string();
        result.save_path = path;
        result
    }

    async fn store(
        &self,
        file: &IncomingFile,
        save_path: String,
    ) -> Result<UploadResult, UploadError> {
        let mut result = UploadResult::from_incoming(file);
        let mut payload = file.data.clone();

        if result.is_image() {
            if let Some((width, height)) = dimensions(&file.data) {
                result.width = Some(width);
                result.height = Some(height);
            }
            if let Some(watermark) = self.completion.watermark.cloned() {
                let source = file.data.clone();
                let ext = result.ext.clone();
                let marked = tokio::task::spawn_blocking(move || {
                    watermark.stamp_encoded(&source, &ext)
                })
                .await??;
                payload = Bytes::from(marked);
            }
        }

        result.set_payload(&payload);
        result.file_url = self
            .completion
            .storer
            .put(&save_path, payload, false)
            .await?;
        result.save_name = file_name_of(&save_path).to_string();
        result.save_path = save_path;
        Ok(result)
    }
}
