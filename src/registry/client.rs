//! Named upload clients for single-file mode.
//!
//! Rich-text editors and upload widgets each post their file under their own
//! multipart field name and expect their own answer format. A client bundles
//! both.

use crate::{errors::UploadError, models::upload::UploadResult};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

pub trait UploadClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Multipart field holding the file.
    fn field_name(&self) -> &'static str;

    fn respond(&self, result: Option<&UploadResult>, err: Option<&UploadError>) -> Response;
}

fn url_and_name(result: Option<&UploadResult>) -> (&str, &str) {
    result.map_or(("", ""), |r| (r.file_url.as_str(), r.file_name.as_str()))
}

/// WebUploader style `{"Code", "Info", "Data"}` answers.
pub struct WebUploaderClient;

impl UploadClient for WebUploaderClient {
    fn name(&self) -> &'static str {
        "webuploader"
    }

    fn field_name(&self) -> &'static str {
        "file"
    }

    fn respond(&self, result: Option<&UploadResult>, err: Option<&UploadError>) -> Response {
        let (url, name) = url_and_name(result);
        let body = match err {
            Some(err) => json!({ "Code": 0, "Info": err.to_string(), "Data": null }),
            None => json!({ "Code": 1, "Info": "", "Data": { "url": url, "name": name } }),
        };
        Json(body).into_response()
    }
}

/// editor.md image dialog.
pub struct MarkdownClient;

impl UploadClient for MarkdownClient {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn field_name(&self) -> &'static str {
        "editormd-image-file"
    }

    fn respond(&self, result: Option<&UploadResult>, err: Option<&UploadError>) -> Response {
        let (url, _) = url_and_name(result);
        let body = match err {
            Some(err) => json!({ "success": 0, "message": err.to_string() }),
            None => json!({ "success": 1, "message": "", "url": url }),
        };
        Json(body).into_response()
    }
}

/// CKEditor upload adapter.
pub struct CkEditorClient;

impl UploadClient for CkEditorClient {
    fn name(&self) -> &'static str {
        "ckeditor"
    }

    fn field_name(&self) -> &'static str {
        "upload"
    }

    fn respond(&self, result: Option<&UploadResult>, err: Option<&UploadError>) -> Response {
        let (url, name) = url_and_name(result);
        let body = match err {
            Some(err) => json!({ "uploaded": 0, "error": { "message": err.to_string() } }),
            None => json!({ "uploaded": 1, "fileName": name, "url": url }),
        };
        Json(body).into_response()
    }
}

/// Dropzone reads failures from the status code.
pub struct DropzoneClient;

impl UploadClient for DropzoneClient {
    fn name(&self) -> &'static str {
        "dropzone"
    }

    fn field_name(&self) -> &'static str {
        "file"
    }

    fn respond(&self, result: Option<&UploadResult>, err: Option<&UploadError>) -> Response {
        match err {
            Some(err) => (err.status(), Json(json!({ "error": err.to_string() }))).into_response(),
            None => {
                let (url, name) = url_and_name(result);
                (StatusCode::OK, Json(json!({ "url": url, "name": name }))).into_response()
            }
        }
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<&'static str, Arc<dyn UploadClient>>,
}

impl ClientRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(WebUploaderClient));
        registry.register(Arc::new(MarkdownClient));
        registry.register(Arc::new(CkEditorClient));
        registry.register(Arc::new(DropzoneClient));
        registry
    }

    pub fn register(&mut self, client: Arc<dyn UploadClient>) {
        self.clients.insert(client.name(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UploadClient>> {
        self.clients.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered_by_name() {
        let registry = ClientRegistry::with_defaults();
        assert_eq!(registry.get("markdown").unwrap().field_name(), "editormd-image-file");
        assert_eq!(registry.get("ckeditor").unwrap().field_name(), "upload");
        assert!(registry.get("tinymce").is_none());
    }

    #[test]
    fn dropzone_uses_error_status() {
        let resp = DropzoneClient.respond(None, Some(&UploadError::NoFiles));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let editor = MarkdownClient.respond(None, Some(&UploadError::NoFiles));
        assert_eq!(editor.status(), StatusCode::OK);
    }
}
