//! Response shaping for batch uploads.
//!
//! A responder turns `(error, urls)` into a JSON map and decides whether the
//! map is sent as is or embedded into the standard envelope. Responders are
//! registered per upload field, so plain AJAX forms and embedding callers can
//! share one endpoint.

use crate::errors::{AppError, UploadError};
use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

pub type Body = Map<String, Value>;

pub trait Responder: Send + Sync {
    /// Returns the response map and whether it should be embedded.
    fn respond(&self, field: &str, err: Option<&UploadError>, urls: &[String]) -> (Body, bool);
}

/// Default: `{"files": [...]}` inside the envelope; errors become error
/// responses.
pub struct EnvelopeResponder;

impl Responder for EnvelopeResponder {
    fn respond(&self, _field: &str, err: Option<&UploadError>, urls: &[String]) -> (Body, bool) {
        let mut body = Body::new();
        match err {
            Some(err) => {
                body.insert("error".into(), Value::String(err.to_string()));
            }
            None => {
                body.insert("files".into(), json!(urls));
            }
        }
        (body, true)
    }
}

/// Bare JSON for simple AJAX forms: `{"success", "files"}` or
/// `{"success", "error", "files"}`.
pub struct PlainJsonResponder;

impl Responder for PlainJsonResponder {
    fn respond(&self, field: &str, err: Option<&UploadError>, urls: &[String]) -> (Body, bool) {
        let mut body = Body::new();
        body.insert("success".into(), Value::Bool(err.is_none()));
        body.insert("field".into(), Value::String(field.to_string()));
        body.insert("files".into(), json!(urls));
        if let Some(err) = err {
            body.insert("error".into(), Value::String(err.to_string()));
        }
        (body, false)
    }
}

pub struct ResponderRegistry {
    default: Arc<dyn Responder>,
    by_field: RwLock<HashMap<String, Arc<dyn Responder>>>,
}

impl Default for ResponderRegistry {
    fn default() -> Self {
        Self::new(Arc::new(EnvelopeResponder))
    }
}

impl ResponderRegistry {
    pub fn new(default: Arc<dyn Responder>) -> Self {
        Self {
            default,
            by_field: RwLock::new(HashMap::new()),
        }
    }

    /// Registry where every field in `plain_fields` answers with bare JSON.
    pub fn with_plain_fields<I, S>(plain_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::default();
        let plain: Arc<dyn Responder> = Arc::new(PlainJsonResponder);
        for field in plain_fields {
            registry.register(field, plain.clone());
        }
        registry
    }

    pub fn register(&self, field: impl Into<String>, responder: Arc<dyn Responder>) {
        self.by_field
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(field.into(), responder);
    }

    pub fn get(&self, field: &str) -> Arc<dyn Responder> {
        self.by_field
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(field)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn respond(&self, field: &str, err: Option<&UploadError>, urls: &[String]) -> (Body, bool) {
        self.get(field).respond(field, err, urls)
    }
}

/// Final HTTP rendering of a responder's output.
///
/// Bare maps are sent as JSON. Embedded maps are wrapped into the standard
/// `Code/State/Info/Data` envelope, unless there was an error, in which case
/// the error itself is the response.
pub fn render(body: Body, embed: bool, err: Option<UploadError>) -> Response {
    if !embed {
        return Json(body).into_response();
    }
    if let Some(err) = err {
        return AppError::from(err).into_response();
    }
    Json(json!({
        "Code": 1,
        "State": "Success",
        "Info": "",
        "Data": body,
    }))
    .into_response()
}
