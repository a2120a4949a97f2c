//! Per-request upload preparation.
//!
//! `UploadPreparer::prepare` turns the `type` route parameter into a
//! `PreparedUpload`: the resolved category and field binding, the storer,
//! the thumbnail policy and the per-file validator. Checkin then fixes the
//! save-path prefix and default name for the request.

use crate::{
    errors::UploadError,
    models::{
        file::NewFile,
        upload::{FileType, IncomingFile},
    },
    registry::subdir::{CheckinContext, SubdirDescriptor, SubdirInfo, SubdirRegistry},
    services::{storer::Storer, thumbnail::ThumbSize},
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Extensions that are never stored, whatever the category.
const DENIED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "sh", "php", "phtml", "js", "html", "htm", "jsp", "asp", "aspx",
    "cgi", "pl", "py", "dll", "so",
];

/// Owner type recorded for uploads made through the admin endpoint.
pub const OWNER_TYPE_USER: &str = "user";

/// Per-file check run before anything is written.
pub trait UploadValidator: Send + Sync {
    fn validate(&self, file: &IncomingFile) -> Result<(), UploadError>;
}

#[derive(Clone)]
pub struct UploadPreparer {
    registry: Arc<SubdirRegistry>,
    storer: Arc<dyn Storer>,
    default_thumb_sizes: Vec<ThumbSize>,
    max_bytes: u64,
}

impl UploadPreparer {
    pub fn new(
        registry: Arc<SubdirRegistry>,
        storer: Arc<dyn Storer>,
        default_thumb_sizes: Vec<ThumbSize>,
        max_bytes: u64,
    ) -> Self {
        Self {
            registry,
            storer,
            default_thumb_sizes,
            max_bytes,
        }
    }

    /// Resolve `upload_type` (`category` or `category.field`) and the
    /// declared `filetype` parameter.
    pub fn prepare(&self, upload_type: &str, file_type: &str) -> Result<PreparedUpload, UploadError> {
        let binding = SubdirDescriptor::parse(upload_type)?;
        let declared = FileType::parse_declared(file_type).map_err(UploadError::UnknownFileType)?;

        if !self.registry.is_allowed(&binding.table, None) {
            return Err(UploadError::NotAllowed(binding.table));
        }
        let subdir = self
            .registry
            .get(&binding.table)
            .ok_or_else(|| UploadError::NotAllowed(binding.table.clone()))?;
        if !subdir.accepts_field(binding.field_name()) {
            return Err(UploadError::InvalidField {
                subdir: subdir.key,
                field: binding.field_name().to_string(),
            });
        }

        let thumb_sizes = if subdir.thumb_sizes.is_empty() {
            self.default_thumb_sizes.clone()
        } else {
            subdir.thumb_sizes.clone()
        };
        debug!(subdir = %subdir.key, field = binding.field_name(), ?declared, "upload prepared");

        Ok(PreparedUpload {
            subdir,
            binding,
            declared,
            storer: self.storer.clone(),
            thumb_sizes,
            max_bytes: self.max_bytes,
        })
    }
}

pub struct PreparedUpload {
    pub subdir: SubdirInfo,
    pub binding: SubdirDescriptor,
    /// `None` accepts every file type.
    pub declared: Option<FileType>,
    storer: Arc<dyn Storer>,
    thumb_sizes: Vec<ThumbSize>,
    max_bytes: u64,
}

/// Where files of one request are saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkin {
    /// `{category}/{refid}/`, with `0` for unbound uploads.
    pub subdir: String,
    /// Fixed base name; empty means a unique name per file.
    pub name: String,
}

impl Checkin {
    /// `subdir + (name or a unique id) + .ext`
    pub fn save_filename(&self, original: &str) -> String {
        save_filename(&self.subdir, &self.name, original)
    }
}

pub fn save_filename(subdir: &str, name: &str, original: &str) -> String {
    let ext = crate::models::upload::extension_of(original);
    let base = if name.is_empty() {
        Uuid::new_v4().simple().to_string()
    } else {
        name.to_string()
    };
    if ext.is_empty() {
        format!("{subdir}{base}")
    } else {
        format!("{subdir}{base}.{ext}")
    }
}

impl PreparedUpload {
    pub fn storer(&self) -> Arc<dyn Storer> {
        self.storer.clone()
    }

    pub fn field_name(&self) -> &str {
        self.binding.field_name()
    }

    pub fn thumb_sizes(&self) -> &[ThumbSize] {
        &self.thumb_sizes
    }

    /// Row template shared by every file of the request.
    pub fn new_file(&self, owner_id: i64, refid: Option<&str>) -> NewFile {
        let info = self.storer.info();
        NewFile {
            owner_type: OWNER_TYPE_USER.to_string(),
            owner_id,
            storer_name: info.name,
            storer_id: info.id,
            table_id: refid.unwrap_or("0").to_string(),
            table_name: self.subdir.table_name.clone(),
            field_name: self.field_name().to_string(),
            subdir: self.subdir.key.clone(),
            file_type: self
                .declared
                .map(|t| t.to_string())
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Run the category checker and fix the save location for `file`.
    ///
    /// With a refid and a named field the file gets a fixed name (one file
    /// per row and field); otherwise every file gets a unique name.
    pub fn checkin(&self, file: &NewFile) -> Result<Checkin, UploadError> {
        let refid = Some(file.table_id.as_str()).filter(|id| !id.is_empty() && *id != "0");
        if let Some(id) = refid {
            if !id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
            {
                return Err(UploadError::Checkin(format!("invalid refid `{id}`")));
            }
        }
        if let Some(checker) = &self.subdir.checker {
            checker
                .check(&CheckinContext {
                    owner_type: &file.owner_type,
                    owner_id: file.owner_id,
                    field: &file.field_name,
                    refid,
                })
                .map_err(UploadError::Checkin)?;
        }

        let name = match (refid, self.field_name()) {
            (Some(_), field) if !field.is_empty() => field.to_string(),
            _ => String::new(),
        };
        Ok(Checkin {
            subdir: format!("{}/{}/", self.subdir.key, refid.unwrap_or("0")),
            name,
        })
    }
}

impl UploadValidator for PreparedUpload {
    fn validate(&self, file: &IncomingFile) -> Result<(), UploadError> {
        let invalid = |reason: &str| UploadError::Invalid {
            file: file.file_name.clone(),
            reason: reason.to_string(),
        };
        if file.file_name.is_empty() {
            return Err(invalid("missing file name"));
        }
        if file.data.is_empty() {
            return Err(invalid("empty file"));
        }
        if file.data.len() as u64 > self.max_bytes {
            return Err(UploadError::TooLarge {
                file: file.file_name.clone(),
                limit: self.max_bytes,
            });
        }

        let ext = file.extension();
        let unsupported = || UploadError::UnsupportedType {
            file: file.file_name.clone(),
            ext: ext.clone(),
        };
        if ext.is_empty() || DENIED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(unsupported());
        }
        let detected = FileType::from_extension(&ext);
        if self.declared.is_some_and(|declared| declared != detected) {
            return Err(unsupported());
        }
        if detected == FileType::Image && super::thumbnail::dimensions(&file.data).is_none() {
            return Err(invalid("not a readable image"));
        }
        Ok(())
    }
}
