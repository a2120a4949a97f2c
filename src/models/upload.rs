//! In-flight upload types: the parts received from the client and the result
//! of transferring one of them to the storer.

use bytes::Bytes;
use image::ImageFormat;
use serde::Serialize;
use std::{fmt, path::Path, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Audio,
    Archive,
    Document,
    #[default]
    Other,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" => FileType::Image,
            "mp4" | "webm" | "mov" | "avi" | "mkv" | "flv" => FileType::Video,
            "mp3" | "wav" | "ogg" | "flac" | "aac" | "m4a" => FileType::Audio,
            "zip" | "rar" | "7z" | "gz" | "tgz" | "tar" | "bz2" | "xz" => FileType::Archive,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "md" | "csv"
            | "odt" | "ods" => FileType::Document,
            _ => FileType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Audio => "audio",
            FileType::Archive => "archive",
            FileType::Document => "document",
            FileType::Other => "other",
        }
    }

    /// The `filetype` request parameter. Empty and `file` accept anything.
    pub fn parse_declared(value: &str) -> Result<Option<Self>, String> {
        match value.trim() {
            "" | "file" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(FileType::Image),
            "video" => Ok(FileType::Video),
            "audio" => Ok(FileType::Audio),
            "archive" => Ok(FileType::Archive),
            "document" => Ok(FileType::Document),
            "other" => Ok(FileType::Other),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file part of a multipart request.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl IncomingFile {
    /// Lowercase extension without the dot, empty when there is none.
    pub fn extension(&self) -> String {
        extension_of(&self.file_name)
    }
}

pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Outcome of transferring one file to the storer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadResult {
    /// Name the client sent.
    pub file_name: String,
    pub save_name: String,
    pub save_path: String,
    pub file_url: String,
    pub file_type: FileType,
    pub size: u64,
    pub md5: String,
    pub mime: String,
    pub ext: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl UploadResult {
    pub fn from_incoming(file: &IncomingFile) -> Self {
        let ext = file.extension();
        let mime = ImageFormat::from_extension(&ext)
            .map(|f| f.to_mime_type().to_string())
            .or_else(|| file.content_type.clone())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Self {
            file_name: file.file_name.clone(),
            file_type: FileType::from_extension(&ext),
            size: file.data.len() as u64,
            md5: format!("{:x}", md5::compute(&file.data)),
            mime,
            ext,
            ..Default::default()
        }
    }

    pub fn is_image(&self) -> bool {
        self.file_type == FileType::Image
    }

    /// Fill in size and checksum of the payload actually stored.
    pub fn set_payload(&mut self, data: &[u8]) {
        self.size = data.len() as u64;
        self.md5 = format!("{:x}", md5::compute(data));
    }
}
