//! Thumbnail cropping.

use crate::services::watermark::Watermark;
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use serde::Serialize;
use std::{fmt, io::Cursor, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("invalid thumbnail size `{0}`, expected WIDTHxHEIGHT")]
    InvalidSize(String),
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("thumbnail {width}x{height} failed: {reason}")]
    Crop {
        width: u32,
        height: u32,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThumbSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a comma separated list such as `200x200, 400x300`.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ThumbnailError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    /// `_{width}_{height}`, appended to the file stem of the original.
    pub fn suffix(&self) -> String {
        format!("_{}_{}", self.width, self.height)
    }
}

impl FromStr for ThumbSize {
    type Err = ThumbnailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ThumbnailError::InvalidSize(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for ThumbSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Insert `suffix` between the file stem and the extension of the last path
/// segment: `a/b.jpg` + `_1_2` -> `a/b_1_2.jpg`.
pub fn add_suffix(url: &str, suffix: &str) -> String {
    let name_start = url.rfind('/').map_or(0, |i| i + 1);
    match url[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = name_start + dot;
            format!("{}{}{}", &url[..dot], suffix, &url[dot..])
        }
        _ => format!("{url}{suffix}"),
    }
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Produces one cropped thumbnail from the original payload.
pub trait Thumbnailer: Send + Sync {
    fn crop(
        &self,
        source: &[u8],
        ext: &str,
        size: ThumbSize,
        watermark: Option<&Watermark>,
    ) -> Result<Thumbnail, ThumbnailError>;
}

/// Center crop to fill the requested box, encoded in the original's format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumbnailer;

impl Thumbnailer for ImageThumbnailer {
    fn crop(
        &self,
        source: &[u8],
        ext: &str,
        size: ThumbSize,
        watermark: Option<&Watermark>,
    ) -> Result<Thumbnail, ThumbnailError> {
        let img = decode(source)?;
        let mut thumb = img.resize_to_fill(size.width, size.height, FilterType::Lanczos3);
        if let Some(wm) = watermark {
            thumb = wm.apply(thumb);
        }
        let (width, height) = (thumb.width(), thumb.height());
        Ok(Thumbnail {
            data: encode(thumb, ext)?,
            width,
            height,
        })
    }
}

pub(crate) fn decode(source: &[u8]) -> Result<DynamicImage, ThumbnailError> {
    Ok(ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()?)
}

/// Pixel dimensions without decoding the whole image.
pub fn dimensions(source: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Encode in the format matching `ext`, PNG when unknown.
pub(crate) fn encode(img: DynamicImage, ext: &str) -> Result<Vec<u8>, ThumbnailError> {
    let format = ImageFormat::from_extension(ext)
        .filter(|f| {
            matches!(
                f,
                ImageFormat::Jpeg
                    | ImageFormat::Png
                    | ImageFormat::Gif
                    | ImageFormat::WebP
                    | ImageFormat::Bmp
            )
        })
        .unwrap_or(ImageFormat::Png);
    let img = match format {
        ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgb8(img.to_rgb8()),
        ImageFormat::Gif | ImageFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => img,
    };
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)?;
    Ok(buf)
}
