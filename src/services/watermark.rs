use crate::services::thumbnail::{ThumbnailError, decode, encode};
use image::{DynamicImage, GenericImageView, RgbaImage, imageops};
use std::{path::Path, str::FromStr, sync::Arc};

/// Images smaller than this on either side are left unmarked.
const MIN_MARKED_SIDE: u32 = 64;
/// Watermark width relative to the image width, in percent.
const RELATIVE_WIDTH: f32 = 20.0;
const MARGIN: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

impl FromStr for WatermarkPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            "center" => Ok(Self::Center),
            other => Err(format!("unknown watermark position `{other}`")),
        }
    }
}

/// A watermark overlay applied to stored images and their thumbnails.
#[derive(Debug, Clone)]
pub struct Watermark {
    mark: Arc<RgbaImage>,
    position: WatermarkPosition,
    opacity: f32,
}

impl Watermark {
    pub fn new(mark: DynamicImage, position: WatermarkPosition, opacity: f32) -> Self {
        let opacity = opacity.clamp(0.0, 1.0);
        let mut mark = mark.to_rgba8();
        if opacity < 1.0 {
            for pixel in mark.pixels_mut() {
                pixel[3] = (pixel[3] as f32 * opacity) as u8;
            }
        }
        Self {
            mark: Arc::new(mark),
            position,
            opacity,
        }
    }

    pub fn load(
        path: impl AsRef<Path>,
        position: WatermarkPosition,
        opacity: f32,
    ) -> Result<Self, ThumbnailError> {
        let mark = image::open(path)?;
        Ok(Self::new(mark, position, opacity))
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn apply(&self, img: DynamicImage) -> DynamicImage {
        let (img_w, img_h) = img.dimensions();
        if img_w < MIN_MARKED_SIDE || img_h < MIN_MARKED_SIDE {
            return img;
        }

        let (mark_w, mark_h) = self.mark.dimensions();
        let target_w = ((img_w as f32 * RELATIVE_WIDTH / 100.0).round() as u32)
            .clamp(1, mark_w.max(1));
        let target_h = ((mark_h as f32 * target_w as f32 / mark_w.max(1) as f32).round() as u32)
            .clamp(1, img_h);
        let mark = if (target_w, target_h) == (mark_w, mark_h) {
            (*self.mark).clone()
        } else {
            imageops::resize(
                &*self.mark,
                target_w,
                target_h,
                imageops::FilterType::Triangle,
            )
        };

        let free_w = img_w as i64 - target_w as i64;
        let free_h = img_h as i64 - target_h as i64;
        let (x, y) = match self.position {
            WatermarkPosition::TopLeft => (MARGIN, MARGIN),
            WatermarkPosition::TopRight => (free_w - MARGIN, MARGIN),
            WatermarkPosition::BottomLeft => (MARGIN, free_h - MARGIN),
            WatermarkPosition::BottomRight => (free_w - MARGIN, free_h - MARGIN),
            WatermarkPosition::Center => (free_w / 2, free_h / 2),
        };

        let mut canvas = img.to_rgba8();
        imageops::overlay(&mut canvas, &mark, x.max(0), y.max(0));
        DynamicImage::ImageRgba8(canvas)
    }

    /// Decode, mark and re-encode an uploaded image in its own format.
    pub fn stamp_encoded(&self, source: &[u8], ext: &str) -> Result<Vec<u8>, ThumbnailError> {
        let img = decode(source)?;
        encode(self.apply(img), ext)
    }
}
