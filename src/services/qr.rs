//! QR payload extraction for the `deqr` pipe.

use crate::services::thumbnail::{ThumbnailError, decode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrError {
    #[error(transparent)]
    Image(#[from] ThumbnailError),
    #[error("no QR code found")]
    NotFound,
    #[error("QR code could not be decoded: {0}")]
    Decode(String),
}

/// Decode the first QR code found in an encoded image.
pub fn decode_qr(source: &[u8]) -> Result<String, QrError> {
    let luma = decode(source)?.to_luma8();
    let (width, height) = luma.dimensions();
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
            luma.get_pixel(x as u32, y as u32).0[0]
        });
    let grid = prepared
        .detect_grids()
        .into_iter()
        .next()
        .ok_or(QrError::NotFound)?;
    let (_meta, content) = grid.decode().map_err(|e| QrError::Decode(format!("{e:?}")))?;
    Ok(content)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use qrcode::{Color, QrCode};
    use std::io::Cursor;

    /// PNG rendering of `text` with a 4 module quiet zone.
    pub(crate) fn qr_png(text: &str) -> Vec<u8> {
        const SCALE: u32 = 8;
        const QUIET: u32 = 4;
        let code = QrCode::new(text.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let side = (modules + 2 * QUIET) * SCALE;
        let img = GrayImage::from_fn(side, side, |x, y| {
            let (mx, my) = (x / SCALE, y / SCALE);
            if mx < QUIET || my < QUIET || mx >= modules + QUIET || my >= modules + QUIET {
                return Luma([255]);
            }
            let idx = ((my - QUIET) * modules + (mx - QUIET)) as usize;
            match colors[idx] {
                Color::Dark => Luma([0]),
                Color::Light => Luma([255]),
            }
        });
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decodes_generated_code() {
        let png = qr_png("https://example.com/pay?id=42");
        assert_eq!(decode_qr(&png).unwrap(), "https://example.com/pay?id=42");
    }

    #[test]
    fn plain_image_has_no_code() {
        let png = crate::services::thumbnail::tests::png(64, 64);
        assert!(matches!(decode_qr(&png).unwrap_err(), QrError::NotFound));
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(decode_qr(b"nope").unwrap_err(), QrError::Image(_)));
    }
}
