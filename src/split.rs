use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::error::{Error, Result};

/// Split a two-page scan at the horizontal midpoint.
///
/// Left half is columns `[0, width / 2)`, right half `[width / 2, width)`.
/// Both halves are re-encoded as JPEG.
pub fn split_halves(image_bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| Error::Classification(format!("cannot decode image: {}", e)))?;
    let (width, height) = img.dimensions();
    if width < 2 || height == 0 {
        return Err(Error::Classification(format!(
            "image {}x{} is too small to split",
            width, height
        )));
    }

    let mid = width / 2;
    let left = img.crop_imm(0, 0, mid, height);
    let right = img.crop_imm(mid, 0, width - mid, height);
    Ok((encode_jpeg(&left)?, encode_jpeg(&right)?))
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    rgb.write_to(&mut cursor, ImageFormat::Jpeg)
        .map_err(|e| Error::Classification(format!("cannot encode image half: {}", e)))?;
    Ok(cursor.into_inner())
}
