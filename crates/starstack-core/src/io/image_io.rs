use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};

use crate::error::{Result, StackError};
use crate::io::raw::OwnedRawImage;
use crate::pipeline::output::{ChannelLayout, OutputImage};

/// Save an output buffer as a 16-bit TIFF (mono or RGB).
pub fn save_tiff(output: &OutputImage, path: &Path) -> Result<()> {
    let (w, h) = (output.width as u32, output.height as u32);
    let pixels = output.to_layout(ChannelLayout::Interleaved);

    match output.channels {
        1 => {
            let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w, h, pixels)
                .ok_or_else(|| size_error(output))?;
            img.save_with_format(path, ImageFormat::Tiff)?;
        }
        3 => {
            let img = ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w, h, pixels)
                .ok_or_else(|| size_error(output))?;
            img.save_with_format(path, ImageFormat::Tiff)?;
        }
        n => return Err(unsupported_channels(output, n)),
    }
    Ok(())
}

/// Save an output buffer as an 8-bit PNG, scaled so the brightest sample is white.
pub fn save_png(output: &OutputImage, path: &Path) -> Result<()> {
    let (w, h) = (output.width as u32, output.height as u32);
    let pixels = output.to_layout(ChannelLayout::Interleaved);
    let peak = pixels.iter().copied().max().unwrap_or(0).max(1) as f32;
    let bytes: Vec<u8> = pixels
        .iter()
        .map(|&v| ((v as f32 / peak) * 255.0).round() as u8)
        .collect();

    match output.channels {
        1 => {
            let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(w, h, bytes)
                .ok_or_else(|| size_error(output))?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
        3 => {
            let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(w, h, bytes)
                .ok_or_else(|| size_error(output))?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
        n => return Err(unsupported_channels(output, n)),
    }
    Ok(())
}

/// Save an output buffer, choosing format from file extension.
pub fn save_image(output: &OutputImage, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(output, path),
        _ => save_tiff(output, path),
    }
}

/// Load an image file as a 16-bit raw sub buffer.
///
/// Grayscale sources give one channel, everything else is converted to
/// planar RGB.
pub fn load_raw_image(path: &Path) -> Result<OwnedRawImage> {
    let img = image::open(path)?;
    let (w, h) = (img.width() as usize, img.height() as usize);

    let raw = match &img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_) => {
            OwnedRawImage::from_u16(img.to_luma16().as_raw(), w, h, 1)
        }
        _ => {
            let interleaved = img.to_rgb16();
            let plane = w * h;
            let mut planar = vec![0u16; plane * 3];
            for (i, px) in interleaved.as_raw().chunks_exact(3).enumerate() {
                planar[i] = px[0];
                planar[plane + i] = px[1];
                planar[2 * plane + i] = px[2];
            }
            OwnedRawImage::from_u16(&planar, w, h, 3)
        }
    };
    Ok(raw)
}

fn size_error(output: &OutputImage) -> StackError {
    StackError::BufferSize {
        expected: output.width * output.height * output.channels,
        actual: output.pixels.len(),
    }
}

fn unsupported_channels(output: &OutputImage, channels: usize) -> StackError {
    StackError::InvalidDimensions {
        width: output.width,
        height: output.height,
        channels,
    }
}
