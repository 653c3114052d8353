use byteorder::{ByteOrder, LittleEndian};
use ndarray::{Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, StackError};
use crate::frame::{Frame, ImageShape};

/// Sample type of a raw sub or master buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
    F32,
    F64,
}

impl PixelType {
    /// Map a bytes-per-pixel count onto a sample type. Integer data is assumed
    /// for 1 and 2 bytes, floating point for 4 and 8.
    pub fn from_bytes_per_pixel(bytes: usize) -> Result<Self> {
        match bytes {
            1 => Ok(Self::U8),
            2 => Ok(Self::U16),
            4 => Ok(Self::F32),
            8 => Ok(Self::F64),
            other => Err(StackError::UnsupportedPixelType(format!(
                "{other} bytes per pixel"
            ))),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Full-scale value of integer types, used to lift normalised masters.
    pub fn full_scale(self) -> Option<f32> {
        match self {
            Self::U8 => Some(255.0),
            Self::U16 => Some(65535.0),
            Self::F32 | Self::F64 => None,
        }
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

/// A borrowed raw image buffer as delivered by an ingestion source.
///
/// Samples are little-endian. Colour data is planar, as in a FITS cube:
/// every red sample first, then green, then blue.
#[derive(Clone, Copy, Debug)]
pub struct RawImage<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub pixel_type: PixelType,
}

impl<'a> RawImage<'a> {
    pub fn new(
        data: &'a [u8],
        width: usize,
        height: usize,
        channels: usize,
        bytes_per_pixel: usize,
    ) -> Result<Self> {
        Ok(Self {
            data,
            width,
            height,
            channels,
            pixel_type: PixelType::from_bytes_per_pixel(bytes_per_pixel)?,
        })
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.width, self.height, self.channels)
    }
}

/// An owned raw buffer, used by loaders that produce bytes for `RawImage`.
#[derive(Clone, Debug)]
pub struct OwnedRawImage {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub pixel_type: PixelType,
}

impl OwnedRawImage {
    pub fn as_raw(&self) -> RawImage<'_> {
        RawImage {
            data: &self.data,
            width: self.width,
            height: self.height,
            channels: self.channels,
            pixel_type: self.pixel_type,
        }
    }

    /// Encode planar 16-bit samples as a little-endian buffer.
    pub fn from_u16(samples: &[u16], width: usize, height: usize, channels: usize) -> Self {
        let mut data = vec![0u8; samples.len() * 2];
        LittleEndian::write_u16_into(samples, &mut data);
        Self {
            data,
            width,
            height,
            channels,
            pixel_type: PixelType::U16,
        }
    }
}

/// Decode a raw buffer into a float frame.
pub fn decode(raw: &RawImage<'_>) -> Result<Frame> {
    let shape = raw.shape();
    let invalid = || StackError::InvalidDimensions {
        width: raw.width,
        height: raw.height,
        channels: raw.channels,
    };
    if shape.is_empty() || raw.channels > 4 {
        return Err(invalid());
    }
    let samples = shape.checked_len().ok_or_else(invalid)?;
    let expected = samples
        .checked_mul(raw.pixel_type.bytes_per_pixel())
        .ok_or_else(invalid)?;
    if raw.data.len() != expected {
        return Err(StackError::BufferSize {
            expected,
            actual: raw.data.len(),
        });
    }

    let samples = decode_samples(raw.data, raw.pixel_type, samples);

    let data = Array3::from_shape_vec((raw.channels, raw.height, raw.width), samples)
        .map_err(|e| StackError::UnsupportedPixelType(e.to_string()))?;
    Ok(Frame::new(data))
}

fn decode_samples(bytes: &[u8], pixel_type: PixelType, n: usize) -> Vec<f32> {
    match pixel_type {
        PixelType::U8 => bytes.iter().map(|&b| b as f32).collect(),
        PixelType::U16 => {
            let mut tmp = vec![0u16; n];
            LittleEndian::read_u16_into(bytes, &mut tmp);
            tmp.into_iter().map(|v| v as f32).collect()
        }
        PixelType::F32 => {
            let mut tmp = vec![0f32; n];
            LittleEndian::read_f32_into(bytes, &mut tmp);
            tmp
        }
        PixelType::F64 => {
            let mut tmp = vec![0f64; n];
            LittleEndian::read_f64_into(bytes, &mut tmp);
            tmp.into_iter().map(|v| v as f32).collect()
        }
    }
}

/// Shrink a frame by an integer factor, averaging each `factor x factor` block.
///
/// Trailing rows/columns that do not fill a whole block are dropped.
pub fn downscale_area(frame: &Frame, factor: usize) -> Result<Frame> {
    if factor <= 1 {
        return Ok(frame.clone());
    }
    let (c, h, w) = frame.data.dim();
    let (oh, ow) = (h / factor, w / factor);
    if oh == 0 || ow == 0 {
        return Err(StackError::InvalidDimensions {
            width: ow,
            height: oh,
            channels: c,
        });
    }

    let inv = 1.0 / (factor * factor) as f32;
    let shrink_plane = |plane: ndarray::ArrayView2<'_, f32>| {
        let mut out = ndarray::Array2::<f32>::zeros((oh, ow));
        for row in 0..oh {
            for col in 0..ow {
                let block = plane.slice(ndarray::s![
                    row * factor..(row + 1) * factor,
                    col * factor..(col + 1) * factor
                ]);
                out[[row, col]] = block.sum() * inv;
            }
        }
        out
    };

    let planes: Vec<ndarray::Array2<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        frame
            .data
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(shrink_plane)
            .collect()
    } else {
        frame.data.axis_iter(Axis(0)).map(shrink_plane).collect()
    };

    Frame::from_channels(planes).ok_or(StackError::EmptySequence)
}
