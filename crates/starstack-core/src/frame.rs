use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};

/// Width, height and channel count of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of samples across all channels, `None` on overflow.
    pub fn checked_len(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.channels == 0
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// A planar floating-point image.
///
/// Samples keep the native ADU scale of the source (0..255 for 8-bit data,
/// 0..65535 for 16-bit data); nothing is normalised to [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Pixel data, shape = (channels, height, width)
    pub data: Array3<f32>,
}

impl Frame {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn zeros(shape: ImageShape) -> Self {
        Self::new(Array3::zeros((shape.channels, shape.height, shape.width)))
    }

    pub fn from_elem(shape: ImageShape, value: f32) -> Self {
        Self::new(Array3::from_elem(
            (shape.channels, shape.height, shape.width),
            value,
        ))
    }

    /// Wrap a single-channel array.
    pub fn from_mono(data: Array2<f32>) -> Self {
        Self::new(data.insert_axis(Axis(0)))
    }

    /// Stack per-channel planes into one frame. All planes must share a shape.
    pub fn from_channels(planes: Vec<Array2<f32>>) -> Option<Self> {
        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        ndarray::stack(Axis(0), &views).ok().map(Self::new)
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.width(), self.height(), self.channels())
    }

    pub fn channel(&self, c: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), c)
    }

    pub fn channel_mut(&mut self, c: usize) -> ArrayViewMut2<'_, f32> {
        self.data.index_axis_mut(Axis(0), c)
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Luminance plane: the single channel for mono, BT.601 weights for RGB,
    /// and a plain channel average otherwise.
    pub fn luminance(&self) -> Array2<f32> {
        match self.channels() {
            1 => self.channel(0).to_owned(),
            3 => {
                let mut lum = self.channel(0).mapv(|v| v * LUMINANCE_R);
                lum.scaled_add(LUMINANCE_G, &self.channel(1));
                lum.scaled_add(LUMINANCE_B, &self.channel(2));
                lum
            }
            _ => self
                .data
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array2::zeros((self.height(), self.width()))),
        }
    }

    /// Apply `f` to every channel plane, building a new frame.
    pub fn map_channels<F>(&self, mut f: F) -> Frame
    where
        F: FnMut(ArrayView2<'_, f32>) -> Array2<f32>,
    {
        let planes: Vec<Array2<f32>> = self.data.outer_iter().map(|c| f(c)).collect();
        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        match ndarray::stack(Axis(0), &views) {
            Ok(data) => Frame::new(data),
            Err(_) => self.clone(),
        }
    }
}
