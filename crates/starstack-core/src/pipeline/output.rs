use serde::{Deserialize, Serialize};

use crate::consts::OUTPUT_MAX;
use crate::frame::Frame;

/// Sample order of a multi-channel output buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// All samples of channel 0, then channel 1, ... (FITS cube order).
    #[default]
    Planar,
    /// `RGBRGB...`
    Interleaved,
}

/// Colour filter array layout of the sensor that produced the subs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BayerInfo {
    /// Pattern name as written to image headers, e.g. `RGGB`.
    pub pattern: String,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// A fixed-depth composite ready for an image encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputImage {
    pub pixels: Vec<u16>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bit_depth: u8,
    pub layout: ChannelLayout,
    pub bayer: Option<BayerInfo>,
}

impl OutputImage {
    /// Convert a float composite to 16 bits.
    ///
    /// Samples are rounded and clamped to `[0, 65535]`. If the brightest sample
    /// exceeds that range the whole image is scaled down to fit.
    pub fn from_frame(frame: &Frame, layout: ChannelLayout, bayer: Option<BayerInfo>) -> Self {
        let max = frame.max_value();
        let scale = if max.is_finite() && max > OUTPUT_MAX {
            OUTPUT_MAX / max
        } else {
            1.0
        };
        let convert = |v: f32| -> u16 {
            if v.is_finite() {
                (v * scale).round().clamp(0.0, OUTPUT_MAX) as u16
            } else {
                0
            }
        };

        let pixels: Vec<u16> = match layout {
            ChannelLayout::Planar => frame.data.iter().map(|&v| convert(v)).collect(),
            ChannelLayout::Interleaved => frame
                .data
                .view()
                .permuted_axes([1, 2, 0])
                .iter()
                .map(|&v| convert(v))
                .collect(),
        };

        Self {
            pixels,
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
            bit_depth: 16,
            layout,
            bayer,
        }
    }

    /// The pixel buffer in the requested layout.
    pub fn to_layout(&self, layout: ChannelLayout) -> Vec<u16> {
        if layout == self.layout || self.channels == 1 {
            return self.pixels.clone();
        }
        let plane = self.width * self.height;
        let mut out = vec![0u16; self.pixels.len()];
        for i in 0..plane {
            for c in 0..self.channels {
                match layout {
                    ChannelLayout::Interleaved => out[i * self.channels + c] = self.pixels[c * plane + i],
                    ChannelLayout::Planar => out[c * plane + i] = self.pixels[i * self.channels + c],
                }
            }
        }
        out
    }
}
