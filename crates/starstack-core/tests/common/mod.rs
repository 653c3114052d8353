#![allow(dead_code)]

use starstack_core::align::Wcs;
use starstack_core::frame::{Frame, ImageShape};
use starstack_core::io::raw::OwnedRawImage;
use starstack_core::pipeline::SolveOutcome;

/// A 16-bit raw buffer with every sample set to `value`.
pub fn constant_raw(width: usize, height: usize, channels: usize, value: u16) -> OwnedRawImage {
    let samples = vec![value; width * height * channels];
    OwnedRawImage::from_u16(&samples, width, height, channels)
}

/// A 16-bit raw buffer from a planar sample generator `f(channel, y, x)`.
pub fn raw_from_fn<F>(width: usize, height: usize, channels: usize, f: F) -> OwnedRawImage
where
    F: Fn(usize, usize, usize) -> u16,
{
    let mut samples = Vec::with_capacity(width * height * channels);
    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                samples.push(f(c, y, x));
            }
        }
    }
    OwnedRawImage::from_u16(&samples, width, height, channels)
}

/// Deterministic pseudo-random noise in `[0, 1)`.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
    }

    pub fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32) / (1u64 << 24) as f32
    }
}

/// `base` plus uniform noise of the given amplitude.
pub fn noisy_frame(shape: ImageShape, base: f32, amplitude: f32, seed: u64) -> Frame {
    let mut rng = Lcg::new(seed);
    let mut frame = Frame::zeros(shape);
    frame
        .data
        .mapv_inplace(|_| base + amplitude * (rng.next_f32() - 0.5));
    frame
}

/// A north-up solution centred on the image, 1.5"/px.
pub fn test_wcs(width: usize, height: usize) -> Wcs {
    Wcs::from_scale_rotation(
        (width as f64 / 2.0 + 0.5, height as f64 / 2.0 + 0.5),
        (180.0, 45.0),
        1.5,
        0.0,
    )
}

pub fn solved(wcs: Wcs) -> SolveOutcome {
    SolveOutcome::Solved {
        wcs,
        hfr: 2.0,
        num_stars: 100,
    }
}

pub fn assert_all_close(frame: &Frame, expected: f32, tol: f32) {
    for &v in frame.data.iter() {
        assert!(
            (v - expected).abs() < tol,
            "expected {expected}, got {v}"
        );
    }
}
