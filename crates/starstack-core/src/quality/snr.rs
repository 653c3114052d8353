use ndarray::s;

use crate::consts::SNR_MIN_STDDEV;
use crate::frame::Frame;

/// Signal-to-noise estimate of an image.
///
/// Uses the centred region covering half the width and height. Each channel
/// contributes `mean / stddev`; flat channels are skipped. Returns 0.0 when
/// no channel gives a usable ratio.
pub fn snr(frame: &Frame) -> f64 {
    let (w, h) = (frame.width(), frame.height());
    let (x0, y0) = (w / 4, h / 4);
    let (rw, rh) = (w / 2, h / 2);
    if rw == 0 || rh == 0 {
        return 0.0;
    }

    let mut total = 0.0f64;
    let mut used = 0usize;
    for c in 0..frame.channels() {
        let plane = frame.channel(c);
        let roi = plane.slice(s![y0..y0 + rh, x0..x0 + rw]);

        let n = roi.len() as f64;
        let mean = roi.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = roi
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let stddev = var.sqrt();

        if stddev > SNR_MIN_STDDEV && stddev.is_finite() {
            total += mean / stddev;
            used += 1;
        }
    }

    if used == 0 {
        0.0
    } else {
        total / used as f64
    }
}

/// Running mean/min/max SNR over the subs of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SnrStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl SnrStats {
    /// Add one sub's SNR. Non-positive values carry no information and are ignored.
    pub fn record(&mut self, value: f64) {
        if value <= 0.0 || !value.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}
