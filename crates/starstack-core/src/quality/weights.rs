use crate::pipeline::config::WeightingMode;

/// Solver-reported quality of one sub.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubQuality {
    /// Half-flux radius in pixels, -1 when unknown.
    pub hfr: f64,
    /// Number of detected stars, 0 when unknown.
    pub num_stars: i32,
}

impl Default for SubQuality {
    fn default() -> Self {
        Self {
            hfr: -1.0,
            num_stars: 0,
        }
    }
}

/// Per-sub weighting rule, resolved once per session.
#[derive(Clone, Copy, Debug)]
pub struct Weigher {
    rule: fn(&SubQuality) -> f32,
}

fn equal(_: &SubQuality) -> f32 {
    1.0
}

fn inverse_hfr(q: &SubQuality) -> f32 {
    if q.hfr > 0.0 {
        (1.0 / q.hfr) as f32
    } else {
        1.0
    }
}

fn star_count(q: &SubQuality) -> f32 {
    if q.num_stars > 0 {
        q.num_stars as f32
    } else {
        1.0
    }
}

impl Weigher {
    pub fn new(mode: WeightingMode) -> Self {
        let rule: fn(&SubQuality) -> f32 = match mode {
            WeightingMode::Equal => equal,
            WeightingMode::InverseHfr => inverse_hfr,
            WeightingMode::StarCount => star_count,
        };
        Self { rule }
    }

    #[inline]
    pub fn weight(&self, quality: &SubQuality) -> f32 {
        (self.rule)(quality)
    }
}

impl From<WeightingMode> for Weigher {
    fn from(mode: WeightingMode) -> Self {
        Self::new(mode)
    }
}
