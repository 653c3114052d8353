use serde::{Deserialize, Serialize};

use crate::align::Interpolation;
use crate::postprocess::PsfMethod;
use crate::stack::image_mm::MmParams;
use crate::stack::sigma_clip::ClipParams;
use crate::stack::Combiner;

/// Settings for one live-stacking session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveStackConfig {
    /// Good subs gathered before the session switches to running mode.
    pub chunk_size: usize,
    pub downscale: Downscale,
    pub alignment: AlignmentConfig,
    pub rejection: RejectionMode,
    pub weighting: WeightingMode,
    pub post_process: PostProcessConfig,
}

impl Default for LiveStackConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            downscale: Downscale::None,
            alignment: AlignmentConfig::default(),
            rejection: RejectionMode::default(),
            weighting: WeightingMode::default(),
            post_process: PostProcessConfig::default(),
        }
    }
}

/// Integer shrink applied to every sub and master on ingestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Downscale {
    #[default]
    None,
    X2,
    X3,
    X4,
}

impl Downscale {
    pub fn factor(self) -> usize {
        match self {
            Self::None => 1,
            Self::X2 => 2,
            Self::X3 => 3,
            Self::X4 => 4,
        }
    }
}

impl std::fmt::Display for Downscale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            other => write!(f, "{}x", other.factor()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentMethod {
    /// Register subs through their plate solutions.
    #[default]
    Wcs,
    /// Stack subs as delivered.
    None,
}

impl std::fmt::Display for AlignmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wcs => write!(f, "WCS"),
            Self::None => write!(f, "None"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub method: AlignmentMethod,
    pub interpolation: Interpolation,
}

/// Outlier rejection applied while combining.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RejectionMode {
    /// Plain weighted average.
    None,
    /// Reject samples outside `median - low*sigma .. median + high*sigma`.
    Sigma { low: f32, high: f32 },
    /// Clamp samples to `median +/- cutoff*sigma` first, then sigma clip.
    Winsorized { low: f32, high: f32, cutoff: f32 },
    /// Robust majorise-minimise stacking against a per-sub PSF model.
    ImageMm(MmParams),
}

impl Default for RejectionMode {
    fn default() -> Self {
        Self::Sigma {
            low: 2.0,
            high: 2.0,
        }
    }
}

impl RejectionMode {
    /// Resolve into the session's combination strategy.
    pub fn combiner(self) -> Combiner {
        match self {
            Self::None => Combiner::WeightedMean,
            Self::Sigma { low, high } => Combiner::SigmaClip(ClipParams {
                low,
                high,
                winsor: None,
            }),
            Self::Winsorized { low, high, cutoff } => Combiner::SigmaClip(ClipParams {
                low,
                high,
                winsor: Some(cutoff),
            }),
            Self::ImageMm(params) => Combiner::ImageMm(params),
        }
    }
}

impl std::fmt::Display for RejectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Sigma { low, high } => write!(f, "Sigma clip (low={low}, high={high})"),
            Self::Winsorized { low, high, cutoff } => {
                write!(f, "Winsorized sigma clip (low={low}, high={high}, cutoff={cutoff})")
            }
            Self::ImageMm(p) => write!(
                f,
                "ImageMM (iterations={}, kappa={}, history={})",
                p.iterations, p.kappa, p.history
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightingMode {
    #[default]
    Equal,
    InverseHfr,
    StarCount,
}

impl std::fmt::Display for WeightingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => write!(f, "Equal"),
            Self::InverseHfr => write!(f, "Inverse HFR"),
            Self::StarCount => write!(f, "Star count"),
        }
    }
}

/// Sharpening and noise reduction applied to the composite only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub deconvolution: DeconvolutionConfig,
    pub sharpen: SharpenConfig,
    pub denoise: DenoiseConfig,
}

impl PostProcessConfig {
    /// True when no stage would change the image.
    pub fn is_noop(&self) -> bool {
        self.deconvolution.amount <= 0.0 && self.sharpen.amount <= 0.0 && self.denoise.strength <= 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconvolutionConfig {
    /// Mix of the deconvolved image, 0 (off) to 1.
    pub amount: f32,
    pub psf: PsfConfig,
}

impl Default for DeconvolutionConfig {
    fn default() -> Self {
        Self {
            amount: 0.0,
            psf: PsfConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsfConfig {
    pub method: PsfMethod,
    /// Gaussian sigma in pixels.
    pub sigma: f32,
    /// Side length of the PSF patch; forced odd.
    pub patch_size: usize,
}

impl Default for PsfConfig {
    fn default() -> Self {
        Self {
            method: PsfMethod::Gaussian,
            sigma: 1.0,
            patch_size: 21,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpenConfig {
    /// Unsharp mask strength; 0 disables.
    pub amount: f32,
    /// Blur kernel size; forced odd and at least 3.
    pub kernel_size: usize,
    /// Blur sigma; 0 derives it from the kernel size.
    pub sigma: f32,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            amount: 0.0,
            kernel_size: 5,
            sigma: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Filter strength relative to the estimated noise; 0 disables.
    pub strength: f32,
}
