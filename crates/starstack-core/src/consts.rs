/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum sub count to calibrate and align subs in parallel.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Scale from the median absolute deviation to a Gaussian-equivalent sigma.
pub const MAD_TO_SIGMA: f32 = 1.4826;

/// Pixels processed between cancellation checks in the clipping loops.
pub const CANCEL_CHECK_INTERVAL: usize = 100;

/// Sample counts at or below this use the plain median instead of clipping.
pub const MIN_CLIP_SAMPLES: usize = 3;

/// Clip sigmas below this count as zero spread.
pub const CLIP_MIN_SIGMA: f32 = 1e-6;

/// Flat samples are clamped to at least this before median normalisation.
pub const FLAT_FLOOR: f32 = 1e-6;

/// Lower bound on a normalised flat value; keeps vignetted corners from exploding.
pub const FLAT_MIN_NORMALISED: f32 = 0.1;

/// Standard deviations below this are treated as zero when estimating SNR.
pub const SNR_MIN_STDDEV: f64 = 1e-6;

/// Floor for signal variance and noise-to-signal ratio in Wiener deconvolution.
pub const WIENER_MIN_RATIO: f64 = 1e-6;

/// Maximum number of star patches averaged into an empirical PSF.
pub const MAX_PSF_STARS: usize = 20;

/// Conversion from half-flux radius to Gaussian sigma (HFR ~= 1.177 sigma).
pub const HFR_TO_SIGMA: f32 = 1.177;

/// Side length of the comparison patch used by non-local means.
pub const NLM_PATCH_SIZE: usize = 7;

/// Side length of the search window used by non-local means.
pub const NLM_SEARCH_SIZE: usize = 21;

/// Lanczos window half-width used when resampling aligned subs.
pub const LANCZOS_A: usize = 4;

/// Full-scale value of the 16-bit output buffer.
pub const OUTPUT_MAX: f32 = 65535.0;

/// Side length of the PSF given to ImageMM subs without a usable HFR.
pub const MM_DEFAULT_PSF_SIZE: usize = 9;

/// Sigma of the PSF given to ImageMM subs without a usable HFR.
pub const MM_DEFAULT_PSF_SIGMA: f32 = 1.5;

/// Subs sampled when estimating the ImageMM noise scale.
pub const MM_SIGMA_FRAMES: usize = 4;

/// Row and column stride used when sampling residuals.
pub const MM_SAMPLE_STEP: usize = 4;

/// Share of the previous noise scale kept when a new estimate is made.
pub const MM_SIGMA_CARRY: f32 = 0.25;

/// Lower bound on the ImageMM noise scale.
pub const MM_MIN_SIGMA: f32 = 1e-6;

/// Floor for the denominator and ratio of the multiplicative update.
pub const MM_MIN_RATIO: f32 = 1e-8;

/// Relative L2 change of the latent image that ends the iterations.
pub const MM_TOLERANCE: f64 = 1e-3;

/// Step size of the PSF refinement, relative to the PSF peak.
pub const MM_PSF_STEP: f32 = 0.05;
