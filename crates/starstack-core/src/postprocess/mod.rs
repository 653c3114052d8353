pub mod denoise;
pub mod psf;
pub mod wiener;

use ndarray::Array2;
use tracing::{debug, warn};

use crate::filters::unsharp_mask::unsharp_mask;
use crate::frame::Frame;
use crate::pipeline::config::{DeconvolutionConfig, PostProcessConfig};

pub use psf::{PsfMethod, StarCenter};

/// Inputs for PSF estimation that come from outside the composite itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct PsfInputs<'a> {
    /// Star centres detected on the composite.
    pub stars: &'a [StarCenter],
    /// Mean half-flux radius of the stacked subs, on the composite's grid.
    pub hfr: Option<f64>,
}

/// Run deconvolution, sharpening and denoising in that order.
///
/// Each stage is skipped when its amount is zero or less. A stage that fails
/// logs a warning and passes its input through untouched.
pub fn post_process(frame: &Frame, config: &PostProcessConfig, inputs: PsfInputs<'_>) -> Frame {
    let mut image = frame.clone();

    if config.deconvolution.amount > 0.0 {
        let psf = estimate_psf(&image, &config.deconvolution, inputs);
        match wiener::wiener_deconvolve(&image, &psf, config.deconvolution.amount) {
            Ok(restored) => image = restored,
            Err(e) => warn!(error = %e, "Deconvolution skipped"),
        }
    }

    if config.sharpen.amount > 0.0 {
        image = unsharp_mask(
            &image,
            config.sharpen.amount,
            config.sharpen.kernel_size,
            config.sharpen.sigma,
        );
    }

    if config.denoise.strength > 0.0 {
        image = denoise::nl_means(&image, config.denoise.strength);
    }

    if image.data.iter().any(|v| !v.is_finite()) {
        warn!("Post-processing produced non-finite samples, keeping the unprocessed stack");
        return frame.clone();
    }
    image
}

/// Pick a PSF for the configured method, falling back to the Gaussian.
pub fn estimate_psf(image: &Frame, config: &DeconvolutionConfig, inputs: PsfInputs<'_>) -> Array2<f32> {
    let gaussian = || psf::gaussian_psf(config.psf.patch_size, config.psf.sigma);
    match config.psf.method {
        PsfMethod::Gaussian => gaussian(),
        PsfMethod::Stars => {
            let lum = image.luminance();
            psf::star_psf(lum.view(), inputs.stars, config.psf.patch_size).unwrap_or_else(|| {
                debug!(stars = inputs.stars.len(), "No usable stars for PSF, using Gaussian");
                gaussian()
            })
        }
        PsfMethod::Hfr => inputs.hfr.and_then(psf::hfr_psf).unwrap_or_else(|| {
            debug!(hfr = ?inputs.hfr, "No usable HFR for PSF, using Gaussian");
            gaussian()
        }),
    }
}
