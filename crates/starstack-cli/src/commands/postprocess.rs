use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use starstack_core::io::image_io::{load_raw_image, save_image};
use starstack_core::io::raw::decode;
use starstack_core::pipeline::{ChannelLayout, OutputImage, PostProcessConfig};
use starstack_core::postprocess::{post_process, PsfInputs, PsfMethod};

use crate::summary::print_post_process_summary;

#[derive(Args)]
pub struct PostprocessArgs {
    /// Stacked image (TIFF or PNG)
    pub file: PathBuf,

    /// Post-processing settings (TOML), in place of the flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Deconvolution mix, 0 to 1
    #[arg(long, default_value = "0")]
    pub deconvolve: f32,

    /// Gaussian PSF sigma in pixels
    #[arg(long, default_value = "1.0")]
    pub psf_sigma: f32,

    /// Unsharp mask amount
    #[arg(long, default_value = "0")]
    pub sharpen: f32,

    /// Denoise strength relative to the image noise
    #[arg(long, default_value = "0")]
    pub denoise: f32,

    /// Output file path
    #[arg(short, long, default_value = "processed.tiff")]
    pub output: PathBuf,
}

pub fn run(args: &PostprocessArgs) -> Result<()> {
    let config = if let Some(ref path) = args.config {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents).context("Invalid post-processing config")?
    } else {
        build_config_from_args(args)
    };

    print_post_process_summary(&config);

    let raw = load_raw_image(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let frame = decode(&raw.as_raw())?;
    let processed = post_process(&frame, &config, PsfInputs::default());

    let output = OutputImage::from_frame(&processed, ChannelLayout::Planar, None);
    save_image(&output, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Output saved to {}", args.output.display());

    Ok(())
}

fn build_config_from_args(args: &PostprocessArgs) -> PostProcessConfig {
    let mut config = PostProcessConfig::default();
    config.deconvolution.amount = args.deconvolve;
    config.deconvolution.psf.method = PsfMethod::Gaussian;
    config.deconvolution.psf.sigma = args.psf_sigma;
    config.sharpen.amount = args.sharpen;
    config.denoise.strength = args.denoise;
    config
}
