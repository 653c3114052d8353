use thiserror::Error;

use crate::frame::ImageShape;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid image dimensions: {width}x{height}x{channels}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        channels: usize,
    },

    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    #[error("Buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Shape mismatch: session is {expected}, got {actual}")]
    ShapeMismatch {
        expected: ImageShape,
        actual: ImageShape,
    },

    #[error("Pixel type mismatch: session uses {expected}, got {actual}")]
    PixelTypeMismatch {
        expected: crate::io::raw::PixelType,
        actual: crate::io::raw::PixelType,
    },

    #[error("Invalid master frame: {0}")]
    InvalidMaster(String),

    #[error("No sub is waiting for a solver result")]
    NoPendingSub,

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("WCS error: {0}")]
    Wcs(String),

    #[error("Degenerate transform: {0}")]
    DegenerateTransform(String),

    #[error("Stacking error: {0}")]
    Stacking(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Post-processing error: {0}")]
    PostProcess(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
