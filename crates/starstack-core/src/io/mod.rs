pub mod image_io;
pub mod raw;

pub use raw::{decode, downscale_area, OwnedRawImage, PixelType, RawImage};
