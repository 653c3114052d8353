pub mod convolve;
pub mod gaussian_blur;
pub mod unsharp_mask;
