use crate::filters::gaussian_blur::gaussian_blur;
use crate::frame::Frame;

/// Classic unsharp mask: `(1 + amount) * image - amount * blurred`.
///
/// `kernel_size` is forced odd and at least 3. Results are floored at zero.
/// An `amount` of zero or less returns the input unchanged.
pub fn unsharp_mask(frame: &Frame, amount: f32, kernel_size: usize, sigma: f32) -> Frame {
    if amount <= 0.0 {
        return frame.clone();
    }
    let blurred = gaussian_blur(frame, kernel_size, sigma);

    let data = ndarray::Zip::from(&frame.data)
        .and(&blurred.data)
        .map_collect(|&orig, &blur| ((1.0 + amount) * orig - amount * blur).max(0.0));

    Frame::new(data)
}
