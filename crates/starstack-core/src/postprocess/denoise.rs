//! Non-local means denoising.
//!
//! Each pixel becomes a weighted average of the pixels in a 21x21 search
//! window, weighted by how similar their 7x7 neighbourhoods are. Patch
//! distances are accumulated per search offset with a summed-area table, so
//! the cost is independent of the patch size.

use ndarray::{Array2, ArrayView2, Zip};

use crate::consts::{NLM_PATCH_SIZE, NLM_SEARCH_SIZE};
use crate::frame::Frame;
use crate::stack::median::median_and_sigma;

/// Denoise every channel. `strength` scales the filter parameter relative to
/// the channel's estimated noise sigma; zero or less is a no-op.
pub fn nl_means(frame: &Frame, strength: f32) -> Frame {
    if strength <= 0.0 {
        return frame.clone();
    }
    frame.map_channels(|plane| nl_means_plane(plane, strength))
}

fn nl_means_plane(src: ArrayView2<'_, f32>, strength: f32) -> Array2<f32> {
    let (rows, cols) = src.dim();
    let mut scratch = Vec::new();
    let values: Vec<f32> = src.iter().copied().collect();
    let noise = match median_and_sigma(&values, &mut scratch) {
        Some((_, sigma)) if sigma > 0.0 => sigma,
        _ => return src.to_owned(),
    };
    let h = (strength * noise) as f64;
    let inv_h2 = 1.0 / (h * h);

    let pr = (NLM_PATCH_SIZE / 2) as isize;
    let sr = (NLM_SEARCH_SIZE / 2) as isize;
    let patch_area = (NLM_PATCH_SIZE * NLM_PATCH_SIZE) as f64;

    let at = |y: isize, x: isize| -> f64 {
        let yy = y.clamp(0, rows as isize - 1) as usize;
        let xx = x.clamp(0, cols as isize - 1) as usize;
        src[[yy, xx]] as f64
    };

    // Squared differences live on a grid extended by the patch radius.
    let (dh, dw) = (rows + 2 * pr as usize, cols + 2 * pr as usize);
    let mut integral = Array2::<f64>::zeros((dh + 1, dw + 1));
    let mut weight_sum = Array2::<f64>::zeros((rows, cols));
    let mut value_sum = Array2::<f64>::zeros((rows, cols));

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for y in 0..dh {
                let mut row_acc = 0.0f64;
                for x in 0..dw {
                    let (py, px) = (y as isize - pr, x as isize - pr);
                    let d = at(py, px) - at(py + dy, px + dx);
                    row_acc += d * d;
                    integral[[y + 1, x + 1]] = integral[[y, x + 1]] + row_acc;
                }
            }

            let integral = &integral;
            Zip::indexed(&mut weight_sum)
                .and(&mut value_sum)
                .par_for_each(|(y, x), ws, vs| {
                    let (y1, x1) = (y + 2 * pr as usize + 1, x + 2 * pr as usize + 1);
                    let ssd = integral[[y1, x1]] - integral[[y, x1]] - integral[[y1, x]]
                        + integral[[y, x]];
                    let w = (-(ssd / patch_area) * inv_h2).exp();
                    *ws += w;
                    *vs += w * at(y as isize + dy, x as isize + dx);
                });
        }
    }

    Zip::from(&weight_sum)
        .and(&value_sum)
        .and(&src)
        .map_collect(|&ws, &vs, &orig| if ws > 0.0 { (vs / ws) as f32 } else { orig })
}
