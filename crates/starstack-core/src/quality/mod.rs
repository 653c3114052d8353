pub mod snr;
pub mod weights;

pub use snr::{snr, SnrStats};
pub use weights::{SubQuality, Weigher};
