pub mod config;
pub mod output;
pub mod session;
pub mod sub_store;
pub mod types;

pub use config::{
    AlignmentConfig, AlignmentMethod, DeconvolutionConfig, DenoiseConfig, Downscale,
    LiveStackConfig, PostProcessConfig, PsfConfig, RejectionMode, SharpenConfig, WeightingMode,
};
pub use output::{BayerInfo, ChannelLayout, OutputImage};
pub use session::{Composite, LiveStacker, SolveOutcome};
pub use sub_store::{Sub, SubId, SubProgress, SubStatus};
pub use types::{CancelToken, SessionMetrics, SessionState, StackObserver, StackReport, SubEvent};
