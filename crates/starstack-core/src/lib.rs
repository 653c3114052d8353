pub mod align;
pub mod calibration;
pub mod compute;
pub mod consts;
pub mod error;
pub mod filters;
pub mod frame;
pub mod io;
pub mod pipeline;
pub mod postprocess;
pub mod quality;
pub mod stack;
