pub mod config;
pub mod manifest;
pub mod postprocess;
pub mod run;
