pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod merge;
pub mod pipeline;
pub mod postprocess;
pub mod report;
pub mod split;
pub mod util;
