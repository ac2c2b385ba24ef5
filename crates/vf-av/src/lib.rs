//! # vf-av
//!
//! External tool management and the segment encoder for the vodforge
//! pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support, plus a streaming mode that hands stderr lines to a callback and
//!   enforces a graceful soft stop before the hard kill.
//! - **Segment encoder** ([`HlsEncoder`]) -- probes the source duration, runs
//!   the fixed 720p HLS profile and turns ffmpeg's `-progress` stream into
//!   throttled percentage updates ([`ProgressTracker`]).

pub mod command;
pub mod encoder;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use encoder::{HlsEncoder, ProgressTracker};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
