//! # Export Module
//!
//! The scrapbook and movie pipelines and their background-thread entry points.
//!
//! ## Responsibilities
//! - **Scrapbook**: Layout then PDF rendering (`pdf`).
//! - **Silent Video**: Photo frames through an encoder into a container (`video`).
//! - **Soundtrack**: Looping or trimming audio against the video (`mux`).
//! - **Movie**: Both video stages with scratch-file cleanup (`movie`).
//! - **Jobs**: One background thread per export (`jobs`).

pub mod jobs;
pub mod movie;
pub mod mux;
pub mod pdf;
pub mod video;

pub use jobs::{spawn_movie_export, spawn_scrapbook_export, ExportJob, ExportOutcome};
pub use movie::create_movie;
pub use mux::{mux_audio, mux_audio_in};
pub use pdf::export_scrapbook;
pub use video::produce_silent_video;
