//! # Keepsake Core
//!
//! `keepsake-core` turns an ordered selection of photos into two keepsakes:
//!
//! *   **Scrapbook PDF**: photos packed into fixed-size pages by a shortest-column
//!     layout, drawn as tilted, framed cards over a template background
//!     ([Skia](https://skia.org/) PDF backend).
//! *   **Slideshow movie**: every photo held on screen for a fixed time, encoded to
//!     H.264 and muxed against a looped or trimmed soundtrack into an MP4
//!     (FFmpeg via [video-rs](https://crates.io/crates/video-rs)).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keepsake_core::catalog::TemplateCatalog;
//! use keepsake_core::config::ExportConfig;
//! use keepsake_core::export::pdf::export_scrapbook;
//! use keepsake_core::systems::assets::PhotoLibrary;
//! use keepsake_core::{DefaultResolver, PhotoRef};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), keepsake_core::ExportError> {
//! let config = ExportConfig::default();
//! let library = PhotoLibrary::new(Arc::new(DefaultResolver::default()));
//! let catalog = TemplateCatalog::default();
//! let photos = vec![PhotoRef::new("a.jpg"), PhotoRef::new("b.jpg")];
//! let mut out = std::fs::File::create("book.pdf")?;
//! export_scrapbook(&library, &photos, catalog.find_by_id("floral"), &config.page, &mut out)?;
//! # Ok(())
//! # }
//! ```

/// Shared data structures (photo and audio references, object fit).
pub mod types;

/// Page, card and video configuration.
pub mod config;

/// Template and music registries.
pub mod catalog;

/// Audio probing.
pub mod audio;

/// Encoder, demuxer and container-writer abstractions with their backends.
pub mod video_wrapper;

/// Core systems (photo decoding, layout, PDF rendering).
pub mod systems;

/// Export pipelines and their asynchronous entry points.
pub mod export;

pub mod errors;

pub use errors::ExportError;
pub use types::{AudioRef, PhotoRef};

use anyhow::Result;
use std::path::PathBuf;
use tracing::instrument;

/// A trait for abstracting access to photo and audio bytes.
///
/// Photos and user-picked audio are opaque references; the embedding
/// application decides how they map to bytes (files, content providers,
/// archives).
pub trait MediaResolver: Send + Sync {
    /// Loads the raw bytes behind a reference.
    fn load_bytes(&self, reference: &str) -> Result<Vec<u8>>;

    /// Resolves a bundled resource name to a file that can be opened directly.
    ///
    /// The default implementation has no bundled resources.
    fn resource_path(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

/// Filesystem-backed resolver.
///
/// References are paths (an optional `file://` prefix is stripped); bundled
/// resources live under `resource_dir`.
#[derive(Debug, Clone)]
pub struct DefaultResolver {
    pub resource_dir: PathBuf,
}

impl Default for DefaultResolver {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("assets"),
        }
    }
}

impl DefaultResolver {
    pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
        }
    }
}

impl MediaResolver for DefaultResolver {
    #[instrument(level = "debug", skip(self), fields(reference = reference))]
    fn load_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        let path = reference.strip_prefix("file://").unwrap_or(reference);
        if let Ok(bytes) = std::fs::read(path) {
            return Ok(bytes);
        }
        // Fallback to the resource directory
        let alt = self.resource_dir.join(path);
        std::fs::read(&alt).map_err(|e| {
            anyhow::anyhow!(
                "Media not found: {} (checked '{}' and '{}'): {}",
                reference,
                path,
                alt.display(),
                e
            )
        })
    }

    fn resource_path(&self, name: &str) -> Option<PathBuf> {
        let path = self.resource_dir.join(name);
        path.is_file().then_some(path)
    }
}
