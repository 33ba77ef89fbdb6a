//! Movie export: silent video into a scratch directory, then the soundtrack merge.

use crate::config::VideoConfig;
use crate::errors::ExportError;
use crate::export::mux::{mux_audio_in, MuxReport};
use crate::export::video::{produce_silent_video, VideoReport};
use crate::systems::assets::PhotoLibrary;
use crate::types::{AudioRef, PhotoRef};
use crate::video_wrapper::MediaBackend;
use std::path::Path;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovieReport {
    pub video: VideoReport,
    pub mux: MuxReport,
}

/// Builds the movie at `output`.
///
/// The silent video and any copied audio live in a private directory under
/// `config.scratch_dir` (or the system temp dir), removed on success and on
/// failure alike.
#[instrument(level = "info", skip(backend, library, photos, config), fields(photos = photos.len(), audio = ?audio.map(|a| a.to_string()), output = %output.display()))]
pub fn create_movie<B: MediaBackend>(
    backend: &B,
    library: &PhotoLibrary,
    photos: &[PhotoRef],
    audio: Option<&AudioRef>,
    config: &VideoConfig,
    output: &Path,
) -> Result<MovieReport, ExportError> {
    if photos.is_empty() {
        return Err(ExportError::EmptyPhotoList);
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("keepsake-movie-");
    let scratch = match &config.scratch_dir {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };
    let extension = output
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    let silent = scratch.path().join(format!("silent.{}", extension));
    debug!(scratch = %silent.display(), "Encoding to scratch file");

    let video = produce_silent_video(backend, library, photos, config, &silent)?;
    let mux = mux_audio_in(
        backend,
        library.resolver.as_ref(),
        &silent,
        audio,
        output,
        scratch.path(),
    )?;

    scratch.close()?;
    Ok(MovieReport { video, mux })
}
