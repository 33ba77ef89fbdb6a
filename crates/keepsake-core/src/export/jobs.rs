//! Background-thread entry points for both exports.
//!
//! Each call runs one export on its own thread and hands back an `ExportJob`.
//! The outcome carries only the output path or a display message.

use crate::catalog::ScrapbookTemplate;
use crate::config::{PageConfig, VideoConfig};
use crate::errors::ExportError;
use crate::export::movie::create_movie;
use crate::export::pdf::export_scrapbook_to_file;
use crate::systems::assets::PhotoLibrary;
use crate::types::{AudioRef, PhotoRef};
use crate::video_wrapper::MediaBackend;
use crossbeam_channel::{bounded, Receiver};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Final state of an export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Succeeded(PathBuf),
    Failed(String),
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportOutcome::Succeeded(_))
    }
}

/// Handle to an export running on a background thread.
#[derive(Debug)]
pub struct ExportJob {
    outcome_rx: Receiver<ExportOutcome>,
    /// Outcome already taken off the channel by `try_outcome`.
    outcome: Option<ExportOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl ExportJob {
    fn spawn<F>(kind: &'static str, output: PathBuf, work: F) -> Self
    where
        F: FnOnce() -> Result<(), ExportError> + Send + 'static,
    {
        let (outcome_tx, outcome_rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name(format!("keepsake-{}", kind))
            .spawn(move || {
                let outcome = match work() {
                    Ok(()) => {
                        info!(kind, output = %output.display(), "Export finished");
                        ExportOutcome::Succeeded(output)
                    }
                    Err(e) => {
                        error!(kind, "Export failed: {}", e);
                        ExportOutcome::Failed(e.to_string())
                    }
                };
                let _ = outcome_tx.send(outcome);
            });

        match spawned {
            Ok(handle) => Self {
                outcome_rx,
                outcome: None,
                handle: Some(handle),
            },
            Err(e) => Self::finished(ExportOutcome::Failed(e.to_string())),
        }
    }

    /// A job that already has its outcome, with no thread behind it.
    fn finished(outcome: ExportOutcome) -> Self {
        let (outcome_tx, outcome_rx) = bounded(1);
        let _ = outcome_tx.send(outcome);
        Self {
            outcome_rx,
            outcome: None,
            handle: None,
        }
    }

    /// Blocks until the export ends.
    pub fn wait(mut self) -> ExportOutcome {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => self
                .outcome_rx
                .recv()
                .unwrap_or_else(|_| ExportOutcome::Failed(ExportError::JobLost.to_string())),
        };
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        outcome
    }

    /// The outcome, if the export has already ended.
    ///
    /// Polling does not consume it: later polls and `wait` return the same outcome.
    pub fn try_outcome(&mut self) -> Option<ExportOutcome> {
        if self.outcome.is_none() {
            self.outcome = self.outcome_rx.try_recv().ok();
        }
        self.outcome.clone()
    }
}

/// Exports a scrapbook PDF to `output` in the background.
pub fn spawn_scrapbook_export(
    library: PhotoLibrary,
    photos: Vec<PhotoRef>,
    template: ScrapbookTemplate,
    page: PageConfig,
    output: PathBuf,
) -> ExportJob {
    if photos.is_empty() {
        return ExportJob::finished(ExportOutcome::Failed(ExportError::EmptyPhotoList.to_string()));
    }
    let path = output.clone();
    ExportJob::spawn("scrapbook", output, move || {
        export_scrapbook_to_file(&library, &photos, &template, &page, &path).map(|_| ())
    })
}

/// Exports a movie to `output` in the background.
pub fn spawn_movie_export<B>(
    backend: B,
    library: PhotoLibrary,
    photos: Vec<PhotoRef>,
    audio: Option<AudioRef>,
    config: VideoConfig,
    output: PathBuf,
) -> ExportJob
where
    B: MediaBackend + Send + 'static,
{
    if photos.is_empty() {
        return ExportJob::finished(ExportOutcome::Failed(ExportError::EmptyPhotoList.to_string()));
    }
    let path = output.clone();
    ExportJob::spawn("movie", output, move || {
        create_movie(&backend, &library, &photos, audio.as_ref(), &config, &path).map(|_| ())
    })
}
