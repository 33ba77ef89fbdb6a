use thiserror::Error;

/// Errors surfaced by the scrapbook and movie export pipelines.
///
/// Per-item failures (one photo that cannot be decoded) and per-feature
/// failures (an unusable audio track) never show up here; they are absorbed
/// where a fallback exists and only logged.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Photo list cannot be empty")]
    EmptyPhotoList,
    #[error("No video track found in {0}")]
    NoVideoTrack(String),
    #[error("No frames were produced; every photo failed to decode")]
    NoFramesProduced,
    #[error("Encoder error: {0}")]
    Encoder(String),
    #[error("Encoder did not signal end of stream within {0:?}")]
    EncoderStalled(std::time::Duration),
    #[error("Container error: {0}")]
    Container(String),
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    #[error("Decoding {width}x{height} needs {needed} bytes, over the {budget} byte budget")]
    DecodeBudget {
        width: u32,
        height: u32,
        needed: u64,
        budget: u64,
    },
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Failed to create surface")]
    SurfaceFailure,
    #[error("PDF serialization failed: {0}")]
    Pdf(String),
    #[error("Export job was dropped before reporting a result")]
    JobLost,
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
