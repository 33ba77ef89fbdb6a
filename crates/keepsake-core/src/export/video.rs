//! # Video Export
//!
//! Turns an ordered photo list into a silent slideshow video.
//!
//! ## Responsibilities
//! - **Frame Loop**: Each photo is letterboxed onto a black frame and submitted
//!   `frames_per_photo` times, with the encoder drained after every submission.
//! - **Timing**: Presentation timestamps come from the count of written frames,
//!   never from wall-clock time.
//! - **Container Start**: The container starts exactly once, on the first output
//!   format (or first buffer) the encoder reports.
//! - **Cleanup**: Surface, encoder and container are released in that order on
//!   every path.
//!
//! ## Key Functions
//! - `produce_silent_video`: Main entry point.

use crate::config::VideoConfig;
use crate::errors::ExportError;
use crate::systems::assets::{Bitmap, PhotoLibrary};
use crate::types::{contain_rect, PhotoRef};
use crate::video_wrapper::{
    EncodedPacket, EncoderOutput, MediaBackend, Muxer, RgbaFrame, VideoEncoder, VideoFormat,
};
use skia_safe::{AlphaType, Color, ColorType, ImageInfo, Paint, Rect, SamplingOptions};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Lifecycle of one encode run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    EncoderConfigured,
    Encoding,
    Draining,
    Finalized,
    Error,
}

impl ProducerState {
    /// Whether a run may move from `self` to `next`.
    ///
    /// Runs move strictly forward; `Error` is reachable from any unfinished state.
    pub fn can_transition_to(self, next: ProducerState) -> bool {
        use ProducerState::*;
        matches!(
            (self, next),
            (Idle, EncoderConfigured)
                | (EncoderConfigured, Encoding)
                | (Encoding, Draining)
                | (Draining, Finalized)
                | (Idle | EncoderConfigured | Encoding | Draining, Error)
        )
    }
}

/// Summary of a finished encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoReport {
    /// Picture samples written to the container (codec-config buffers excluded).
    pub frames_written: u64,
    pub photos_encoded: usize,
    pub photos_skipped: usize,
    /// Presentation time one frame past the last written frame.
    pub duration_us: i64,
}

/// Raster canvas standing in for the encoder's input surface.
pub struct InputSurface {
    surface: skia_safe::Surface,
    info: ImageInfo,
    width: u32,
    height: u32,
}

impl InputSurface {
    pub fn new(width: u32, height: u32) -> Result<Self, ExportError> {
        let info = ImageInfo::new(
            (width as i32, height as i32),
            ColorType::RGBA8888,
            AlphaType::Premul,
            None,
        );
        let surface =
            skia_safe::surfaces::raster(&info, None, None).ok_or(ExportError::SurfaceFailure)?;
        Ok(Self {
            surface,
            info,
            width,
            height,
        })
    }

    /// Draws `bitmap` contain-fit and centered on black, and reads the frame back.
    pub fn compose(&mut self, bitmap: &Bitmap) -> Result<RgbaFrame, ExportError> {
        let image = bitmap.to_image().ok_or(ExportError::SurfaceFailure)?;
        let bounds = Rect::from_wh(self.width as f32, self.height as f32);
        let dst = contain_rect(bitmap.width as f32, bitmap.height as f32, bounds);

        let canvas = self.surface.canvas();
        canvas.clear(Color::BLACK);
        let mut paint = Paint::default();
        paint.set_anti_alias(true);
        canvas.draw_image_rect_with_sampling_options(
            &image,
            None,
            dst,
            SamplingOptions::default(),
            &paint,
        );

        let row_bytes = self.width as usize * 4;
        let mut data = vec![0u8; row_bytes * self.height as usize];
        if !self
            .surface
            .read_pixels(&self.info, &mut data, row_bytes, (0, 0))
        {
            return Err(ExportError::SurfaceFailure);
        }
        Ok(RgbaFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}

/// Resources of one encode run.
///
/// Fields are declared in release order; `Drop` additionally stops a started
/// encoder after the surface is gone, and the muxer stops itself.
struct EncodeSession<B: MediaBackend> {
    surface: Option<InputSurface>,
    encoder: B::Encoder,
    encoder_started: bool,
    muxer: Muxer<B::Writer>,
    track: Option<usize>,
    state: ProducerState,
    frames_written: u64,
    config: VideoConfig,
}

impl<B: MediaBackend> EncodeSession<B> {
    fn transition(&mut self, next: ProducerState) -> Result<(), ExportError> {
        if !self.state.can_transition_to(next) {
            return Err(ExportError::InvalidState("producer state out of order"));
        }
        debug!(from = ?self.state, to = ?next, "Producer state");
        self.state = next;
        Ok(())
    }

    fn start_encoder(&mut self) -> Result<(), ExportError> {
        self.transition(ProducerState::Encoding)?;
        self.encoder.start()?;
        self.encoder_started = true;
        Ok(())
    }

    fn start_container(&mut self, format: &B::Format) -> Result<(), ExportError> {
        let track = self.muxer.add_track(format)?;
        self.muxer.start()?;
        self.track = Some(track);
        info!(track, "Container started");
        Ok(())
    }

    fn write_packet(&mut self, packet: EncodedPacket) -> Result<(), ExportError> {
        if !matches!(self.state, ProducerState::Encoding | ProducerState::Draining) {
            return Err(ExportError::InvalidState("encoder output outside an encode"));
        }
        if !self.muxer.is_started() {
            let format = self.encoder.output_format().ok_or_else(|| {
                ExportError::Encoder("output buffer before output format".to_string())
            })?;
            self.start_container(&format)?;
        }
        if packet.info.size == 0 {
            return Ok(());
        }
        let track = self
            .track
            .ok_or(ExportError::InvalidState("no video track"))?;

        let mut info = packet.info;
        if info.flags.codec_config {
            info.presentation_time_us = 0;
        } else {
            info.presentation_time_us = self.config.frame_time_us(self.frames_written);
            self.frames_written += 1;
        }
        trace!(pts = info.presentation_time_us, size = info.size, "Writing sample");
        self.muxer.write_sample(track, &packet.data, &info)
    }

    /// Handles output until the encoder has nothing more within `timeout`.
    /// Returns `true` once the end-of-stream buffer was seen.
    fn drain(&mut self, timeout: Duration) -> Result<bool, ExportError> {
        loop {
            match self.encoder.dequeue_output(timeout)? {
                EncoderOutput::TryAgainLater => return Ok(false),
                EncoderOutput::FormatChanged(format) => {
                    if !self.muxer.is_started() {
                        self.start_container(&format)?;
                    }
                }
                EncoderOutput::Buffer(packet) => {
                    let end_of_stream = packet.info.flags.end_of_stream;
                    self.write_packet(packet)?;
                    if end_of_stream {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Signals end of input and drains until end of stream or the deadline.
    fn drain_to_end(&mut self) -> Result<(), ExportError> {
        self.transition(ProducerState::Draining)?;
        self.encoder.signal_end_of_input()?;

        let timeout = self.config.drain_timeout();
        let deadline = self.config.end_of_stream_deadline();
        let began = Instant::now();
        while !self.drain(timeout)? {
            if began.elapsed() >= deadline {
                return Err(ExportError::EncoderStalled(deadline));
            }
        }
        Ok(())
    }

    /// Releases everything, surfacing a container stop failure.
    fn finish(&mut self) -> Result<(), ExportError> {
        self.transition(ProducerState::Finalized)?;
        self.surface = None;
        if self.encoder_started {
            self.encoder_started = false;
            self.encoder.stop()?;
        }
        self.muxer.stop()
    }
}

impl<B: MediaBackend> Drop for EncodeSession<B> {
    fn drop(&mut self) {
        self.surface = None;
        if self.encoder_started {
            self.encoder_started = false;
            if let Err(e) = self.encoder.stop() {
                warn!("Failed to stop encoder on release: {}", e);
            }
        }
    }
}

/// Encodes `photos` into a silent video at `output`.
///
/// Photos that fail to decode are skipped and later photos move up in time.
/// On failure every resource is released and `output` is removed.
#[instrument(level = "info", skip(backend, library, photos, config), fields(photos = photos.len(), fps = config.frame_rate, output = %output.display()))]
pub fn produce_silent_video<B: MediaBackend>(
    backend: &B,
    library: &PhotoLibrary,
    photos: &[PhotoRef],
    config: &VideoConfig,
    output: &Path,
) -> Result<VideoReport, ExportError> {
    if photos.is_empty() {
        return Err(ExportError::EmptyPhotoList);
    }

    let result = encode(backend, library, photos, config, output);
    if let Err(e) = &result {
        warn!("Video encode failed: {}", e);
        if output.exists() {
            let _ = std::fs::remove_file(output);
        }
    }
    result
}

fn encode<B: MediaBackend>(
    backend: &B,
    library: &PhotoLibrary,
    photos: &[PhotoRef],
    config: &VideoConfig,
    output: &Path,
) -> Result<VideoReport, ExportError> {
    let format = VideoFormat::from(config);
    debug!(mime = %format.mime, "Creating encoder");

    let mut encoder = backend.create_encoder(&format.mime)?;
    encoder.configure(&format)?;
    let writer = backend.create_writer(output)?;
    let surface = InputSurface::new(format.width, format.height)?;

    let mut session = EncodeSession::<B> {
        surface: Some(surface),
        encoder,
        encoder_started: false,
        muxer: Muxer::new(writer),
        track: None,
        state: ProducerState::EncoderConfigured,
        frames_written: 0,
        config: config.clone(),
    };

    match run(&mut session, library, photos, &format) {
        Ok(report) => {
            session.finish()?;
            info!(
                frames = report.frames_written,
                skipped = report.photos_skipped,
                "Video encoded"
            );
            Ok(report)
        }
        Err(e) => {
            if session.transition(ProducerState::Error).is_err() {
                debug!(state = ?session.state, "Failure after the run finished");
            }
            Err(e)
        }
    }
}

fn run<B: MediaBackend>(
    session: &mut EncodeSession<B>,
    library: &PhotoLibrary,
    photos: &[PhotoRef],
    format: &VideoFormat,
) -> Result<VideoReport, ExportError> {
    session.start_encoder()?;

    let frames_per_photo = session.config.frames_per_photo();
    let mut report = VideoReport::default();

    for photo in photos {
        let Some(bitmap) = library.decode(photo, format.width, format.height) else {
            report.photos_skipped += 1;
            continue;
        };
        let frame = session
            .surface
            .as_mut()
            .ok_or(ExportError::SurfaceFailure)?
            .compose(&bitmap)?;
        drop(bitmap);

        for _ in 0..frames_per_photo {
            session.encoder.queue_frame(&frame)?;
            session.drain(Duration::ZERO)?;
        }
        report.photos_encoded += 1;
        debug!(photo = %photo, frames = frames_per_photo, "Submitted photo");
    }

    if report.photos_encoded == 0 {
        return Err(ExportError::NoFramesProduced);
    }

    session.drain_to_end()?;

    if session.frames_written == 0 {
        return Err(ExportError::NoFramesProduced);
    }
    report.frames_written = session.frames_written;
    report.duration_us = session.config.frame_time_us(session.frames_written);
    Ok(report)
}
