//! # Media Backends
//!
//! Encoder, demuxer and container-writer abstractions used by the movie
//! pipeline, plus the two backends that implement them.
//!
//! - `real` (feature `video-rs`): FFmpeg through the `video-rs` bindings.
//! - `mock`: a deterministic in-process backend over a JSON container file,
//!   always compiled so the state machines can be exercised without FFmpeg.
//!
//! `DefaultBackend` picks FFmpeg when the feature is on and the mock otherwise.

use crate::config::{HardwareAccel, VideoConfig};
use crate::errors::ExportError;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub mod mock;

#[cfg(feature = "video-rs")]
pub mod real;

#[cfg(feature = "video-rs")]
pub type DefaultBackend = real::FfmpegBackend;
#[cfg(not(feature = "video-rs"))]
pub type DefaultBackend = mock::MockBackend;

/// A track format as negotiated by an encoder or reported by a demuxer.
pub trait TrackFormat: Clone + fmt::Debug {
    /// MIME-style type, e.g. `video/avc` or `audio/mp4a-latm`.
    fn mime(&self) -> String;

    /// Declared duration, when the container carries one.
    fn duration_us(&self) -> Option<i64>;

    fn is_video(&self) -> bool {
        self.mime().starts_with("video/")
    }

    fn is_audio(&self) -> bool {
        self.mime().starts_with("audio/")
    }
}

/// Requested encoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u64,
    pub iframe_interval_secs: u32,
    pub hardware_accel: HardwareAccel,
}

impl From<&VideoConfig> for VideoFormat {
    fn from(config: &VideoConfig) -> Self {
        Self {
            mime: config.mime.clone(),
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate.max(1),
            bitrate: config.bitrate,
            iframe_interval_secs: config.iframe_interval_secs,
            hardware_accel: config.hardware_accel,
        }
    }
}

/// One raw frame handed to the encoder's input surface.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA, tightly packed rows.
    pub data: Vec<u8>,
}

impl fmt::Debug for RgbaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbaFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Flags on one unit of encoder output or one written sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BufferFlags {
    pub key_frame: bool,
    /// Codec configuration only (parameter sets), no picture data.
    pub codec_config: bool,
    pub end_of_stream: bool,
    pub partial_frame: bool,
}

/// Descriptor of one encoded unit: where its bytes are and when it plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// A dequeued output buffer. Dropping it releases it back to the encoder.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

impl fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("len", &self.data.len())
            .field("info", &self.info)
            .finish()
    }
}

/// Result of polling the encoder for output.
#[derive(Debug, Clone)]
pub enum EncoderOutput<F> {
    /// Nothing available within the timeout.
    TryAgainLater,
    /// The negotiated output format is now known.
    FormatChanged(F),
    Buffer(EncodedPacket),
}

/// Flags of a demuxed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SampleFlags {
    pub sync: bool,
    pub partial_frame: bool,
    pub encrypted: bool,
}

impl SampleFlags {
    /// Container flags for a copied sample. Encryption is not carried over.
    pub fn to_buffer_flags(self) -> BufferFlags {
        BufferFlags {
            key_frame: self.sync,
            partial_frame: self.partial_frame,
            ..BufferFlags::default()
        }
    }
}

/// Descriptor of the sample at the demuxer's read position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub time_us: i64,
    pub flags: SampleFlags,
}

/// Frame sink backed by a video codec.
///
/// Release happens on drop.
pub trait VideoEncoder {
    type Format: TrackFormat;

    fn configure(&mut self, format: &VideoFormat) -> Result<(), ExportError>;
    fn start(&mut self) -> Result<(), ExportError>;
    /// Posts one frame to the input surface.
    fn queue_frame(&mut self, frame: &RgbaFrame) -> Result<(), ExportError>;
    fn dequeue_output(
        &mut self,
        timeout: Duration,
    ) -> Result<EncoderOutput<Self::Format>, ExportError>;
    /// The negotiated output format, once known.
    fn output_format(&self) -> Option<Self::Format>;
    fn signal_end_of_input(&mut self) -> Result<(), ExportError>;
    fn stop(&mut self) -> Result<(), ExportError>;
}

/// Sample reader over a container file.
///
/// `read_sample` reads the sample at the current position without moving;
/// `advance` moves to the next sample of the selected track.
pub trait Demuxer {
    type Format: TrackFormat;

    fn track_count(&self) -> usize;
    fn track_format(&self, index: usize) -> Option<Self::Format>;
    fn select_track(&mut self, index: usize) -> Result<(), ExportError>;
    /// Copies the current sample into `buf`. `None` once the track is exhausted.
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>, ExportError>;
    /// Returns `false` when there is no further sample.
    fn advance(&mut self) -> Result<bool, ExportError>;
    /// Moves to the last sync sample at or before `time_us`.
    fn seek_to_sync(&mut self, time_us: i64) -> Result<(), ExportError>;
}

/// Track writer for an output container.
///
/// Release happens on drop.
pub trait ContainerWriter {
    type Format: TrackFormat;

    fn add_track(&mut self, format: &Self::Format) -> Result<usize, ExportError>;
    fn start(&mut self) -> Result<(), ExportError>;
    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ExportError>;
    fn stop(&mut self) -> Result<(), ExportError>;
}

/// Factory for the three collaborators, sharing one format type.
pub trait MediaBackend {
    type Format: TrackFormat;
    type Encoder: VideoEncoder<Format = Self::Format>;
    type Demuxer: Demuxer<Format = Self::Format>;
    type Writer: ContainerWriter<Format = Self::Format>;

    fn create_encoder(&self, mime: &str) -> Result<Self::Encoder, ExportError>;
    fn open_demuxer(&self, path: &Path) -> Result<Self::Demuxer, ExportError>;
    fn create_writer(&self, path: &Path) -> Result<Self::Writer, ExportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Initialized,
    Started,
    Stopped,
}

/// Container writer that enforces the track/start/write/stop protocol.
///
/// Tracks may only be added before `start`, samples only written after it,
/// `start` happens once, and `stop` only after a `start`. A container that
/// is still started when dropped is stopped then.
#[derive(Debug)]
pub struct Muxer<W: ContainerWriter> {
    writer: W,
    state: MuxerState,
    tracks: usize,
}

impl<W: ContainerWriter> Muxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            state: MuxerState::Initialized,
            tracks: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state == MuxerState::Started
    }

    pub fn add_track(&mut self, format: &W::Format) -> Result<usize, ExportError> {
        if self.state != MuxerState::Initialized {
            return Err(ExportError::InvalidState("track added after start"));
        }
        let index = self.writer.add_track(format)?;
        self.tracks += 1;
        debug!(track = index, mime = %format.mime(), "Added track");
        Ok(index)
    }

    pub fn start(&mut self) -> Result<(), ExportError> {
        match self.state {
            MuxerState::Initialized if self.tracks == 0 => {
                Err(ExportError::InvalidState("start without tracks"))
            }
            MuxerState::Initialized => {
                self.writer.start()?;
                self.state = MuxerState::Started;
                Ok(())
            }
            _ => Err(ExportError::InvalidState("container started twice")),
        }
    }

    pub fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ExportError> {
        if self.state != MuxerState::Started {
            return Err(ExportError::InvalidState("sample written outside started state"));
        }
        self.writer.write_sample(track, data, info)
    }

    /// Stops the container. Stopping one that never started is an error.
    pub fn stop(&mut self) -> Result<(), ExportError> {
        if self.state != MuxerState::Started {
            return Err(ExportError::InvalidState("stop without start"));
        }
        self.state = MuxerState::Stopped;
        self.writer.stop()
    }
}

impl<W: ContainerWriter> Drop for Muxer<W> {
    fn drop(&mut self) {
        if self.state == MuxerState::Started {
            self.state = MuxerState::Stopped;
            if let Err(e) = self.writer.stop() {
                warn!("Failed to stop container on release: {}", e);
            }
        }
    }
}
