//! In-process media backend over a JSON container file.
//!
//! The "container" is a list of track formats and a list of samples with
//! their timestamps and flags. The encoder produces one small packet per
//! queued frame, after an optional latency, preceded by a format change and
//! a codec-config buffer the way hardware encoders report them.

use super::{
    BufferFlags, BufferInfo, ContainerWriter, Demuxer, EncodedPacket, EncoderOutput,
    MediaBackend, RgbaFrame, SampleFlags, SampleInfo, TrackFormat, VideoEncoder, VideoFormat,
};
use crate::errors::ExportError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockFormat {
    pub mime: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub duration_us: Option<i64>,
}

impl MockFormat {
    pub fn video() -> Self {
        Self {
            mime: "video/avc".to_string(),
            width: 1920,
            height: 1080,
            duration_us: None,
        }
    }

    pub fn audio() -> Self {
        Self {
            mime: "audio/mp4a-latm".to_string(),
            width: 0,
            height: 0,
            duration_us: None,
        }
    }

    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }
}

impl TrackFormat for MockFormat {
    fn mime(&self) -> String {
        self.mime.clone()
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockSample {
    pub track: usize,
    pub time_us: i64,
    #[serde(default)]
    pub flags: BufferFlags,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// On-disk layout of a mock container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockContainer {
    pub tracks: Vec<MockFormat>,
    pub samples: Vec<MockSample>,
}

impl MockContainer {
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let file = File::open(path)?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| ExportError::Container(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        let file = File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Samples of one track, in file order.
    pub fn track_samples(&self, track: usize) -> impl Iterator<Item = &MockSample> {
        self.samples.iter().filter(move |s| s.track == track)
    }

    /// Builds a single-track container with `count` samples spaced `step_us` apart.
    /// Every `sync_every`th sample is a sync sample.
    pub fn single_track(format: MockFormat, count: usize, step_us: i64, sync_every: usize) -> Self {
        let sync_every = sync_every.max(1);
        let samples = (0..count)
            .map(|i| MockSample {
                track: 0,
                time_us: i as i64 * step_us,
                flags: BufferFlags {
                    key_frame: i % sync_every == 0,
                    ..BufferFlags::default()
                },
                data: (i as u32).to_le_bytes().to_vec(),
            })
            .collect();
        Self {
            tracks: vec![format],
            samples,
        }
    }
}

/// Knobs for the mock encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockEncoderOptions {
    /// Frames held inside the encoder before their packets become available.
    pub latency: usize,
    /// Never deliver the end-of-stream buffer.
    pub stall_end_of_stream: bool,
    pub fail_configure: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pub encoder: MockEncoderOptions,
}

impl MockBackend {
    pub fn with_encoder(encoder: MockEncoderOptions) -> Self {
        Self { encoder }
    }
}

impl MediaBackend for MockBackend {
    type Format = MockFormat;
    type Encoder = MockEncoder;
    type Demuxer = MockDemuxer;
    type Writer = MockWriter;

    fn create_encoder(&self, mime: &str) -> Result<MockEncoder, ExportError> {
        if !mime.starts_with("video/") {
            return Err(ExportError::Encoder(format!("No encoder for {}", mime)));
        }
        Ok(MockEncoder::new(mime, self.encoder.clone()))
    }

    fn open_demuxer(&self, path: &Path) -> Result<MockDemuxer, ExportError> {
        MockDemuxer::open(path)
    }

    fn create_writer(&self, path: &Path) -> Result<MockWriter, ExportError> {
        MockWriter::create(path)
    }
}

#[derive(Debug)]
pub struct MockEncoder {
    mime: String,
    options: MockEncoderOptions,
    format: Option<VideoFormat>,
    started: bool,
    input_ended: bool,
    format_announced: bool,
    config_sent: bool,
    eos_sent: bool,
    frames_in: u64,
    pending: VecDeque<EncodedPacket>,
}

impl MockEncoder {
    fn new(mime: &str, options: MockEncoderOptions) -> Self {
        Self {
            mime: mime.to_string(),
            options,
            format: None,
            started: false,
            input_ended: false,
            format_announced: false,
            config_sent: false,
            eos_sent: false,
            frames_in: 0,
            pending: VecDeque::new(),
        }
    }

    fn negotiated(&self) -> Option<MockFormat> {
        self.format.as_ref().map(|f| MockFormat {
            mime: self.mime.clone(),
            width: f.width,
            height: f.height,
            duration_us: None,
        })
    }
}

impl VideoEncoder for MockEncoder {
    type Format = MockFormat;

    fn configure(&mut self, format: &VideoFormat) -> Result<(), ExportError> {
        if self.options.fail_configure {
            return Err(ExportError::Encoder("configure rejected".to_string()));
        }
        if format.width == 0 || format.height == 0 {
            return Err(ExportError::Encoder("zero-sized output".to_string()));
        }
        self.format = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), ExportError> {
        if self.format.is_none() {
            return Err(ExportError::Encoder("start before configure".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn queue_frame(&mut self, frame: &RgbaFrame) -> Result<(), ExportError> {
        let format = match (&self.format, self.started && !self.input_ended) {
            (Some(format), true) => format,
            _ => return Err(ExportError::Encoder("encoder not accepting input".to_string())),
        };
        if frame.width != format.width || frame.height != format.height {
            return Err(ExportError::Encoder(format!(
                "frame {}x{} does not match {}x{}",
                frame.width, frame.height, format.width, format.height
            )));
        }

        let gop = (format.frame_rate as u64 * format.iframe_interval_secs.max(1) as u64).max(1);
        let checksum = frame
            .data
            .iter()
            .step_by(997)
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        let mut data = self.frames_in.to_le_bytes().to_vec();
        data.push(checksum);

        let info = BufferInfo {
            offset: 0,
            size: data.len(),
            presentation_time_us: (self.frames_in * 1_000_000 / format.frame_rate.max(1) as u64)
                as i64,
            flags: BufferFlags {
                key_frame: self.frames_in % gop == 0,
                ..BufferFlags::default()
            },
        };
        self.pending.push_back(EncodedPacket { data, info });
        self.frames_in += 1;
        Ok(())
    }

    fn dequeue_output(
        &mut self,
        timeout: Duration,
    ) -> Result<EncoderOutput<MockFormat>, ExportError> {
        if !self.started {
            return Err(ExportError::Encoder("dequeue before start".to_string()));
        }
        if !self.format_announced {
            self.format_announced = true;
            let format = self
                .negotiated()
                .ok_or_else(|| ExportError::Encoder("no format".to_string()))?;
            return Ok(EncoderOutput::FormatChanged(format));
        }
        if !self.config_sent {
            self.config_sent = true;
            let data = vec![0, 0, 0, 1, 0x67];
            return Ok(EncoderOutput::Buffer(EncodedPacket {
                info: BufferInfo {
                    offset: 0,
                    size: data.len(),
                    presentation_time_us: 0,
                    flags: BufferFlags {
                        codec_config: true,
                        ..BufferFlags::default()
                    },
                },
                data,
            }));
        }
        if self.pending.len() > self.options.latency || (self.input_ended && !self.pending.is_empty())
        {
            if let Some(packet) = self.pending.pop_front() {
                trace!(pts = packet.info.presentation_time_us, "Mock packet out");
                return Ok(EncoderOutput::Buffer(packet));
            }
        }
        if self.input_ended && !self.eos_sent && !self.options.stall_end_of_stream {
            self.eos_sent = true;
            return Ok(EncoderOutput::Buffer(EncodedPacket {
                data: Vec::new(),
                info: BufferInfo {
                    flags: BufferFlags {
                        end_of_stream: true,
                        ..BufferFlags::default()
                    },
                    ..BufferInfo::default()
                },
            }));
        }
        if self.input_ended {
            std::thread::sleep(timeout);
        }
        Ok(EncoderOutput::TryAgainLater)
    }

    fn output_format(&self) -> Option<MockFormat> {
        self.negotiated()
    }

    fn signal_end_of_input(&mut self) -> Result<(), ExportError> {
        self.input_ended = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        self.started = false;
        self.pending.clear();
        Ok(())
    }
}

/// Writes a `MockContainer` on `stop`. The file exists from creation on.
#[derive(Debug)]
pub struct MockWriter {
    path: PathBuf,
    container: MockContainer,
    started: bool,
}

impl MockWriter {
    fn create(path: &Path) -> Result<Self, ExportError> {
        File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            container: MockContainer::default(),
            started: false,
        })
    }
}

impl ContainerWriter for MockWriter {
    type Format = MockFormat;

    fn add_track(&mut self, format: &MockFormat) -> Result<usize, ExportError> {
        self.container.tracks.push(format.clone());
        Ok(self.container.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), ExportError> {
        self.started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ExportError> {
        if track >= self.container.tracks.len() {
            return Err(ExportError::Container(format!("unknown track {}", track)));
        }
        let end = (info.offset + info.size).min(data.len());
        let start = info.offset.min(end);
        self.container.samples.push(MockSample {
            track,
            time_us: info.presentation_time_us,
            flags: info.flags,
            data: data[start..end].to_vec(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        self.started = false;
        self.container.save(&self.path)
    }
}

#[derive(Debug)]
pub struct MockDemuxer {
    container: MockContainer,
    /// Sample indices of the selected track, in file order.
    selected: Vec<usize>,
    position: usize,
}

impl MockDemuxer {
    fn open(path: &Path) -> Result<Self, ExportError> {
        Ok(Self {
            container: MockContainer::load(path)?,
            selected: Vec::new(),
            position: 0,
        })
    }

    fn current(&self) -> Option<&MockSample> {
        self.selected
            .get(self.position)
            .and_then(|i| self.container.samples.get(*i))
    }
}

impl Demuxer for MockDemuxer {
    type Format = MockFormat;

    fn track_count(&self) -> usize {
        self.container.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<MockFormat> {
        self.container.tracks.get(index).cloned()
    }

    fn select_track(&mut self, index: usize) -> Result<(), ExportError> {
        if index >= self.container.tracks.len() {
            return Err(ExportError::Container(format!("no track {}", index)));
        }
        self.selected = self
            .container
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.track == index)
            .map(|(i, _)| i)
            .collect();
        self.position = 0;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>, ExportError> {
        let Some(sample) = self.current() else {
            return Ok(None);
        };
        buf.clear();
        buf.extend_from_slice(&sample.data);
        Ok(Some(SampleInfo {
            size: sample.data.len(),
            time_us: sample.time_us,
            flags: SampleFlags {
                sync: sample.flags.key_frame,
                partial_frame: sample.flags.partial_frame,
                encrypted: false,
            },
        }))
    }

    fn advance(&mut self) -> Result<bool, ExportError> {
        if self.position < self.selected.len() {
            self.position += 1;
        }
        Ok(self.position < self.selected.len())
    }

    fn seek_to_sync(&mut self, time_us: i64) -> Result<(), ExportError> {
        let samples = &self.container.samples;
        let at_start = self
            .selected
            .first()
            .map_or(true, |i| time_us <= samples[*i].time_us);
        if at_start {
            self.position = 0;
            return Ok(());
        }
        self.position = self
            .selected
            .iter()
            .enumerate()
            .filter(|(_, i)| samples[**i].flags.key_frame && samples[**i].time_us <= time_us)
            .map(|(pos, _)| pos)
            .last()
            .unwrap_or(0);
        Ok(())
    }
}
