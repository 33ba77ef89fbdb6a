//! FFmpeg backend via the `ffmpeg-next` bindings re-exported by `video-rs`.
//!
//! - Encoder: H.264/HEVC through NVENC, QSV or AMF when available, else the
//!   software codec. RGBA frames are converted to the encoder's YUV layout.
//! - Demuxer: `avformat` input with one selected stream and a one-packet lookahead.
//! - Writer: stream-copy `avformat` output; codec-config buffers are skipped
//!   since parameter sets travel in the track's extradata.

use super::{
    BufferFlags, BufferInfo, ContainerWriter, Demuxer, EncodedPacket, EncoderOutput,
    MediaBackend, RgbaFrame, SampleFlags, SampleInfo, TrackFormat, VideoEncoder, VideoFormat,
};
use crate::config::HardwareAccel;
use crate::errors::ExportError;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, trace, warn};
use video_rs::ffmpeg::{self, codec, format, media, software, Rational, Rescale};

const MICROS: Rational = Rational(1, 1_000_000);

fn encoder_error(context: &str, e: ffmpeg::Error) -> ExportError {
    ExportError::Encoder(format!("{}: {}", context, e))
}

fn container_error(context: &str, e: ffmpeg::Error) -> ExportError {
    ExportError::Container(format!("{}: {}", context, e))
}

fn init() -> Result<(), ExportError> {
    ffmpeg::init().map_err(|e| encoder_error("FFmpeg init", e))
}

/// Codec parameters of one track plus its timing.
#[derive(Clone)]
pub struct FfmpegFormat {
    pub parameters: codec::Parameters,
    pub time_base: Rational,
    pub duration_us: Option<i64>,
}

impl fmt::Debug for FfmpegFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegFormat")
            .field("mime", &self.mime())
            .field("time_base", &self.time_base)
            .field("duration_us", &self.duration_us)
            .finish()
    }
}

impl TrackFormat for FfmpegFormat {
    fn mime(&self) -> String {
        let kind = match self.parameters.medium() {
            media::Type::Video => "video",
            media::Type::Audio => "audio",
            media::Type::Subtitle => "text",
            _ => "application",
        };
        format!("{}/{}", kind, self.parameters.id().name())
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    type Format = FfmpegFormat;
    type Encoder = FfmpegEncoder;
    type Demuxer = FfmpegDemuxer;
    type Writer = FfmpegWriter;

    fn create_encoder(&self, mime: &str) -> Result<FfmpegEncoder, ExportError> {
        FfmpegEncoder::new(mime)
    }

    fn open_demuxer(&self, path: &Path) -> Result<FfmpegDemuxer, ExportError> {
        FfmpegDemuxer::open(path)
    }

    fn create_writer(&self, path: &Path) -> Result<FfmpegWriter, ExportError> {
        FfmpegWriter::create(path)
    }
}

fn codec_for_mime(mime: &str) -> Option<codec::Id> {
    match mime {
        "video/avc" | "video/h264" => Some(codec::Id::H264),
        "video/hevc" | "video/h265" => Some(codec::Id::HEVC),
        "video/mp4v-es" | "video/mpeg4" => Some(codec::Id::MPEG4),
        _ => None,
    }
}

/// Prefix of the vendor encoder names for a codec, e.g. `h264_nvenc`.
fn hardware_family(id: codec::Id) -> Option<&'static str> {
    match id {
        codec::Id::H264 => Some("h264"),
        codec::Id::HEVC => Some("hevc"),
        _ => None,
    }
}

/// QuickSync only takes NV12; everything else here takes planar 4:2:0.
fn pixel_format_for(encoder_name: &str) -> format::Pixel {
    if encoder_name.ends_with("_qsv") {
        format::Pixel::NV12
    } else {
        format::Pixel::YUV420P
    }
}

/// Encoders registered in this FFmpeg build for `id`, in the order to try them.
fn encoder_candidates(id: codec::Id, accel: HardwareAccel) -> Vec<codec::Codec> {
    let mut candidates: Vec<codec::Codec> = hardware_family(id)
        .map(|family| accel.encoder_names(family))
        .unwrap_or_default()
        .iter()
        .filter_map(|name| codec::encoder::find_by_name(name))
        .collect();
    if accel.allows_software() {
        candidates.extend(codec::encoder::find(id));
    }
    candidates
}

struct Session {
    encoder: codec::encoder::video::Encoder,
    scaler: software::scaling::Context,
    rgba: ffmpeg::util::frame::Video,
    yuv: ffmpeg::util::frame::Video,
    time_base: Rational,
    width: u32,
    height: u32,
}

impl Session {
    fn open(codec: codec::Codec, format: &VideoFormat) -> Result<Self, ExportError> {
        let time_base = Rational::new(1, format.frame_rate.max(1) as i32);
        let pixel = pixel_format_for(codec.name());

        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| encoder_error("Encoder context", e))?;
        context.set_width(format.width);
        context.set_height(format.height);
        context.set_format(pixel);
        context.set_time_base(time_base);
        context.set_frame_rate(Some(Rational::new(format.frame_rate.max(1) as i32, 1)));
        context.set_bit_rate(format.bitrate as usize);
        context.set_gop(format.frame_rate * format.iframe_interval_secs.max(1));
        context.set_max_b_frames(0);
        // MP4 keeps parameter sets out of band.
        context.set_flags(codec::Flags::GLOBAL_HEADER);

        let encoder = context
            .open_as(codec)
            .map_err(|e| encoder_error("Open encoder", e))?;

        let scaler = software::scaling::Context::get(
            format::Pixel::RGBA,
            format.width,
            format.height,
            pixel,
            format.width,
            format.height,
            software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| encoder_error("Scaler init", e))?;

        Ok(Self {
            encoder,
            scaler,
            rgba: ffmpeg::util::frame::Video::new(format::Pixel::RGBA, format.width, format.height),
            yuv: ffmpeg::util::frame::Video::new(pixel, format.width, format.height),
            time_base,
            width: format.width,
            height: format.height,
        })
    }
}

/// Video encoder over the best FFmpeg implementation that opens.
pub struct FfmpegEncoder {
    id: codec::Id,
    encoder_name: Option<String>,
    session: Option<Session>,
    started: bool,
    input_ended: bool,
    eos_sent: bool,
    format_announced: bool,
    frames_in: i64,
    pending: VecDeque<EncodedPacket>,
}

impl fmt::Debug for FfmpegEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegEncoder")
            .field("codec", &self.id)
            .field("encoder", &self.encoder_name)
            .field("started", &self.started)
            .field("frames_in", &self.frames_in)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl FfmpegEncoder {
    fn new(mime: &str) -> Result<Self, ExportError> {
        init()?;
        let id = codec_for_mime(mime)
            .ok_or_else(|| ExportError::Encoder(format!("No encoder for {}", mime)))?;

        Ok(Self {
            id,
            encoder_name: None,
            session: None,
            started: false,
            input_ended: false,
            eos_sent: false,
            format_announced: false,
            frames_in: 0,
            pending: VecDeque::new(),
        })
    }

    fn session(&mut self) -> Result<&mut Session, ExportError> {
        self.session
            .as_mut()
            .ok_or_else(|| ExportError::Encoder("encoder not configured".to_string()))
    }

    /// Moves every packet the codec has ready into `pending`.
    /// Returns `true` once the codec reports end of stream.
    fn collect_packets(&mut self) -> Result<bool, ExportError> {
        let session = self.session()?;
        let time_base = session.time_base;
        let mut ready = Vec::new();
        let mut finished = false;
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match session.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
                    let pts = packet.pts().unwrap_or(0).rescale(time_base, MICROS);
                    ready.push(EncodedPacket {
                        info: BufferInfo {
                            offset: 0,
                            size: data.len(),
                            presentation_time_us: pts,
                            flags: BufferFlags {
                                key_frame: packet.is_key(),
                                ..BufferFlags::default()
                            },
                        },
                        data,
                    });
                }
                Err(ffmpeg::Error::Eof) => {
                    finished = true;
                    break;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    break
                }
                Err(e) => return Err(encoder_error("Receive packet", e)),
            }
        }
        self.pending.extend(ready);
        Ok(finished)
    }

    fn negotiated(&self) -> Option<FfmpegFormat> {
        self.session.as_ref().map(|s| FfmpegFormat {
            parameters: codec::Parameters::from(&s.encoder),
            time_base: s.time_base,
            duration_us: None,
        })
    }
}

impl VideoEncoder for FfmpegEncoder {
    type Format = FfmpegFormat;

    /// Opens the first candidate encoder that accepts the format.
    ///
    /// Hardware encoders are often registered without a usable device, so a
    /// failed open moves on to the next candidate.
    fn configure(&mut self, format: &VideoFormat) -> Result<(), ExportError> {
        let mut last_error = None;
        for codec in encoder_candidates(self.id, format.hardware_accel) {
            match Session::open(codec, format) {
                Ok(session) => {
                    info!(
                        encoder = codec.name(),
                        width = format.width,
                        height = format.height,
                        "Encoder configured"
                    );
                    self.encoder_name = Some(codec.name().to_string());
                    self.session = Some(session);
                    return Ok(());
                }
                Err(e) => {
                    warn!(encoder = codec.name(), "Encoder failed to open, trying next: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ExportError::Encoder(format!(
                "No {:?} encoder available for {:?}",
                self.id, format.hardware_accel
            ))
        }))
    }

    fn start(&mut self) -> Result<(), ExportError> {
        self.session()?;
        self.started = true;
        Ok(())
    }

    fn queue_frame(&mut self, frame: &RgbaFrame) -> Result<(), ExportError> {
        if !self.started || self.input_ended {
            return Err(ExportError::Encoder("encoder not accepting input".to_string()));
        }
        let pts = self.frames_in;
        let session = self.session()?;
        if frame.width != session.width || frame.height != session.height {
            return Err(ExportError::Encoder(format!(
                "frame {}x{} does not match {}x{}",
                frame.width, frame.height, session.width, session.height
            )));
        }

        let row = frame.width as usize * 4;
        let rows = frame.height as usize;
        if frame.data.len() < row * rows {
            return Err(ExportError::Encoder("short frame buffer".to_string()));
        }
        let stride = session.rgba.stride(0);
        let plane = session.rgba.data_mut(0);
        if stride == row {
            plane[..row * rows].copy_from_slice(&frame.data[..row * rows]);
        } else {
            for y in 0..rows {
                plane[y * stride..y * stride + row]
                    .copy_from_slice(&frame.data[y * row..(y + 1) * row]);
            }
        }

        session
            .scaler
            .run(&session.rgba, &mut session.yuv)
            .map_err(|e| encoder_error("Scale frame", e))?;
        session.yuv.set_pts(Some(pts));
        session
            .encoder
            .send_frame(&session.yuv)
            .map_err(|e| encoder_error("Send frame", e))?;

        self.frames_in += 1;
        self.collect_packets()?;
        Ok(())
    }

    fn dequeue_output(
        &mut self,
        _timeout: Duration,
    ) -> Result<EncoderOutput<FfmpegFormat>, ExportError> {
        if !self.started {
            return Err(ExportError::Encoder("dequeue before start".to_string()));
        }
        if !self.format_announced {
            self.format_announced = true;
            if let Some(format) = self.negotiated() {
                return Ok(EncoderOutput::FormatChanged(format));
            }
        }
        if let Some(packet) = self.pending.pop_front() {
            trace!(
                pts = packet.info.presentation_time_us,
                size = packet.info.size,
                "Encoded packet"
            );
            return Ok(EncoderOutput::Buffer(packet));
        }
        if self.input_ended && !self.eos_sent {
            let finished = self.collect_packets()?;
            if let Some(packet) = self.pending.pop_front() {
                return Ok(EncoderOutput::Buffer(packet));
            }
            if finished {
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
        }
        Ok(EncoderOutput::TryAgainLater)
    }

    fn output_format(&self) -> Option<FfmpegFormat> {
        self.negotiated()
    }

    fn signal_end_of_input(&mut self) -> Result<(), ExportError> {
        if self.input_ended {
            return Ok(());
        }
        self.session()?
            .encoder
            .send_eof()
            .map_err(|e| encoder_error("Send EOF", e))?;
        self.input_ended = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        self.started = false;
        self.pending.clear();
        Ok(())
    }
}

/// Reader over one selected stream of a media file.
pub struct FfmpegDemuxer {
    input: format::context::Input,
    selected: Option<usize>,
    current: Option<ffmpeg::Packet>,
    exhausted: bool,
}

impl fmt::Debug for FfmpegDemuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegDemuxer")
            .field("selected", &self.selected)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl FfmpegDemuxer {
    fn open(path: &Path) -> Result<Self, ExportError> {
        init()?;
        let input = format::input(&path)
            .map_err(|e| container_error(&format!("Open {}", path.display()), e))?;
        Ok(Self {
            input,
            selected: None,
            current: None,
            exhausted: false,
        })
    }

    fn time_base(&self) -> Rational {
        self.selected
            .and_then(|i| self.input.stream(i))
            .map(|s| s.time_base())
            .unwrap_or(MICROS)
    }

    /// Loads the next packet of the selected stream into `current`.
    fn fill(&mut self) -> Result<(), ExportError> {
        let Some(selected) = self.selected else {
            return Err(ExportError::Container("no track selected".to_string()));
        };
        while self.current.is_none() && !self.exhausted {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == selected => self.current = Some(packet),
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => self.exhausted = true,
                Err(e) => return Err(container_error("Read packet", e)),
            }
        }
        Ok(())
    }
}

impl Demuxer for FfmpegDemuxer {
    type Format = FfmpegFormat;

    fn track_count(&self) -> usize {
        self.input.nb_streams() as usize
    }

    fn track_format(&self, index: usize) -> Option<FfmpegFormat> {
        let stream = self.input.stream(index)?;
        let time_base = stream.time_base();
        let duration = stream.duration();
        Some(FfmpegFormat {
            parameters: stream.parameters(),
            time_base,
            duration_us: (duration > 0).then(|| duration.rescale(time_base, MICROS)),
        })
    }

    fn select_track(&mut self, index: usize) -> Result<(), ExportError> {
        if index >= self.track_count() {
            return Err(ExportError::Container(format!("no track {}", index)));
        }
        self.selected = Some(index);
        self.current = None;
        self.exhausted = false;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>, ExportError> {
        self.fill()?;
        let time_base = self.time_base();
        let Some(packet) = &self.current else {
            return Ok(None);
        };
        let data = packet.data().unwrap_or(&[]);
        buf.clear();
        buf.extend_from_slice(data);
        let ts = packet.pts().or(packet.dts()).unwrap_or(0);
        Ok(Some(SampleInfo {
            size: data.len(),
            time_us: ts.rescale(time_base, MICROS),
            flags: SampleFlags {
                sync: packet.is_key(),
                partial_frame: false,
                encrypted: false,
            },
        }))
    }

    fn advance(&mut self) -> Result<bool, ExportError> {
        self.fill()?;
        self.current = None;
        self.fill()?;
        Ok(self.current.is_some())
    }

    fn seek_to_sync(&mut self, time_us: i64) -> Result<(), ExportError> {
        // Without a stream index the seek target is in AV_TIME_BASE units (microseconds).
        self.input
            .seek(time_us, ..time_us.saturating_add(1))
            .map_err(|e| container_error("Seek", e))?;
        self.current = None;
        self.exhausted = false;
        Ok(())
    }
}

/// Drops a codec tag copied from the source container (an MKV or MP3 tag is
/// not valid in MP4) so the muxer assigns its own when writing the header.
///
/// `ffmpeg-next` exposes no setter for the tag, hence the raw write.
fn clear_codec_tag(stream: &mut format::stream::StreamMut<'_>) {
    // SAFETY: `parameters()` wraps the AVCodecParameters owned by `stream`,
    // which is alive for this call; only the integer tag field is written,
    // and the header has not been written yet.
    unsafe {
        (*stream.parameters().as_mut_ptr()).codec_tag = 0;
    }
}

/// Stream-copy writer for an output container, format guessed from the file name.
pub struct FfmpegWriter {
    output: format::context::Output,
    time_bases: Vec<Rational>,
}

impl fmt::Debug for FfmpegWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegWriter")
            .field("tracks", &self.time_bases.len())
            .finish()
    }
}

impl FfmpegWriter {
    fn create(path: &Path) -> Result<Self, ExportError> {
        init()?;
        let output = format::output(&path)
            .map_err(|e| container_error(&format!("Create {}", path.display()), e))?;
        Ok(Self {
            output,
            time_bases: Vec::new(),
        })
    }
}

impl ContainerWriter for FfmpegWriter {
    type Format = FfmpegFormat;

    fn add_track(&mut self, format: &FfmpegFormat) -> Result<usize, ExportError> {
        let mut stream = self
            .output
            .add_stream(codec::encoder::find(codec::Id::None))
            .map_err(|e| container_error("Add stream", e))?;
        stream.set_parameters(format.parameters.clone());
        stream.set_time_base(format.time_base);
        clear_codec_tag(&mut stream);
        self.time_bases.push(format.time_base);
        Ok(stream.index())
    }

    fn start(&mut self) -> Result<(), ExportError> {
        self.output
            .write_header()
            .map_err(|e| container_error("Write header", e))?;
        // The muxer may pick its own stream time bases.
        for (i, tb) in self.time_bases.iter_mut().enumerate() {
            if let Some(stream) = self.output.stream(i) {
                *tb = stream.time_base();
            }
        }
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ExportError> {
        if info.flags.codec_config {
            return Ok(());
        }
        let time_base = *self
            .time_bases
            .get(track)
            .ok_or_else(|| ExportError::Container(format!("unknown track {}", track)))?;

        let end = (info.offset + info.size).min(data.len());
        let start = info.offset.min(end);
        let mut packet = ffmpeg::Packet::copy(&data[start..end]);
        let ts = info.presentation_time_us.rescale(MICROS, time_base);
        packet.set_stream(track);
        packet.set_pts(Some(ts));
        packet.set_dts(Some(ts));
        if info.flags.key_frame {
            packet.set_flags(codec::packet::Flags::KEY);
        }
        packet
            .write_interleaved(&mut self.output)
            .map_err(|e| container_error("Write packet", e))
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        self.output
            .write_trailer()
            .map_err(|e| container_error("Write trailer", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quicksync_gets_nv12() {
        assert_eq!(pixel_format_for("h264_qsv"), format::Pixel::NV12);
        assert_eq!(pixel_format_for("h264_nvenc"), format::Pixel::YUV420P);
        assert_eq!(pixel_format_for("libx264"), format::Pixel::YUV420P);
    }

    #[test]
    fn only_h264_and_hevc_have_vendor_encoders() {
        assert_eq!(hardware_family(codec::Id::H264), Some("h264"));
        assert_eq!(hardware_family(codec::Id::HEVC), Some("hevc"));
        assert_eq!(hardware_family(codec::Id::MPEG4), None);
    }

    /// MPEG-4 part 2 ships with every FFmpeg build, so this runs without x264 or a GPU.
    #[test]
    fn software_encoder_track_writes_to_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let mut encoder = FfmpegBackend.create_encoder("video/mp4v-es").unwrap();
        encoder
            .configure(&VideoFormat {
                mime: "video/mp4v-es".into(),
                width: 64,
                height: 36,
                frame_rate: 10,
                bitrate: 400_000,
                iframe_interval_secs: 1,
                hardware_accel: HardwareAccel::Software,
            })
            .unwrap();
        let format = encoder.output_format().unwrap();
        assert!(format.is_video());

        let mut writer = FfmpegBackend.create_writer(&out).unwrap();
        assert_eq!(writer.add_track(&format).unwrap(), 0);
        writer.start().unwrap();
        writer.stop().unwrap();
        assert!(std::fs::metadata(&out).unwrap().len() > 0);
    }

    #[test]
    fn forced_hardware_without_vendor_encoder_fails() {
        let mut encoder = FfmpegBackend.create_encoder("video/mp4v-es").unwrap();
        let err = encoder
            .configure(&VideoFormat {
                mime: "video/mp4v-es".into(),
                width: 64,
                height: 36,
                frame_rate: 10,
                bitrate: 400_000,
                iframe_interval_secs: 1,
                hardware_accel: HardwareAccel::Nvenc,
            })
            .unwrap_err();
        assert!(matches!(err, ExportError::Encoder(_)));
    }
}
