//! # Audio/Video Muxing
//!
//! Merges a silent video with a soundtrack. The video's length is
//! authoritative: shorter audio is looped, longer audio is trimmed, and no
//! audio sample is written at or past the video duration.
//!
//! Any problem with the audio (unresolvable reference, no audio track,
//! unreadable stream) degrades the result to video only.

use crate::audio::read_duration_us;
use crate::errors::ExportError;
use crate::types::AudioRef;
use crate::video_wrapper::{
    BufferInfo, Demuxer, MediaBackend, Muxer, SampleInfo, TrackFormat,
};
use crate::MediaResolver;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, trace, warn};

/// Audio timing against the authoritative video duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTimeline {
    pub video_duration_us: i64,
    /// Length of one pass over the audio; zero or less disables looping.
    pub audio_duration_us: i64,
    /// Total length of the passes already written.
    pub offset_us: i64,
}

impl AudioTimeline {
    pub fn new(video_duration_us: i64, audio_duration_us: i64) -> Self {
        Self {
            video_duration_us,
            audio_duration_us,
            offset_us: 0,
        }
    }

    /// Output timestamp of a sample from the current pass.
    pub fn effective(&self, sample_time_us: i64) -> i64 {
        sample_time_us + self.offset_us
    }

    /// Whether a sample at output time `effective_us` may be written.
    pub fn admits(&self, effective_us: i64) -> bool {
        effective_us < self.video_duration_us
    }

    /// Whether another pass would start before the video ends.
    pub fn can_loop(&self) -> bool {
        self.audio_duration_us > 0
            && self.offset_us + self.audio_duration_us < self.video_duration_us
    }

    /// Moves the offset past a finished pass whose last sample was at
    /// `last_sample_us`. The pass is never shorter than its own samples, so
    /// output timestamps keep increasing even when the declared duration is short.
    pub fn complete_pass(&mut self, last_sample_us: i64) {
        self.offset_us += self.audio_duration_us.max(last_sample_us + 1);
    }
}

/// Summary of a mux run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxReport {
    pub video_samples: u64,
    pub audio_samples: u64,
    /// Extra passes over the audio after the first.
    pub audio_loops: u32,
    pub video_duration_us: i64,
    pub audio_included: bool,
}

/// An opened soundtrack. `_scratch` keeps the copied audio alive until the mux ends.
struct PreparedAudio<D> {
    demuxer: D,
    track_format_index: usize,
    duration_us: i64,
    _scratch: Option<NamedTempFile>,
}

/// Merges `silent_video` with `audio` into `output`, copying non-bundled
/// audio to the system temp dir first.
pub fn mux_audio<B: MediaBackend>(
    backend: &B,
    resolver: &dyn MediaResolver,
    silent_video: &Path,
    audio: Option<&AudioRef>,
    output: &Path,
) -> Result<MuxReport, ExportError> {
    mux_audio_in(backend, resolver, silent_video, audio, output, &std::env::temp_dir())
}

/// Merges `silent_video` with `audio` into `output`, with any audio copy
/// made under `scratch_dir` and deleted before returning.
///
/// Without audio the video is copied byte for byte. On failure `output` is removed.
#[instrument(level = "info", skip(backend, resolver), fields(video = %silent_video.display(), output = %output.display(), audio = ?audio.map(|a| a.to_string())))]
pub fn mux_audio_in<B: MediaBackend>(
    backend: &B,
    resolver: &dyn MediaResolver,
    silent_video: &Path,
    audio: Option<&AudioRef>,
    output: &Path,
    scratch_dir: &Path,
) -> Result<MuxReport, ExportError> {
    let Some(audio) = audio else {
        if let Err(e) = std::fs::copy(silent_video, output) {
            warn!("Copying video failed: {}", e);
            let _ = std::fs::remove_file(output);
            return Err(e.into());
        }
        info!("No audio; copied video verbatim");
        return Ok(MuxReport::default());
    };

    let result = reconcile(backend, resolver, silent_video, audio, output, scratch_dir);
    if let Err(e) = &result {
        warn!("Mux failed: {}", e);
        if output.exists() {
            let _ = std::fs::remove_file(output);
        }
    }
    result
}

fn reconcile<B: MediaBackend>(
    backend: &B,
    resolver: &dyn MediaResolver,
    silent_video: &Path,
    audio: &AudioRef,
    output: &Path,
    scratch_dir: &Path,
) -> Result<MuxReport, ExportError> {
    let mut video = backend.open_demuxer(silent_video)?;
    let video_index = (0..video.track_count())
        .find(|i| video.track_format(*i).is_some_and(|f| f.is_video()))
        .ok_or_else(|| ExportError::NoVideoTrack(silent_video.display().to_string()))?;
    video.select_track(video_index)?;
    let video_format = video
        .track_format(video_index)
        .ok_or_else(|| ExportError::NoVideoTrack(silent_video.display().to_string()))?;

    let mut muxer = Muxer::new(backend.create_writer(output)?);
    let video_track = muxer.add_track(&video_format)?;

    let mut buf = Vec::new();
    let video_duration_us = scan_max_time(&mut video, &mut buf)?;
    video.seek_to_sync(0)?;
    debug!(video_duration_us, "Scanned video");

    let mut prepared = match prepare_audio(backend, resolver, audio, scratch_dir) {
        Ok(prepared) => Some(prepared),
        Err(e) => {
            warn!(audio = %audio, "Audio unavailable, writing video only: {}", e);
            None
        }
    };

    let mut audio_track = None;
    if let Some(p) = &prepared {
        match p
            .demuxer
            .track_format(p.track_format_index)
            .map(|format| muxer.add_track(&format))
        {
            Some(Ok(track)) => audio_track = Some(track),
            Some(Err(e)) => {
                warn!(audio = %audio, "Audio track rejected, writing video only: {}", e);
            }
            None => warn!(audio = %audio, "Audio track vanished, writing video only"),
        }
    }
    if audio_track.is_none() {
        prepared = None;
    }

    muxer.start()?;

    let mut report = MuxReport {
        video_duration_us,
        audio_included: prepared.is_some(),
        ..MuxReport::default()
    };
    let mut timeline = AudioTimeline::new(
        video_duration_us,
        prepared.as_ref().map(|p| p.duration_us).unwrap_or(0),
    );
    let mut audio_buf = Vec::new();
    let mut video_done = false;
    let mut audio_done = prepared.is_none();
    let mut pass_samples = 0u64;
    let mut pass_last_us = 0i64;

    while !video_done || !audio_done {
        if !video_done {
            match video.read_sample(&mut buf)? {
                Some(sample) => {
                    let info = buffer_info(&sample, sample.time_us);
                    muxer.write_sample(video_track, &buf, &info)?;
                    report.video_samples += 1;
                    video.advance()?;
                }
                None => video_done = true,
            }
        }

        if let (false, Some(p), Some(track)) = (audio_done, prepared.as_mut(), audio_track) {
            match p.demuxer.read_sample(&mut audio_buf)? {
                Some(sample) => {
                    let effective = timeline.effective(sample.time_us);
                    if !timeline.admits(effective) {
                        debug!(effective, "Trimming audio at video duration");
                        audio_done = true;
                        continue;
                    }
                    trace!(effective, size = sample.size, "Audio sample");
                    let info = buffer_info(&sample, effective);
                    muxer.write_sample(track, &audio_buf, &info)?;
                    report.audio_samples += 1;
                    pass_samples += 1;
                    pass_last_us = sample.time_us;
                    p.demuxer.advance()?;
                }
                None if pass_samples > 0 && timeline.can_loop() => {
                    p.demuxer.seek_to_sync(0)?;
                    timeline.complete_pass(pass_last_us);
                    report.audio_loops += 1;
                    pass_samples = 0;
                    debug!(offset_us = timeline.offset_us, "Looping audio");
                }
                None => audio_done = true,
            }
        }
    }

    muxer.stop()?;
    info!(
        video_samples = report.video_samples,
        audio_samples = report.audio_samples,
        loops = report.audio_loops,
        "Muxed"
    );
    Ok(report)
}

fn buffer_info(sample: &SampleInfo, time_us: i64) -> BufferInfo {
    BufferInfo {
        offset: 0,
        size: sample.size,
        presentation_time_us: time_us,
        flags: sample.flags.to_buffer_flags(),
    }
}

/// Reads the selected track to its end and returns the largest sample time.
fn scan_max_time<D: Demuxer>(demuxer: &mut D, buf: &mut Vec<u8>) -> Result<i64, ExportError> {
    let mut max = 0;
    while let Some(sample) = demuxer.read_sample(buf)? {
        max = max.max(sample.time_us);
        if !demuxer.advance()? {
            break;
        }
    }
    Ok(max)
}

/// Length of the selected track: last sample time plus the last sample spacing.
fn scan_duration<D: Demuxer>(demuxer: &mut D, buf: &mut Vec<u8>) -> Result<i64, ExportError> {
    let mut last = None;
    let mut step = 0;
    while let Some(sample) = demuxer.read_sample(buf)? {
        if let Some(prev) = last {
            step = sample.time_us - prev;
        }
        last = Some(sample.time_us);
        if !demuxer.advance()? {
            break;
        }
    }
    Ok(last.map(|t| t + step.max(0)).unwrap_or(0))
}

fn prepare_audio<B: MediaBackend>(
    backend: &B,
    resolver: &dyn MediaResolver,
    audio: &AudioRef,
    scratch_dir: &Path,
) -> Result<PreparedAudio<B::Demuxer>, ExportError> {
    let (path, scratch): (PathBuf, Option<NamedTempFile>) = match audio {
        AudioRef::Resource(name) => {
            let path = resolver.resource_path(name).ok_or_else(|| {
                ExportError::Anyhow(anyhow::anyhow!("Bundled audio not found: {}", name))
            })?;
            (path, None)
        }
        AudioRef::Content(reference) => {
            let bytes = resolver.load_bytes(reference)?;
            let suffix = Path::new(reference)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_default();
            let mut scratch = tempfile::Builder::new()
                .prefix("keepsake-audio-")
                .suffix(&suffix)
                .tempfile_in(scratch_dir)?;
            scratch.write_all(&bytes)?;
            scratch.flush()?;
            (scratch.path().to_path_buf(), Some(scratch))
        }
    };

    let mut demuxer = backend.open_demuxer(&path)?;
    let index = (0..demuxer.track_count())
        .find(|i| demuxer.track_format(*i).is_some_and(|f| f.is_audio()))
        .ok_or_else(|| ExportError::Container(format!("No audio track in {}", audio)))?;
    demuxer.select_track(index)?;

    let declared = demuxer
        .track_format(index)
        .and_then(|f| f.duration_us())
        .filter(|d| *d > 0);
    let duration_us = match declared {
        Some(d) => d,
        None => match read_duration_us(&path) {
            Ok(Some(d)) => d,
            other => {
                if let Err(e) = other {
                    debug!("Audio duration lookup failed, scanning samples: {}", e);
                }
                let mut buf = Vec::new();
                let scanned = scan_duration(&mut demuxer, &mut buf)?;
                demuxer.seek_to_sync(0)?;
                scanned
            }
        },
    };
    if duration_us <= 0 {
        warn!(audio = %audio, "Audio length unknown; it will play once without looping");
    }
    debug!(audio = %audio, duration_us, "Prepared audio");

    Ok(PreparedAudio {
        demuxer,
        track_format_index: index,
        duration_us,
        _scratch: scratch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_trims_at_video_duration() {
        let timeline = AudioTimeline::new(1_000, 400);
        assert!(timeline.admits(999));
        assert!(!timeline.admits(1_000));
    }

    #[test]
    fn timeline_loops_only_while_video_remains() {
        let mut timeline = AudioTimeline::new(1_000, 400);
        assert!(timeline.can_loop());
        timeline.complete_pass(300);
        assert_eq!(timeline.offset_us, 400);
        assert!(timeline.can_loop());
        timeline.complete_pass(300);
        assert_eq!(timeline.offset_us, 800);
        assert!(!timeline.can_loop());
    }

    #[test]
    fn zero_length_audio_never_loops() {
        let timeline = AudioTimeline::new(1_000, 0);
        assert!(!timeline.can_loop());
    }

    #[test]
    fn short_declared_duration_keeps_timestamps_increasing() {
        let mut timeline = AudioTimeline::new(10_000, 100);
        timeline.complete_pass(500);
        assert_eq!(timeline.offset_us, 501);
        assert!(timeline.effective(0) > 500);
    }
}
