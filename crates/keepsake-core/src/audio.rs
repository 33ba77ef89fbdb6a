//! # Audio Module
//!
//! Soundtrack duration lookup for the movie reconciler.
//!
//! Container metadata is the first source for the length of one audio loop;
//! when it is missing, symphonia reads the stream here. Only packet
//! headers are read, nothing is decoded.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::{debug, instrument};

/// Duration of the default audio track of the file at `path`, in microseconds.
///
/// Uses the declared frame count when the container carries one and
/// otherwise sums packet durations. Returns `Ok(None)` when the stream has
/// no usable timing (no sample rate or time base, or zero length).
#[instrument(level = "debug", fields(path = %path.display()))]
pub fn read_duration_us(path: &Path) -> Result<Option<i64>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unsupported format")?;

    let mut format = detected.format;
    let track = format.default_track().context("No track found")?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let time_base = params
        .time_base
        .or_else(|| params.sample_rate.map(|rate| TimeBase::new(1, rate)));
    let Some(time_base) = time_base else {
        return Ok(None);
    };

    let frames = match params.n_frames {
        Some(frames) => frames,
        None => {
            let mut end = 0u64;
            loop {
                let packet = match format.next_packet() {
                    Ok(packet) => packet,
                    Err(symphonia::core::errors::Error::IoError(_)) => break,
                    Err(e) => return Err(e).context("Failed to read packet"),
                };
                if packet.track_id() != track_id {
                    continue;
                }
                end = end.max(packet.ts() + packet.dur());
            }
            end
        }
    };

    let time = time_base.calc_time(frames);
    let duration_us = (time.seconds as f64 * 1_000_000.0 + time.frac * 1_000_000.0) as i64;
    debug!(frames, duration_us, "Probed audio duration");

    Ok((duration_us > 0).then_some(duration_us))
}
