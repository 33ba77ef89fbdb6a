//! Soundtrack Mux Tests
//!
//! Looping, trimming and video-only fallback against mock containers.

mod common;

use keepsake_core::export::{mux_audio, mux_audio_in};
use keepsake_core::video_wrapper::mock::{MockBackend, MockContainer, MockFormat};
use keepsake_core::{AudioRef, ExportError};
use std::path::Path;

/// Ten video frames 100ms apart: the video lasts 900ms by its last timestamp.
fn video_fixture(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("silent.mock");
    common::write_video(&path, 10, 100_000);
    path
}

fn audio_times(path: &Path) -> Vec<i64> {
    MockContainer::load(path)
        .unwrap()
        .track_samples(1)
        .map(|s| s.time_us)
        .collect()
}

#[test]
fn no_audio_copies_video_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    let out = dir.path().join("movie.mock");

    let resolver = common::resolver(dir.path());
    let report = mux_audio(&MockBackend::default(), &resolver, &video, None, &out).unwrap();
    assert!(!report.audio_included);
    assert_eq!(std::fs::read(&video).unwrap(), std::fs::read(&out).unwrap());
}

#[test]
fn short_audio_loops_until_video_ends() {
    let dir = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    common::write_audio(&dir.path().join("beat.mock"), 4, 100_000, None);
    let out = dir.path().join("movie.mock");

    let resolver = common::resolver(dir.path());
    let audio = AudioRef::Resource("beat.mock".into());
    let report = mux_audio(&MockBackend::default(), &resolver, &video, Some(&audio), &out).unwrap();

    assert!(report.audio_included);
    assert_eq!(report.video_samples, 10);
    assert_eq!(report.video_duration_us, 900_000);
    assert_eq!(report.audio_loops, 2);

    let times = audio_times(&out);
    assert_eq!(
        times,
        vec![0, 100_000, 200_000, 300_000, 400_000, 500_000, 600_000, 700_000, 800_000]
    );
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert!(times.iter().all(|t| *t < report.video_duration_us));

    let container = MockContainer::load(&out).unwrap();
    assert!(container.tracks[0].mime.starts_with("video/"));
    assert!(container.tracks[1].mime.starts_with("audio/"));
    assert!(container.track_samples(0).next().unwrap().flags.key_frame);
}

#[test]
fn long_audio_is_trimmed() {
    let dir = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    let song = dir.path().join("song.mock");
    common::write_audio(&song, 40, 50_000, Some(2_000_000));
    let out = dir.path().join("movie.mock");

    let resolver = common::resolver(dir.path());
    let audio = AudioRef::Content(song.display().to_string());
    let report = mux_audio(&MockBackend::default(), &resolver, &video, Some(&audio), &out).unwrap();

    assert_eq!(report.audio_loops, 0);
    let times = audio_times(&out);
    assert_eq!(times.len(), 18);
    assert_eq!(*times.last().unwrap(), 850_000);
}

/// A declared duration shorter than the samples still keeps time moving forward.
#[test]
fn short_declared_duration_stays_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    common::write_audio(&dir.path().join("clip.mock"), 3, 100_000, Some(50_000));
    let out = dir.path().join("movie.mock");

    let resolver = common::resolver(dir.path());
    let audio = AudioRef::Resource("clip.mock".into());
    mux_audio(&MockBackend::default(), &resolver, &video, Some(&audio), &out).unwrap();

    let times = audio_times(&out);
    assert!(times.len() > 3);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert!(times.iter().all(|t| *t < 900_000));
}

#[test]
fn unusable_audio_falls_back_to_video_only() {
    let dir = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    let garbage = dir.path().join("garbage.mp3");
    std::fs::write(&garbage, b"ID3 definitely not a container").unwrap();
    let video_only = dir.path().join("video_only.mock");
    common::write_video(&video_only, 3, 100_000);

    let resolver = common::resolver(dir.path());
    let cases = [
        AudioRef::Content(garbage.display().to_string()),
        AudioRef::Content("broken-picker-grant".into()),
        AudioRef::Resource("missing.mock".into()),
        AudioRef::Content(video_only.display().to_string()),
    ];

    for (n, audio) in cases.iter().enumerate() {
        let out = dir.path().join(format!("movie{}.mock", n));
        let report =
            mux_audio(&MockBackend::default(), &resolver, &video, Some(audio), &out).unwrap();
        assert!(!report.audio_included, "{}", audio);
        assert_eq!(report.video_samples, 10);

        let container = MockContainer::load(&out).unwrap();
        assert_eq!(container.tracks.len(), 1);
        assert_eq!(container.samples.len(), 10);
    }
}

#[test]
fn missing_video_track_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let not_video = dir.path().join("audio_only.mock");
    common::write_audio(&not_video, 5, 100_000, None);
    common::write_audio(&dir.path().join("beat.mock"), 4, 100_000, None);
    let out = dir.path().join("movie.mock");

    let resolver = common::resolver(dir.path());
    let audio = AudioRef::Resource("beat.mock".into());
    let err = mux_audio(&MockBackend::default(), &resolver, &not_video, Some(&audio), &out)
        .unwrap_err();
    assert!(matches!(err, ExportError::NoVideoTrack(_)));
    assert!(!out.exists());
}

#[test]
fn audio_format_carries_through() {
    let dir = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    let song = dir.path().join("tagged.mock");
    MockContainer::single_track(MockFormat::audio().with_duration(300_000), 3, 100_000, 1)
        .save(&song)
        .unwrap();
    let out = dir.path().join("movie.mock");

    let resolver = common::resolver(dir.path());
    let audio = AudioRef::Content(song.display().to_string());
    let report = mux_audio(&MockBackend::default(), &resolver, &video, Some(&audio), &out).unwrap();

    assert_eq!(report.audio_loops, 2);
    let container = MockContainer::load(&out).unwrap();
    assert_eq!(container.tracks[1].duration_us, Some(300_000));
    assert_eq!(
        audio_times(&out),
        vec![0, 100_000, 200_000, 300_000, 400_000, 500_000, 600_000, 700_000, 800_000]
    );
}

/// A failed copy of the silent video leaves nothing at the destination.
#[test]
fn failed_video_copy_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("movie.mock");
    std::fs::write(&out, b"stale partial output").unwrap();

    let resolver = common::resolver(dir.path());
    let missing = dir.path().join("never-encoded.mock");
    let err = mux_audio(&MockBackend::default(), &resolver, &missing, None, &out).unwrap_err();
    assert!(matches!(err, ExportError::IoError(_)));
    assert!(!out.exists());
}

/// The scratch copy of non-bundled audio is made in the given directory and
/// deleted again, whether the mux succeeds or falls back to video only.
#[test]
fn audio_scratch_copy_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let video = video_fixture(dir.path());
    let song = dir.path().join("song.mock");
    common::write_audio(&song, 4, 100_000, None);
    let garbage = dir.path().join("garbage.mp3");
    std::fs::write(&garbage, b"not audio").unwrap();

    let resolver = common::resolver(dir.path());
    for (n, source) in [&song, &garbage].iter().enumerate() {
        let out = dir.path().join(format!("movie{}.mock", n));
        let audio = AudioRef::Content(source.display().to_string());
        let report = mux_audio_in(
            &MockBackend::default(),
            &resolver,
            &video,
            Some(&audio),
            &out,
            scratch.path(),
        )
        .unwrap();
        assert_eq!(report.audio_included, n == 0);
        assert!(common::leftovers(scratch.path()).is_empty());
    }
}
