//! Background Export Tests
//!
//! Both exports through their job handles, with mock media for the movie.

mod common;

use keepsake_core::catalog::TemplateCatalog;
use keepsake_core::config::{PageConfig, VideoConfig};
use keepsake_core::export::{spawn_movie_export, spawn_scrapbook_export, ExportOutcome};
use keepsake_core::video_wrapper::mock::{MockBackend, MockContainer};
use keepsake_core::AudioRef;
use std::time::{Duration, Instant};

fn video_config() -> VideoConfig {
    VideoConfig {
        width: 48,
        height: 27,
        frame_rate: 10,
        photo_duration_secs: 1,
        drain_timeout_ms: 1,
        end_of_stream_deadline_ms: 2_000,
        ..VideoConfig::default()
    }
}

#[test]
fn scrapbook_job_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("book.pdf");
    let template = TemplateCatalog::default().find_by_id("floral").clone();

    let job = spawn_scrapbook_export(
        common::library(dir.path()),
        vec![common::photo("a", 80, 60), common::photo("b", 60, 80)],
        template,
        PageConfig::default(),
        out.clone(),
    );
    assert_eq!(job.wait(), ExportOutcome::Succeeded(out.clone()));
    assert!(std::fs::read(&out).unwrap().starts_with(b"%PDF"));
}

#[test]
fn empty_selection_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("book.pdf");
    let template = TemplateCatalog::default().default_template().clone();

    let mut job = spawn_scrapbook_export(
        common::library(dir.path()),
        Vec::new(),
        template,
        PageConfig::default(),
        out.clone(),
    );
    let outcome = job.try_outcome().unwrap();
    assert!(!outcome.is_success());
    assert!(!out.exists());

    let job = spawn_movie_export(
        MockBackend::default(),
        common::library(dir.path()),
        Vec::new(),
        None,
        video_config(),
        dir.path().join("movie.mock"),
    );
    assert!(matches!(job.wait(), ExportOutcome::Failed(_)));
}

/// Two photos at 10 fps for one second each, with a 0.5s clip looped under them.
#[test]
fn movie_job_muxes_looped_audio() {
    let dir = tempfile::tempdir().unwrap();
    common::write_audio(&dir.path().join("tune.mock"), 5, 100_000, Some(500_000));
    let out = dir.path().join("movie.mock");

    let job = spawn_movie_export(
        MockBackend::default(),
        common::library(dir.path()),
        vec![common::photo("a", 80, 60), common::photo("b", 60, 80)],
        Some(AudioRef::Resource("tune.mock".into())),
        video_config(),
        out.clone(),
    );
    assert_eq!(job.wait(), ExportOutcome::Succeeded(out.clone()));

    let container = MockContainer::load(&out).unwrap();
    assert_eq!(container.tracks.len(), 2);
    let video_last = container
        .track_samples(0)
        .map(|s| s.time_us)
        .max()
        .unwrap();
    assert_eq!(video_last, 1_900_000);

    let audio: Vec<i64> = container.track_samples(1).map(|s| s.time_us).collect();
    assert!(audio.windows(2).all(|w| w[0] < w[1]));
    assert!(audio.iter().all(|t| *t < video_last));
    assert_eq!(audio.len(), 19);
}

#[test]
fn movie_job_reports_failure_when_no_photo_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("movie.mock");

    let job = spawn_movie_export(
        MockBackend::default(),
        common::library(dir.path()),
        vec![keepsake_core::PhotoRef::new("broken.jpg")],
        None,
        video_config(),
        out.clone(),
    );
    match job.wait() {
        ExportOutcome::Failed(message) => assert!(!message.is_empty()),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!out.exists());
}

/// Polling first must not lose the outcome that `wait` later returns.
#[test]
fn polled_outcome_is_kept_for_wait() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("book.pdf");
    let template = TemplateCatalog::default().find_by_id("tech").clone();

    let mut job = spawn_scrapbook_export(
        common::library(dir.path()),
        vec![common::photo("a", 40, 30)],
        template,
        PageConfig::default(),
        out.clone(),
    );

    let began = Instant::now();
    let polled = loop {
        if let Some(outcome) = job.try_outcome() {
            break outcome;
        }
        assert!(began.elapsed() < Duration::from_secs(60), "export never finished");
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(polled, ExportOutcome::Succeeded(out.clone()));
    assert_eq!(job.try_outcome(), Some(polled.clone()));
    assert_eq!(job.wait(), polled);
}

#[test]
fn movie_scratch_is_removed_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let song = dir.path().join("song.mock");
    common::write_audio(&song, 5, 100_000, None);
    let out = dir.path().join("movie.mock");

    let config = VideoConfig {
        scratch_dir: Some(scratch.path().to_path_buf()),
        ..video_config()
    };
    let job = spawn_movie_export(
        MockBackend::default(),
        common::library(dir.path()),
        vec![common::photo("a", 80, 60)],
        Some(AudioRef::Content(song.display().to_string())),
        config,
        out.clone(),
    );
    assert_eq!(job.wait(), ExportOutcome::Succeeded(out.clone()));
    assert_eq!(MockContainer::load(&out).unwrap().tracks.len(), 2);
    assert!(common::leftovers(scratch.path()).is_empty());
}

#[test]
fn movie_scratch_is_removed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out = dir.path().join("movie.mock");

    let config = VideoConfig {
        scratch_dir: Some(scratch.path().to_path_buf()),
        ..video_config()
    };
    let job = spawn_movie_export(
        MockBackend::default(),
        common::library(dir.path()),
        vec![keepsake_core::PhotoRef::new("broken.jpg")],
        None,
        config,
        out.clone(),
    );
    assert!(matches!(job.wait(), ExportOutcome::Failed(_)));
    assert!(!out.exists());
    assert!(common::leftovers(scratch.path()).is_empty());
}
