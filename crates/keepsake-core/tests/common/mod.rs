//! Shared fixtures: synthetic photos and mock media files.

#![allow(dead_code)]

use keepsake_core::systems::assets::PhotoLibrary;
use keepsake_core::video_wrapper::mock::{MockContainer, MockFormat};
use keepsake_core::{MediaResolver, PhotoRef};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Sends pipeline logs to the test harness, which shows them for failing tests.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("keepsake_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Serves generated PNGs for references named `<anything>_<W>x<H>.png`,
/// fails for references starting with `broken`, and reads everything else
/// from disk.
pub struct FixtureResolver {
    pub resource_dir: PathBuf,
}

fn parse_size(reference: &str) -> Option<(u32, u32)> {
    let stem = Path::new(reference).file_stem()?.to_str()?;
    let dims = stem.rsplit('_').next()?;
    let (w, h) = dims.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

impl MediaResolver for FixtureResolver {
    fn load_bytes(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
        if reference.starts_with("broken") {
            anyhow::bail!("permission revoked for {}", reference);
        }
        if let Some((w, h)) = parse_size(reference) {
            let img = image::RgbaImage::from_fn(w, h, |x, y| {
                image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
            });
            let mut bytes = Vec::new();
            img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
            return Ok(bytes);
        }
        Ok(std::fs::read(reference)?)
    }

    fn resource_path(&self, name: &str) -> Option<PathBuf> {
        let path = self.resource_dir.join(name);
        path.is_file().then_some(path)
    }
}

pub fn resolver(resource_dir: &Path) -> FixtureResolver {
    init_tracing();
    FixtureResolver {
        resource_dir: resource_dir.to_path_buf(),
    }
}

pub fn library(resource_dir: &Path) -> PhotoLibrary {
    PhotoLibrary::new(Arc::new(resolver(resource_dir)))
}

/// Entries left in `dir`, for checking that scratch files were removed.
pub fn leftovers(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

pub fn photo(name: &str, width: u32, height: u32) -> PhotoRef {
    PhotoRef::new(format!("{}_{}x{}.png", name, width, height))
}

/// Writes a mock audio file with `count` samples `step_us` apart.
pub fn write_audio(path: &Path, count: usize, step_us: i64, declared_duration: Option<i64>) {
    let mut format = MockFormat::audio();
    format.duration_us = declared_duration;
    MockContainer::single_track(format, count, step_us, 1)
        .save(path)
        .unwrap();
}

/// Writes a mock silent video with `count` frames `step_us` apart.
pub fn write_video(path: &Path, count: usize, step_us: i64) {
    MockContainer::single_track(MockFormat::video(), count, step_us, 5)
        .save(path)
        .unwrap();
}
