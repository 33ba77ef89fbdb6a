//! # Types Module
//!
//! Shared data types used by both export pipelines.
//!
//! ## Key Types
//! - `PhotoRef`: Opaque handle to an image resource.
//! - `AudioRef`: Bundled clip or arbitrary audio content.
//! - `contain_rect`: Letterboxed placement of an image inside a box.

use serde::{Deserialize, Serialize};
use skia_safe::Rect;
use std::fmt;

/// Scheme prefix for audio bundled with the application.
pub const RESOURCE_SCHEME: &str = "res://";

/// An opaque handle to an image resource (a path or URI string).
///
/// Equality is by identity of the handle, not by the bytes behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoRef(String);

impl PhotoRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PhotoRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reference to the soundtrack of a movie export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioRef {
    /// A clip shipped with the application, opened directly from the resource directory.
    Resource(String),
    /// Arbitrary content (path or URI) that must be copied to a scratch file before demuxing.
    Content(String),
}

impl AudioRef {
    /// Parses a reference string; `res://name` selects a bundled resource.
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix(RESOURCE_SCHEME) {
            Some(name) => Self::Resource(name.to_string()),
            None => Self::Content(reference.to_string()),
        }
    }
}

impl fmt::Display for AudioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioRef::Resource(name) => write!(f, "{}{}", RESOURCE_SCHEME, name),
            AudioRef::Content(reference) => f.write_str(reference),
        }
    }
}

/// Largest rectangle with the aspect of `src_w` x `src_h` that fits inside
/// `dst_rect`, centered on both axes. Nothing is ever cropped.
pub fn contain_rect(src_w: f32, src_h: f32, dst_rect: Rect) -> Rect {
    if src_w <= 0.0 || src_h <= 0.0 {
        return dst_rect;
    }
    let dst_w = dst_rect.width();
    let dst_h = dst_rect.height();
    let scale = (dst_w / src_w).min(dst_h / src_h);

    let new_w = src_w * scale;
    let new_h = src_h * scale;
    let new_x = dst_rect.left + (dst_w - new_w) / 2.0;
    let new_y = dst_rect.top + (dst_h - new_h) / 2.0;

    Rect::from_xywh(new_x, new_y, new_w, new_h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contain_letterboxes_wide_box() {
        let dst = Rect::from_xywh(0.0, 0.0, 1920.0, 1080.0);
        let r = contain_rect(1000.0, 1000.0, dst);
        assert!((r.height() - 1080.0).abs() < 1e-3);
        assert!((r.width() - 1080.0).abs() < 1e-3);
        assert!((r.left - 420.0).abs() < 1e-3);
        assert!(r.top.abs() < 1e-3);
    }

    #[test]
    fn contain_never_overflows_the_box() {
        let dst = Rect::from_xywh(10.0, 10.0, 100.0, 50.0);
        for (w, h) in [(100.0, 100.0), (400.0, 10.0), (3.0, 900.0)] {
            let r = contain_rect(w, h, dst);
            let eps = 1e-3;
            assert!(r.left >= dst.left - eps && r.right <= dst.right + eps, "{:?}", r);
            assert!(r.top >= dst.top - eps && r.bottom <= dst.bottom + eps, "{:?}", r);
            assert!(((r.width() / r.height()) - w / h).abs() < 1e-3);
        }
        assert_eq!(contain_rect(0.0, 10.0, dst), dst);
    }

    #[test]
    fn audio_ref_parses_resource_scheme() {
        assert_eq!(AudioRef::parse("res://upbeat"), AudioRef::Resource("upbeat".into()));
        assert_eq!(
            AudioRef::parse("/music/song.m4a"),
            AudioRef::Content("/music/song.m4a".into())
        );
        assert_eq!(AudioRef::Resource("beats".into()).to_string(), "res://beats");
    }
}
