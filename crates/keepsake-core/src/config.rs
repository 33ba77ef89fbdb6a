//! # Configuration
//!
//! Page geometry, card styling and video encoding parameters.
//!
//! Every field has a default, so a config file only needs to name the
//! values it overrides:
//!
//! ```json
//! { "video": { "frame_rate": 24, "photo_duration_secs": 2 } }
//! ```

use crate::errors::ExportError;
use crate::systems::assets::DEFAULT_DECODE_BUDGET;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "KEEPSAKE_CONFIG";

/// Top-level configuration for both pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub page: PageConfig,
    pub video: VideoConfig,
    /// Most bytes of decoded pixels one photo decode may allocate.
    pub decode_budget_bytes: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page: PageConfig::default(),
            video: VideoConfig::default(),
            decode_budget_bytes: DEFAULT_DECODE_BUDGET,
        }
    }
}

impl ExportConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Loads the file named by `KEEPSAKE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ExportError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_json_file(path),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Scrapbook page geometry and card styling, in PDF points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub width: f32,
    pub height: f32,
    /// Margin on all four sides of the page.
    pub padding: f32,
    /// Gap between columns, and extra gap between stacked cells.
    pub spacing: f32,
    /// Gap around each photo inside its cell.
    pub photo_spacing: f32,
    pub frame_radius: f32,
    pub frame_stroke: f32,
    /// ARGB colour of the card fill.
    pub frame_color: u32,
    /// ARGB colour of the translucent card outline.
    pub frame_stroke_color: u32,
    /// Inset of the card from the placement rectangle.
    pub frame_inset: f32,
    /// Width of the card border around the photo.
    pub photo_border: f32,
    pub photo_corner_radius: f32,
    /// Largest edge a decoded photo may have, in pixels.
    pub max_bitmap_dimension: u32,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            width: 1240.0,
            height: 1754.0,
            padding: 72.0,
            spacing: 32.0,
            photo_spacing: 16.0,
            frame_radius: 36.0,
            frame_stroke: 6.0,
            frame_color: 0xFFFF_FFFF,
            frame_stroke_color: 0x3300_0000,
            frame_inset: 0.0,
            photo_border: 12.0,
            photo_corner_radius: 32.0,
            max_bitmap_dimension: 1080,
        }
    }
}

impl PageConfig {
    /// Height available for content between the top and bottom padding.
    pub fn usable_height(&self) -> f32 {
        self.height - self.padding * 2.0
    }

    /// Width available for content between the left and right padding.
    pub fn usable_width(&self) -> f32 {
        self.width - self.padding * 2.0
    }
}

/// Which video encoder implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccel {
    /// Best available hardware encoder (NVENC -> QSV -> AMF -> Software)
    #[default]
    Auto,
    /// Force NVIDIA NVENC
    Nvenc,
    /// Force Intel QuickSync
    Qsv,
    /// Force AMD AMF
    Amf,
    /// Force the software encoder
    Software,
}

impl HardwareAccel {
    /// FFmpeg hardware encoder names to try for a codec family such as
    /// `h264` or `hevc`, best first.
    pub fn encoder_names(self, family: &str) -> Vec<String> {
        let vendors: &[&str] = match self {
            HardwareAccel::Auto => &["nvenc", "qsv", "amf"],
            HardwareAccel::Nvenc => &["nvenc"],
            HardwareAccel::Qsv => &["qsv"],
            HardwareAccel::Amf => &["amf"],
            HardwareAccel::Software => &[],
        };
        vendors
            .iter()
            .map(|vendor| format!("{}_{}", family, vendor))
            .collect()
    }

    /// Whether the software encoder may be used, alone or as the last resort.
    pub fn allows_software(self) -> bool {
        matches!(self, HardwareAccel::Auto | HardwareAccel::Software)
    }
}

/// Encoding parameters of the slideshow video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u64,
    /// Seconds between key frames.
    pub iframe_interval_secs: u32,
    /// How long each photo stays on screen, in whole seconds.
    pub photo_duration_secs: u32,
    /// Poll interval for one encoder output dequeue during the final drain.
    pub drain_timeout_ms: u64,
    /// Upper bound for the encoder to deliver end of stream once input has ended.
    pub end_of_stream_deadline_ms: u64,
    pub hardware_accel: HardwareAccel,
    /// Parent of the per-export scratch directory; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            mime: "video/avc".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: 30,
            bitrate: 8_000_000,
            iframe_interval_secs: 1,
            photo_duration_secs: 1,
            drain_timeout_ms: 10,
            end_of_stream_deadline_ms: 10_000,
            hardware_accel: HardwareAccel::Auto,
            scratch_dir: None,
        }
    }
}

impl VideoConfig {
    pub fn frames_per_photo(&self) -> u64 {
        self.frame_rate as u64 * self.photo_duration_secs as u64
    }

    /// Presentation time of the `n`th written frame, in microseconds.
    pub fn frame_time_us(&self, n: u64) -> i64 {
        (n * 1_000_000 / self.frame_rate.max(1) as u64) as i64
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn end_of_stream_deadline(&self) -> Duration {
        Duration::from_millis(self.end_of_stream_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ExportConfig::from_json_str(r#"{ "video": { "frame_rate": 24 } }"#).unwrap();
        assert_eq!(config.video.frame_rate, 24);
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.page, PageConfig::default());
        assert_eq!(config.decode_budget_bytes, DEFAULT_DECODE_BUDGET);
    }

    #[test]
    fn frame_times_follow_the_counter() {
        let video = VideoConfig::default();
        assert_eq!(video.frames_per_photo(), 30);
        assert_eq!(video.frame_time_us(0), 0);
        assert_eq!(video.frame_time_us(1), 33_333);
        assert_eq!(video.frame_time_us(30), 1_000_000);
    }

    #[test]
    fn auto_tries_every_vendor_then_software() {
        assert_eq!(
            HardwareAccel::Auto.encoder_names("h264"),
            vec!["h264_nvenc", "h264_qsv", "h264_amf"]
        );
        assert!(HardwareAccel::Auto.allows_software());
    }

    #[test]
    fn forced_modes_name_one_implementation() {
        assert_eq!(HardwareAccel::Qsv.encoder_names("hevc"), vec!["hevc_qsv"]);
        assert!(!HardwareAccel::Qsv.allows_software());
        assert!(HardwareAccel::Software.encoder_names("h264").is_empty());
        assert!(HardwareAccel::Software.allows_software());
    }

    #[test]
    fn hardware_accel_reads_lowercase_names() {
        let config =
            ExportConfig::from_json_str(r#"{ "video": { "hardware_accel": "nvenc" } }"#).unwrap();
        assert_eq!(config.video.hardware_accel, HardwareAccel::Nvenc);
        assert_eq!(VideoConfig::default().hardware_accel, HardwareAccel::Auto);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ExportConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }
}
