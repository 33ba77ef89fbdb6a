//! # Catalogs
//!
//! Registries of scrapbook templates and bundled music clips.
//!
//! Both are plain values passed into the pipelines, so callers and tests can
//! substitute their own entries. `Default` yields the built-in set.

use crate::errors::ExportError;
use crate::types::AudioRef;
use serde::{Deserialize, Serialize};

/// Visual template of a scrapbook: column count, card tilt pattern and page background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapbookTemplate {
    pub id: String,
    pub label: String,
    /// Reference to the background image, resolved through the `MediaResolver`.
    pub background: String,
    /// ARGB colour painted when the background image is unavailable.
    #[serde(default = "default_background_color")]
    pub background_color: u32,
    /// Nominal photos per page, for display only; layout is driven by content height.
    #[serde(default)]
    pub photos_per_page: u32,
    pub columns: u32,
    /// Rotation angles in degrees, cycled by photo index.
    #[serde(default)]
    pub rotation_pattern: Vec<f32>,
}

fn default_background_color() -> u32 {
    0xFFFA_F7F2
}

impl ScrapbookTemplate {
    /// Column count, coerced to at least one.
    pub fn column_count(&self) -> usize {
        self.columns.max(1) as usize
    }

    /// Rotation of the photo at absolute index `index`, in degrees.
    pub fn rotation_for(&self, index: usize) -> f32 {
        if self.rotation_pattern.is_empty() {
            0.0
        } else {
            self.rotation_pattern[index % self.rotation_pattern.len()]
        }
    }
}

/// Fixed, enumerable registry of scrapbook templates.
///
/// Never empty: every constructor, deserialization included, rejects an
/// empty list, so there is always a default template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateList")]
pub struct TemplateCatalog {
    templates: Vec<ScrapbookTemplate>,
}

#[derive(Deserialize)]
struct TemplateList {
    templates: Vec<ScrapbookTemplate>,
}

impl TryFrom<TemplateList> for TemplateCatalog {
    type Error = ExportError;

    fn try_from(list: TemplateList) -> Result<Self, Self::Error> {
        Self::new(list.templates)
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        let template = |id: &str, label: &str, per_page, columns, pattern: &[f32], color| {
            ScrapbookTemplate {
                id: id.to_string(),
                label: label.to_string(),
                background: format!("backgrounds/bg_template_{}.png", id),
                background_color: color,
                photos_per_page: per_page,
                columns,
                rotation_pattern: pattern.to_vec(),
            }
        };
        Self {
            templates: vec![
                template("floral", "Floral", 4, 2, &[-4.0, 2.5, -2.5, 5.0], 0xFFFC_E4EC),
                template("music", "Music", 3, 3, &[-6.0, 0.0, 6.0], 0xFF1F_1B2E),
                template("tech", "Tech", 4, 2, &[-2.0, 2.0, 0.0, -3.0], 0xFFE3_F2FD),
                template("travel", "Travel", 5, 2, &[-5.0, 3.0, -2.0, 5.0, 0.0], 0xFFFF_F3E0),
            ],
        }
    }
}

impl TemplateCatalog {
    /// Builds a catalog whose first entry is the default; an empty list is rejected.
    pub fn new(templates: Vec<ScrapbookTemplate>) -> Result<Self, ExportError> {
        if templates.is_empty() {
            return Err(ExportError::Anyhow(anyhow::anyhow!(
                "Template catalog must contain at least one template"
            )));
        }
        Ok(Self { templates })
    }

    /// Loads a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn templates(&self) -> &[ScrapbookTemplate] {
        &self.templates
    }

    /// The first template.
    pub fn default_template(&self) -> &ScrapbookTemplate {
        &self.templates[0]
    }

    /// Finds a template by id, falling back to the default template.
    pub fn find_by_id(&self, id: &str) -> &ScrapbookTemplate {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .unwrap_or_else(|| self.default_template())
    }
}

/// A soundtrack bundled with the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicClip {
    pub id: String,
    pub name: String,
    pub description: String,
    /// File name under the resource directory.
    pub resource: String,
}

impl MusicClip {
    pub fn audio_ref(&self) -> AudioRef {
        AudioRef::Resource(self.resource.clone())
    }
}

/// Registry of bundled music clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicCatalog {
    pub clips: Vec<MusicClip>,
}

impl Default for MusicCatalog {
    fn default() -> Self {
        let clip = |id: &str, name: &str, description: &str| MusicClip {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            resource: format!("music/{}.mp3", id),
        };
        Self {
            clips: vec![
                clip("upbeat", "Upbeat", "Bright, energetic pop"),
                clip("romantic", "Romantic", "Soft piano and strings"),
                clip("beats", "Beats", "Laid-back hip hop groove"),
                clip("mellow", "Mellow", "Calm acoustic guitar"),
                clip("playful", "Playful", "Light ukulele and claps"),
            ],
        }
    }
}

impl MusicCatalog {
    pub fn from_json_str(json: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&MusicClip> {
        self.clips.iter().find(|c| c.id == id)
    }
}
