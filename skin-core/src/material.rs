//! Material definitions and the per-model material catalog.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SkinError, SkinResult};

/// Texture size used when a material does not declare one.
pub const DEFAULT_TEXTURE_SIZE: [u32; 2] = [512, 512];

/// Kind of model being skinned. Drives texture URLs and export naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Player armour; one `base` material per model.
    Player,
    /// Weapon; one texture per material file.
    Weapon,
    /// Vehicle; one texture per material file.
    Vehicle,
}

impl ModelType {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Weapon => "weapon",
            Self::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = SkinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "player" => Ok(Self::Player),
            "weapon" => Ok(Self::Weapon),
            "vehicle" => Ok(Self::Vehicle),
            other => Err(SkinError::UnknownModelType(other.to_string())),
        }
    }
}

/// glTF alpha mode of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlphaMode {
    /// Alpha blended.
    Blend,
    /// Alpha tested against the cutoff.
    Mask,
    /// Alpha ignored.
    Opaque,
}

/// Static descriptor for one texture slot on a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDefinition {
    /// Material name in the model.
    pub name: String,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Texture file base name, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Suffix appended to the file name by some skin packs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_suffix: Option<String>,
    /// `Some(false)` when the game ships no default texture for this slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_default: Option<bool>,
    /// Texture size in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
    /// Hidden from the material picker and export.
    #[serde(default)]
    pub hidden: bool,
    /// `Some(false)` when the material cannot be edited or exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    /// Texture may be absent from a skin.
    #[serde(default)]
    pub optional: bool,
    /// glTF alpha mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_mode: Option<AlphaMode>,
    /// glTF alpha cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_cutoff: Option<f32>,
    /// PBR base colour factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_color_factor: Option<[f32; 4]>,
    /// PBR emissive factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emissive_factor: Option<[f32; 3]>,
    /// Whether the colour texture doubles as the emissive texture.
    #[serde(default)]
    pub emissive_texture: bool,
    /// PBR metallic factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metallic_factor: Option<f32>,
    /// PBR roughness factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness_factor: Option<f32>,
    /// Number of animation frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<usize>,
    /// Relative duration of each frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_timings: Option<Vec<f32>>,
}

impl MaterialDefinition {
    /// Create a definition with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            file: None,
            file_suffix: None,
            has_default: None,
            size: None,
            hidden: false,
            selectable: None,
            optional: false,
            alpha_mode: None,
            alpha_cutoff: None,
            base_color_factor: None,
            emissive_factor: None,
            emissive_texture: false,
            metallic_factor: None,
            roughness_factor: None,
            frame_count: None,
            frame_timings: None,
        }
    }

    /// Texture file base name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.file.as_deref().unwrap_or(&self.name)
    }

    /// Number of frames, at least one.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frame_count.unwrap_or(1).max(1)
    }

    /// Relative duration of a frame (1.0 when unspecified).
    #[must_use]
    pub fn frame_timing(&self, frame: usize) -> f32 {
        self.frame_timings
            .as_ref()
            .and_then(|t| t.get(frame).copied())
            .unwrap_or(1.0)
    }

    /// Base texture size in pixels.
    #[must_use]
    pub fn texture_size(&self) -> [u32; 2] {
        self.size.unwrap_or(DEFAULT_TEXTURE_SIZE)
    }

    /// Texture size at a size multiplier.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Config`] if the scaled size overflows.
    pub fn scaled_size(&self, multiplier: u32) -> SkinResult<[u32; 2]> {
        self.scaled_size_or(DEFAULT_TEXTURE_SIZE, multiplier)
    }

    /// Texture size at a size multiplier, using `default` for materials
    /// that declare no size.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Config`] if the scaled size overflows.
    pub fn scaled_size_or(&self, default: [u32; 2], multiplier: u32) -> SkinResult<[u32; 2]> {
        let [w, h] = self.size.unwrap_or(default);
        let m = multiplier.max(1);
        match (w.checked_mul(m), h.checked_mul(m)) {
            (Some(w), Some(h)) => Ok([w, h]),
            _ => Err(SkinError::Config(format!(
                "texture size {w}x{h} of '{}' overflows at size multiplier {m}",
                self.name
            ))),
        }
    }

    /// Whether a default texture exists for this slot.
    #[must_use]
    pub fn has_default_texture(&self) -> bool {
        self.has_default != Some(false)
    }

    /// Whether the material can be edited and exported.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        self.selectable != Some(false)
    }

    /// Whether the material has a metallic-roughness surface. Only
    /// materials that declare both zero metallic factor and full roughness
    /// have none.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn has_metallic(&self) -> bool {
        !(self.metallic_factor == Some(0.0) && self.roughness_factor == Some(1.0))
    }
}

/// Materials for every model, loaded from JSON configuration.
///
/// ```json
/// {
///   "materials": { "disc": [{ "name": "disc", "size": [256, 256] }] },
///   "modelDefaults": { "disc": "base" },
///   "modelTypes": { "disc": "weapon" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialCatalog {
    /// Material slots per model. `null` entries are placeholders.
    #[serde(default)]
    pub materials: HashMap<String, Vec<Option<MaterialDefinition>>>,
    /// Default skin name per model.
    #[serde(default)]
    pub model_defaults: HashMap<String, String>,
    /// Model type per model.
    #[serde(default)]
    pub model_types: HashMap<String, ModelType>,
}

impl MaterialCatalog {
    /// Parse a catalog from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Serialization`] for malformed JSON.
    pub fn from_json(json: &str) -> SkinResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Io`] if the file cannot be read or
    /// [`SkinError::Serialization`] if it is malformed.
    pub fn load(path: impl AsRef<Path>) -> SkinResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The model whose materials and textures are used for `model`.
    #[must_use]
    pub fn actual_model(model: &str) -> &str {
        match model {
            "hfemale" => "hmale",
            other => other,
        }
    }

    /// Material definitions for a model, placeholders skipped.
    pub fn materials_for(&self, model: &str) -> impl Iterator<Item = &MaterialDefinition> {
        self.materials
            .get(Self::actual_model(model))
            .into_iter()
            .flatten()
            .flatten()
    }

    /// Find one material of a model by name.
    #[must_use]
    pub fn material(&self, model: &str, name: &str) -> Option<&MaterialDefinition> {
        self.materials_for(model).find(|m| m.name == name)
    }

    /// Default skin for a model.
    #[must_use]
    pub fn default_skin(&self, model: &str) -> Option<&str> {
        self.model_defaults
            .get(Self::actual_model(model))
            .map(String::as_str)
    }

    /// Model type of a model.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::UnknownModelType`] if the model has no type.
    pub fn model_type(&self, model: &str) -> SkinResult<ModelType> {
        self.model_types
            .get(model)
            .or_else(|| self.model_types.get(Self::actual_model(model)))
            .copied()
            .ok_or_else(|| SkinError::UnknownModelType(model.to_string()))
    }
}
