//! Skin selection and texture location.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SkinError, SkinResult};
use crate::material::{MaterialCatalog, ModelType};

/// Where a skin's textures come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkinSource {
    /// Shipped with the game.
    Default,
    /// Community skin repository.
    Custom,
}

/// The model and skin currently being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinSelection {
    /// Selected model, e.g. `lmale` or `disc`.
    pub model: String,
    /// Model type.
    pub model_type: ModelType,
    /// Skin name, e.g. `Blood Eagle`.
    pub skin: String,
    /// Where the skin comes from.
    pub source: SkinSource,
}

impl SkinSelection {
    /// Select a default skin.
    #[must_use]
    pub fn default_skin(model: impl Into<String>, model_type: ModelType, skin: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            model_type,
            skin: skin.into(),
            source: SkinSource::Default,
        }
    }

    /// Model whose materials are used.
    #[must_use]
    pub fn actual_model(&self) -> &str {
        MaterialCatalog::actual_model(&self.model)
    }
}

/// Base locations for texture lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBases<'a> {
    /// Directory or URL holding the game's default textures.
    pub textures: &'a str,
    /// Base URL of the community skin repository.
    pub custom_skins: &'a str,
}

/// Expand a frame-zero file name into one name per frame.
///
/// Animated materials name frame zero `<base>00`; the others follow as
/// `<base>01`, `<base>02` and so on.
///
/// # Errors
///
/// Returns [`SkinError::UnexpectedFrameFilename`] when `count > 1` and
/// `frame_zero` does not end in two digits after a non-empty prefix.
pub fn frame_names(frame_zero: &str, count: usize) -> SkinResult<Vec<String>> {
    if count < 2 {
        return Ok(vec![frame_zero.to_string()]);
    }
    let bytes = frame_zero.as_bytes();
    let matches = bytes.len() >= 3 && bytes[bytes.len() - 2..].iter().all(u8::is_ascii_digit);
    if !matches {
        return Err(SkinError::UnexpectedFrameFilename(frame_zero.to_string()));
    }
    let base = &frame_zero[..frame_zero.len() - 2];
    Ok((0..count).map(|i| format!("{base}{i:02}")).collect())
}

/// Texture locations for every material of a skin, keyed by material file
/// name, one entry per frame.
///
/// Default skins omit materials that have no default texture.
///
/// # Errors
///
/// Returns [`SkinError::UnexpectedFrameFilename`] for a misnamed animated
/// material.
pub fn resolve_skin_textures(
    catalog: &MaterialCatalog,
    bases: &TextureBases<'_>,
    selection: &SkinSelection,
) -> SkinResult<BTreeMap<String, Vec<String>>> {
    let model = selection.actual_model();
    let mut urls = BTreeMap::new();
    match selection.model_type {
        ModelType::Player => {
            let root = match selection.source {
                SkinSource::Default => bases.textures,
                SkinSource::Custom => bases.custom_skins,
            };
            urls.insert(
                "base".to_string(),
                vec![format!("{root}/{}.{model}.png", selection.skin)],
            );
        }
        ModelType::Weapon | ModelType::Vehicle => {
            for material in catalog.materials_for(model) {
                let file = material.file_name();
                let names = frame_names(file, material.frames())?;
                let frames = match selection.source {
                    SkinSource::Default if !material.has_default_texture() => continue,
                    SkinSource::Default => names
                        .iter()
                        .map(|name| format!("{}/{name}.png", bases.textures))
                        .collect(),
                    SkinSource::Custom => names
                        .iter()
                        .map(|name| format!("{}/{}/{name}.png", bases.custom_skins, selection.skin))
                        .collect(),
                };
                urls.insert(file.to_string(), frames);
            }
        }
    }
    Ok(urls)
}
