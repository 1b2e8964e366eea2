//! Editor configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SkinError, SkinResult};
use crate::history::HistoryConfig;
use crate::skin::TextureBases;
use crate::surface::SurfaceOptions;

/// Default padding around each surface's texture region.
pub const DEFAULT_CANVAS_PADDING: u32 = 64;

/// Default number of undo entries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 6;

/// Default history debounce window in milliseconds.
pub const DEFAULT_HISTORY_DEBOUNCE_MS: u64 = 150;

/// Default community skin repository.
pub const DEFAULT_CUSTOM_SKINS_BASE: &str = "https://exogen.github.io/t2-skins/skins";

/// Editor-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditorConfig {
    /// Margin around each texture for interactive handles.
    pub canvas_padding: u32,
    /// Texture size for materials that declare none.
    pub default_texture_size: [u32; 2],
    /// Undo entries kept per surface.
    pub history_capacity: usize,
    /// Quiet period before edits are captured, in milliseconds.
    pub history_debounce_ms: u64,
    /// Offset of duplicated layers.
    pub duplicate_offset: f32,
    /// Distance moved per arrow key.
    pub nudge_step: f32,
    /// Directory or URL of the game's default textures.
    pub textures_base: String,
    /// Base URL of the community skin repository.
    pub custom_skins_base: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            canvas_padding: DEFAULT_CANVAS_PADDING,
            default_texture_size: crate::material::DEFAULT_TEXTURE_SIZE,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_debounce_ms: DEFAULT_HISTORY_DEBOUNCE_MS,
            duplicate_offset: 20.0,
            nudge_step: 1.0,
            textures_base: "assets/textures".to_string(),
            custom_skins_base: DEFAULT_CUSTOM_SKINS_BASE.to_string(),
        }
    }
}

impl EditorConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Io`], [`SkinError::Serialization`] or
    /// [`SkinError::Config`] for an unreadable, malformed or invalid file.
    pub fn load(path: impl AsRef<Path>) -> SkinResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables:
    /// - `SKIN_CANVAS_PADDING`: padding in pixels
    /// - `SKIN_HISTORY_CAPACITY`: undo entries per surface
    /// - `SKIN_HISTORY_DEBOUNCE_MS`: debounce window
    /// - `SKIN_TEXTURES_BASE`: default texture location
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(padding) = env_parse("SKIN_CANVAS_PADDING") {
            self.canvas_padding = padding;
        }
        if let Some(capacity) = env_parse("SKIN_HISTORY_CAPACITY") {
            self.history_capacity = capacity;
        }
        if let Some(ms) = env_parse("SKIN_HISTORY_DEBOUNCE_MS") {
            self.history_debounce_ms = ms;
        }
        if let Ok(base) = std::env::var("SKIN_TEXTURES_BASE") {
            self.textures_base = base;
        }
        self
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Config`] describing the first invalid value.
    pub fn validate(&self) -> SkinResult<()> {
        if self.history_capacity < 2 {
            return Err(SkinError::Config(format!(
                "historyCapacity must be at least 2, got {}",
                self.history_capacity
            )));
        }
        if self.default_texture_size.contains(&0) {
            return Err(SkinError::Config(
                "defaultTextureSize must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Layout options for new surfaces.
    #[must_use]
    pub fn surface_options(&self) -> SurfaceOptions {
        SurfaceOptions {
            padding: self.canvas_padding,
            duplicate_offset: self.duplicate_offset,
        }
    }

    /// History limits for new surfaces.
    #[must_use]
    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            capacity: self.history_capacity,
            debounce: Duration::from_millis(self.history_debounce_ms),
        }
    }

    /// Texture lookup bases.
    #[must_use]
    pub fn texture_bases(&self) -> TextureBases<'_> {
        TextureBases {
            textures: &self.textures_base,
            custom_skins: &self.custom_skins_base,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.canvas_padding, 64);
        assert_eq!(config.history_config(), HistoryConfig::default());
        assert_eq!(config.surface_options(), SurfaceOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "historyCapacity": 10, "canvasPadding": 32 }}"#).expect("write");
        let config = EditorConfig::load(file.path()).expect("load");
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.canvas_padding, 32);
        assert_eq!(config.history_debounce_ms, DEFAULT_HISTORY_DEBOUNCE_MS);
    }

    #[test]
    fn test_invalid_capacity_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "historyCapacity": 1 }}"#).expect("write");
        assert!(matches!(
            EditorConfig::load(file.path()),
            Err(SkinError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            EditorConfig::load("/definitely/not/here.json"),
            Err(SkinError::Io(_))
        ));
    }
}
