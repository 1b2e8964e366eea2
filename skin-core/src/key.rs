//! Surface addressing: material, channel, frame and size multiplier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SkinError;

/// Texture channel a surface paints into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Base colour.
    Color,
    /// Metallic-roughness, painted as grayscale.
    Metallic,
}

impl Channel {
    /// Lowercase name used in keys and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Metallic => "metallic",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SkinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "color" => Ok(Self::Color),
            "metallic" => Ok(Self::Metallic),
            other => Err(SkinError::UnknownChannel(other.to_string())),
        }
    }
}

/// Unique address of one drawing surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceKey {
    /// Material name.
    pub material: String,
    /// Channel.
    pub channel: Channel,
    /// Frame index (0 for static materials).
    pub frame: usize,
    /// Texture size multiplier.
    pub size_multiplier: u32,
}

impl SurfaceKey {
    /// Create a key.
    #[must_use]
    pub fn new(material: impl Into<String>, channel: Channel, frame: usize, size_multiplier: u32) -> Self {
        Self {
            material: material.into(),
            channel,
            frame,
            size_multiplier,
        }
    }

    /// The same address on the other channel.
    #[must_use]
    pub fn with_channel(&self, channel: Channel) -> Self {
        Self {
            channel,
            ..self.clone()
        }
    }
}

impl fmt::Display for SurfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}x",
            self.material, self.channel, self.frame, self.size_multiplier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse() {
        assert_eq!("color".parse::<Channel>().ok(), Some(Channel::Color));
        assert_eq!("metallic".parse::<Channel>().ok(), Some(Channel::Metallic));
        assert!(matches!(
            "emissive".parse::<Channel>(),
            Err(SkinError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_key_display_and_channel_swap() {
        let key = SurfaceKey::new("base", Channel::Color, 2, 1);
        assert_eq!(key.to_string(), "base-color-2-1x");

        let metallic = key.with_channel(Channel::Metallic);
        assert_eq!(metallic.material, "base");
        assert_eq!(metallic.frame, 2);
        assert_ne!(metallic, key);
    }
}
