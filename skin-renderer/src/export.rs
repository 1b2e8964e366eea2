//! Skin export.
//!
//! Composites every exportable material frame of the mounted model and
//! packages the results either as loose PNG files or as a single `.vl2`
//! archive (a zip with the textures under [`ARCHIVE_PREFIX`]).

use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Read, Seek, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use skin_core::{frame_names, Channel, MaterialCatalog, ModelType, SkinResult, SurfaceKey, SurfaceRegistry};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::compositor::Compositor;
use crate::error::{RenderError, RenderResult};

/// Directory holding skin textures inside a `.vl2` archive.
pub const ARCHIVE_PREFIX: &str = "textures/skins/";

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One PNG per material frame.
    Png,
    /// Zip archive of PNGs.
    Vl2,
}

impl ExportFormat {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Vl2 => "vl2",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "vl2" => Ok(Self::Vl2),
            _ => Err(RenderError::UnknownExportFormat(s.to_string())),
        }
    }
}

/// A named file produced by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    /// File name (or archive path).
    pub name: String,
    /// Contents.
    pub bytes: Vec<u8>,
}

/// Result of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutput {
    /// Loose PNG files.
    Files(Vec<ExportedFile>),
    /// A single archive.
    Archive(ExportedFile),
}

impl ExportOutput {
    /// Every file to write, in order.
    #[must_use]
    pub fn into_files(self) -> Vec<ExportedFile> {
        match self {
            Self::Files(files) => files,
            Self::Archive(archive) => vec![archive],
        }
    }
}

/// What is being exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    /// Selected model.
    pub model: String,
    /// Model type.
    pub model_type: ModelType,
    /// Materials chosen for export.
    pub materials: HashSet<String>,
    /// Size multiplier of the mounted surfaces.
    pub size_multiplier: u32,
}

/// Output file names for every frame of one material.
///
/// Players export a single `{skin}.{model}.png`. Weapons and vehicles use
/// the material's file name, expanded per frame for animated materials.
///
/// # Errors
///
/// Returns [`skin_core::SkinError::UnexpectedFrameFilename`] for an
/// animated material whose file name does not end in two digits.
pub fn export_file_names(
    model_type: ModelType,
    model: &str,
    skin_name: &str,
    file_name: &str,
    frames: usize,
) -> SkinResult<Vec<String>> {
    match model_type {
        ModelType::Player => Ok(vec![format!(
            "{skin_name}.{}.png",
            MaterialCatalog::actual_model(model)
        )]),
        ModelType::Weapon | ModelType::Vehicle => Ok(frame_names(file_name, frames)?
            .into_iter()
            .map(|name| format!("{name}.png"))
            .collect()),
    }
}

/// Name of the `.vl2` archive for a skin.
#[must_use]
pub fn archive_name(model_type: ModelType, model: &str, skin_name: &str, size_multiplier: u32) -> String {
    let stem = match model_type {
        ModelType::Player => skin_name.to_string(),
        ModelType::Weapon | ModelType::Vehicle => format!("{model}-{skin_name}"),
    };
    if size_multiplier > 1 {
        format!("{stem}@{size_multiplier}x.vl2")
    } else {
        format!("{stem}.vl2")
    }
}

/// Pack files into a `.vl2` archive under [`ARCHIVE_PREFIX`].
///
/// # Errors
///
/// Returns [`RenderError::Archive`] if writing the zip fails.
pub fn write_archive(files: &[ExportedFile]) -> RenderResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        writer.start_file(format!("{ARCHIVE_PREFIX}{}", file.name), options)?;
        writer
            .write_all(&file.bytes)
            .map_err(|e| RenderError::Archive(format!("Failed to write '{}': {e}", file.name)))?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Read every file entry from a zip archive, directories skipped.
///
/// # Errors
///
/// Returns [`RenderError::Archive`] for a malformed archive.
pub fn read_archive<R: Read + Seek>(reader: R) -> RenderResult<Vec<ExportedFile>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| RenderError::Archive(format!("Failed to read '{name}': {e}")))?;
        files.push(ExportedFile { name, bytes });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Assembles skin exports from mounted surfaces.
#[derive(Debug)]
pub struct ExportAssembler<'a> {
    catalog: &'a MaterialCatalog,
    registry: &'a SurfaceRegistry,
    compositor: &'a Compositor,
}

impl<'a> ExportAssembler<'a> {
    /// Create an assembler reading from `registry`.
    #[must_use]
    pub fn new(catalog: &'a MaterialCatalog, registry: &'a SurfaceRegistry, compositor: &'a Compositor) -> Self {
        Self {
            catalog,
            registry,
            compositor,
        }
    }

    /// Composite and package every exportable material frame.
    ///
    /// Hidden and non-selectable materials, and materials not chosen in
    /// `target`, are skipped. Each frame combines the colour surface with
    /// the metallic surface when the material has one.
    ///
    /// # Errors
    ///
    /// Fails outright on a misnamed animated material or a missing
    /// surface, and propagates compositing and archive errors.
    pub async fn export_skin(
        &self,
        target: &ExportTarget,
        name: &str,
        format: ExportFormat,
    ) -> RenderResult<ExportOutput> {
        let mut files = Vec::new();
        for material in self.catalog.materials_for(&target.model) {
            if material.hidden || !material.is_selectable() || !target.materials.contains(&material.name) {
                continue;
            }
            let names = export_file_names(
                target.model_type,
                &target.model,
                name,
                material.file_name(),
                material.frames(),
            )?;
            for (frame, file_name) in names.into_iter().enumerate() {
                let color_key = SurfaceKey::new(&material.name, Channel::Color, frame, target.size_multiplier);
                let color = self.surface(&color_key)?;
                let metallic = if material.has_metallic() {
                    Some(self.surface(&color_key.with_channel(Channel::Metallic))?)
                } else {
                    None
                };
                let image = self.compositor.composite_final(&color, metallic.as_ref()).await?;
                let bytes = self.compositor.worker().encode_png(image).await?;
                debug!(file = %file_name, bytes = bytes.len(), "Exported frame");
                files.push(ExportedFile {
                    name: file_name,
                    bytes,
                });
            }
        }

        let output = match format {
            ExportFormat::Png => ExportOutput::Files(files),
            ExportFormat::Vl2 => {
                let archive = ExportedFile {
                    name: archive_name(target.model_type, &target.model, name, target.size_multiplier),
                    bytes: write_archive(&files)?,
                };
                ExportOutput::Archive(archive)
            }
        };
        info!(skin = name, model = %target.model, %format, "Skin exported");
        Ok(output)
    }

    fn surface(&self, key: &SurfaceKey) -> RenderResult<skin_core::SurfaceHandle> {
        self.registry
            .get(key)
            .ok_or_else(|| RenderError::MissingSurface(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weapon_frame_file_names() {
        let names = export_file_names(ModelType::Weapon, "disc", "Chrome", "muzzleflash00", 4).expect("names");
        assert_eq!(
            names,
            vec![
                "muzzleflash00.png",
                "muzzleflash01.png",
                "muzzleflash02.png",
                "muzzleflash03.png"
            ]
        );
    }

    #[test]
    fn test_player_file_name() {
        let names = export_file_names(ModelType::Player, "lmale", "Blood Eagle", "base", 1).expect("names");
        assert_eq!(names, vec!["Blood Eagle.lmale.png"]);
        let names = export_file_names(ModelType::Player, "hfemale", "Blood Eagle", "base", 1).expect("names");
        assert_eq!(names, vec!["Blood Eagle.hmale.png"]);
    }

    #[test]
    fn test_misnamed_animation_fails() {
        assert!(matches!(
            export_file_names(ModelType::Vehicle, "scout", "X", "flare", 3),
            Err(skin_core::SkinError::UnexpectedFrameFilename(_))
        ));
    }

    #[test]
    fn test_archive_names() {
        assert_eq!(archive_name(ModelType::Player, "lmale", "Blood Eagle", 1), "Blood Eagle.vl2");
        assert_eq!(archive_name(ModelType::Weapon, "disc", "Chrome", 1), "disc-Chrome.vl2");
        assert_eq!(archive_name(ModelType::Vehicle, "scout", "Camo", 2), "scout-Camo@2x.vl2");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("png".parse::<ExportFormat>().ok(), Some(ExportFormat::Png));
        assert_eq!("VL2".parse::<ExportFormat>().ok(), Some(ExportFormat::Vl2));
        assert!(matches!(
            "tga".parse::<ExportFormat>(),
            Err(RenderError::UnknownExportFormat(_))
        ));
    }

    #[test]
    fn test_format_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ExportFormat::Vl2).expect("json"), "\"vl2\"");
        let format: ExportFormat = serde_json::from_str("\"png\"").expect("parse");
        assert_eq!(format, ExportFormat::Png);
    }

    #[test]
    fn test_archive_roundtrip_uses_prefix() {
        let files = vec![
            ExportedFile {
                name: "disc.png".to_string(),
                bytes: vec![1, 2, 3],
            },
            ExportedFile {
                name: "muzzleflash00.png".to_string(),
                bytes: vec![4; 100],
            },
        ];
        let archive = write_archive(&files).expect("write");
        let entries = read_archive(Cursor::new(archive)).expect("read");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["textures/skins/disc.png", "textures/skins/muzzleflash00.png"]);
        assert_eq!(entries[1].bytes, vec![4; 100]);
    }

    #[test]
    fn test_malformed_archive_rejected() {
        assert!(matches!(
            read_archive(Cursor::new(b"not a zip".to_vec())),
            Err(RenderError::Archive(_))
        ));
    }
}
