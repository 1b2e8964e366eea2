//! # Skinner
//!
//! Command-line front end for the skin editor core. Mounts a model's
//! surfaces, loads a skin, optionally layers images on top and exports the
//! result as PNG files or a `.vl2` archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use skin_core::{Channel, EditorConfig, MaterialCatalog, SkinSelection, SkinSource};
use skin_renderer::{CachedLoader, ExportFormat, FsLoader, SkinEditor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Compose and export 3D model skins.
#[derive(Debug, Parser)]
#[command(name = "skinner", version, about)]
struct Args {
    /// Editor configuration file (JSON).
    #[arg(long, env = "SKIN_CONFIG")]
    config: Option<PathBuf>,

    /// Material catalog (JSON).
    #[arg(long, env = "SKIN_CATALOG")]
    catalog: PathBuf,

    /// Model to mount.
    #[arg(long)]
    model: String,

    /// Skin to load; defaults to the model's default skin.
    #[arg(long)]
    skin: Option<String>,

    /// Load the skin from the custom skins location.
    #[arg(long)]
    custom: bool,

    /// Directory that relative texture locations are resolved against.
    #[arg(long, default_value = ".")]
    textures: PathBuf,

    /// Texture size multiplier.
    #[arg(long, default_value_t = 1)]
    size_multiplier: u32,

    /// Material to edit; defaults to the first editable one.
    #[arg(long)]
    material: Option<String>,

    /// Edit the metallic-roughness channel instead of colour.
    #[arg(long)]
    metallic: bool,

    /// Images to add as layers on the edited surface.
    #[arg(long = "add", value_name = "IMAGE")]
    add: Vec<PathBuf>,

    /// Copy the colour surface into the metallic surface first.
    #[arg(long)]
    copy_to_metallic: bool,

    /// Name of the exported skin; defaults to the loaded skin.
    #[arg(long)]
    name: Option<String>,

    /// Export format: png or vl2.
    #[arg(long, default_value = "png")]
    format: ExportFormat,

    /// Output directory.
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,skin_core=debug,skin_renderer=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    // Use JSON format in production (RUST_LOG_FORMAT=json)
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EditorConfig> {
    let config = match path {
        Some(path) => EditorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EditorConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn selection(catalog: &MaterialCatalog, args: &Args) -> anyhow::Result<SkinSelection> {
    let model_type = catalog.model_type(&args.model)?;
    let skin = match &args.skin {
        Some(skin) => skin.clone(),
        None => catalog
            .default_skin(&args.model)
            .map(str::to_string)
            .with_context(|| format!("Model '{}' has no default skin; pass --skin", args.model))?,
    };
    let source = if args.custom {
        SkinSource::Custom
    } else {
        SkinSource::Default
    };
    Ok(SkinSelection {
        model: args.model.clone(),
        model_type,
        skin,
        source,
    })
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let catalog = MaterialCatalog::load(&args.catalog)
        .with_context(|| format!("Failed to load catalog {}", args.catalog.display()))?;
    let selection = selection(&catalog, &args)?;

    let loader = Arc::new(CachedLoader::new(FsLoader::with_root(&args.textures)));
    let mut editor = SkinEditor::new(config, Arc::new(catalog), loader);

    let summary = editor.mount(selection.clone(), args.size_multiplier).await?;
    tracing::info!(
        applied = summary.applied,
        failed = summary.failed,
        "Base textures loaded"
    );

    if let Some(material) = &args.material {
        editor.set_active_material(material)?;
    }
    if args.copy_to_metallic {
        editor.copy_to_metallic()?;
    } else if args.metallic {
        editor.set_active_channel(Channel::Metallic)?;
    }

    for path in &args.add {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let id = editor
            .add_layer(&bytes)
            .with_context(|| format!("Failed to add {}", path.display()))?;
        tracing::info!(image = %path.display(), layer = %id, "Layer added");
    }

    let name = args.name.as_deref().unwrap_or(&selection.skin);
    let output = editor.export_skin(name, args.format).await?;

    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("Failed to create {}", args.out.display()))?;
    let mut written = Vec::new();
    for file in output.into_files() {
        let path = args.out.join(&file.name);
        tokio::fs::write(&path, &file.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = file.bytes.len(), "Wrote file");
        written.push(path.display().to_string());
    }
    editor.unmount();

    let report = serde_json::json!({
        "model": selection.model,
        "skin": name,
        "format": args.format,
        "load": summary,
        "files": written,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    run(Args::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "materials": { "disc": [{ "name": "disc" }] },
        "modelDefaults": { "disc": "base" },
        "modelTypes": { "disc": "weapon", "lmale": "player" }
    }"#;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["skinner", "--catalog", "catalog.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("args")
    }

    #[test]
    fn test_args_defaults() {
        let args = args(&["--model", "disc"]);
        assert_eq!(args.format, ExportFormat::Png);
        assert_eq!(args.size_multiplier, 1);
        assert!(args.add.is_empty());
    }

    #[test]
    fn test_args_reject_unknown_format() {
        assert!(Args::try_parse_from([
            "skinner", "--catalog", "c.json", "--model", "disc", "--format", "tga"
        ])
        .is_err());
    }

    #[test]
    fn test_selection_uses_default_skin() {
        let catalog = MaterialCatalog::from_json(CATALOG).expect("catalog");
        let selection = selection(&catalog, &args(&["--model", "disc"])).expect("selection");
        assert_eq!(selection.skin, "base");
        assert_eq!(selection.source, SkinSource::Default);
    }

    #[test]
    fn test_selection_requires_skin_without_default() {
        let catalog = MaterialCatalog::from_json(CATALOG).expect("catalog");
        assert!(selection(&catalog, &args(&["--model", "lmale"])).is_err());
        let custom = selection(&catalog, &args(&["--model", "lmale", "--skin", "Mine", "--custom"]))
            .expect("selection");
        assert_eq!(custom.source, SkinSource::Custom);
    }

    #[tokio::test]
    async fn test_run_exports_into_out_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = dir.path().join("catalog.json");
        std::fs::write(&catalog, r#"{
            "materials": { "disc": [{ "name": "disc", "size": [4, 4],
                "metallicFactor": 0, "roughnessFactor": 1 }] },
            "modelDefaults": { "disc": "base" },
            "modelTypes": { "disc": "weapon" }
        }"#)
        .expect("write catalog");
        let out = dir.path().join("out");

        let args = Args::try_parse_from([
            "skinner",
            "--catalog",
            catalog.to_str().expect("utf8"),
            "--model",
            "disc",
            "--name",
            "Chrome",
            "--format",
            "vl2",
            "--out",
            out.to_str().expect("utf8"),
        ])
        .expect("args");
        run(args).await.expect("run");

        assert!(out.join("disc-Chrome.vl2").exists());
    }
}
