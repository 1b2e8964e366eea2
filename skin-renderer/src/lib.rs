//! # Skin Renderer
//!
//! Turns the layered surfaces of `skin-core` into textures: rasterizes
//! layer stacks, runs per-pixel work on a background thread, keeps a live
//! texture per surface for the 3D preview, and exports finished skins.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐  change events  ┌──────────────┐  png   ┌──────────────┐
//! │   Surface    │ ──────────────▶ │  Compositor  │ ─────▶ │ Live texture │
//! └──────────────┘                 └──────┬───────┘        └──────────────┘
//!        ▲                                │ rasterize + pixel ops
//!        │ base layer              ┌──────▼───────┐
//! ┌──────┴───────┐   decode        │ Pixel worker │
//! │ Asset loader │ ──────────────▶ │   (thread)   │
//! └──────────────┘                 └──────┬───────┘
//!                                         │ final composite
//!                                  ┌──────▼───────┐
//!                                  │ Export (png, │
//!                                  │  vl2 zip)    │
//!                                  └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod compositor;
pub mod editor;
pub mod error;
pub mod export;
pub mod loader;
pub mod raster;
pub mod worker;

pub use compositor::{Compositor, GenerationGuard, LiveTextureKey, TextureUpdate};
pub use editor::{LoadSummary, SkinEditor};
pub use error::{RenderError, RenderResult};
pub use export::{
    archive_name, export_file_names, read_archive, write_archive, ExportAssembler, ExportFormat,
    ExportOutput, ExportTarget, ExportedFile, ARCHIVE_PREFIX,
};
pub use loader::{
    decode_data_uri, AssetCacheConfig, AssetLoader, BaseLayerLoader, CacheStats, CachedLoader,
    FsLoader,
};
pub use raster::{rasterize, rasterize_texture};
pub use worker::PixelWorker;

/// Skin renderer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
