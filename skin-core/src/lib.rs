//! # Skin Core
//!
//! Core editing model for a 3D model skin editor: layered drawing surfaces
//! per material, channel and frame, snapshot-based undo/redo, and the
//! per-pixel transforms that derive metallic-roughness textures.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  skin-core                  │
//! ├─────────────────────────────────────────────┤
//! │  Surfaces        │  History                 │
//! │  - Layer stack   │  - Debounced snapshots   │
//! │  - Selection     │  - Undo / redo stacks    │
//! │  - Change events │  - Tracking suppression  │
//! ├─────────────────────────────────────────────┤
//! │  Pixel ops       │  Configuration           │
//! │  - Channel maps  │  - Material catalog      │
//! │  - Layer filters │  - Skin texture lookup   │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod buffer;
pub mod command;
pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod history;
pub mod key;
pub mod layer;
pub mod material;
pub mod pixel_ops;
pub mod registry;
pub mod skin;
pub mod snapshot;
pub mod surface;

pub use buffer::RgbaBuffer;
pub use command::{Command, KeyInput};
pub use config::EditorConfig;
pub use debounce::Debounce;
pub use error::{SkinError, SkinResult};
pub use event::{SurfaceEvent, SurfaceEventKind};
pub use history::{HistoryConfig, HistoryManager};
pub use key::{Channel, SurfaceKey};
pub use layer::{CursorHints, ImageId, LayerContent, LayerId, LayerObject, Transform};
pub use material::{AlphaMode, MaterialCatalog, MaterialDefinition, ModelType};
pub use pixel_ops::{FilterKind, FilterSet};
pub use registry::SurfaceRegistry;
pub use skin::{frame_names, resolve_skin_textures, SkinSelection, SkinSource, TextureBases};
pub use snapshot::SurfaceSnapshot;
pub use surface::{
    BrushSettings, DrawMode, FilterTarget, Region, Surface, SurfaceHandle, SurfaceOptions,
};

/// Skin core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
