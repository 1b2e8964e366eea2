//! Serialized surface snapshots for undo/redo.
//!
//! A snapshot records only an allow-list of per-layer properties: content
//! reference, geometry, lock state, selectability, visibility, cursor hints
//! and the user filter values. The internal grayscale flag and filtered
//! pixel caches are derived state and are rebuilt on restore.
//!
//! Decoded images are not serialized. A snapshot holds shared references to
//! the images its layers use, so a surface may release images from its own
//! pool while history can still bring them back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::buffer::RgbaBuffer;
use crate::error::SkinResult;
use crate::layer::{CursorHints, ImageId, LayerContent, LayerId, LayerObject, Transform};
use crate::pixel_ops::FilterSet;

/// Snapshot document format version.
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Opaque serialized copy of a surface's layer stack.
#[derive(Clone)]
pub struct SurfaceSnapshot {
    json: String,
    images: HashMap<ImageId, Arc<RgbaBuffer>>,
    captured_at: SystemTime,
}

impl fmt::Debug for SurfaceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceSnapshot")
            .field("json", &self.json)
            .field("images", &self.images.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

impl SurfaceSnapshot {
    /// When the snapshot was taken.
    #[must_use]
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// The serialized form.
    #[must_use]
    pub fn as_json(&self) -> &str {
        &self.json
    }

    /// Whether two snapshots describe the same layer stack.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.json == other.json
    }

    /// Images the snapshot keeps alive.
    pub(crate) fn images(&self) -> &HashMap<ImageId, Arc<RgbaBuffer>> {
        &self.images
    }

    pub(crate) fn capture(
        layers: &[LayerObject],
        base: Option<LayerId>,
        pool: &HashMap<ImageId, Arc<RgbaBuffer>>,
    ) -> SkinResult<Self> {
        let images = layers
            .iter()
            .filter_map(|layer| layer.content.image_id())
            .filter_map(|id| pool.get(&id).map(|image| (id, Arc::clone(image))))
            .collect();
        let doc = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            layers: layers
                .iter()
                .map(|layer| LayerRecord::from_layer(layer, base == Some(layer.id)))
                .collect(),
        };
        Ok(Self {
            json: serde_json::to_string(&doc)?,
            images,
            captured_at: SystemTime::now(),
        })
    }

    pub(crate) fn parse(&self) -> SkinResult<SnapshotDocument> {
        Ok(serde_json::from_str(&self.json)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotDocument {
    pub(crate) version: u32,
    pub(crate) layers: Vec<LayerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LayerRecord {
    pub(crate) id: LayerId,
    #[serde(default)]
    pub(crate) base: bool,
    pub(crate) content: LayerContent,
    pub(crate) transform: Transform,
    #[serde(default)]
    pub(crate) filters: FilterSet,
    pub(crate) locked: bool,
    pub(crate) selectable: bool,
    pub(crate) visible: bool,
    pub(crate) cursor: CursorHints,
}

impl LayerRecord {
    fn from_layer(layer: &LayerObject, base: bool) -> Self {
        Self {
            id: layer.id,
            base,
            content: layer.content.clone(),
            transform: layer.transform,
            filters: layer.filters,
            locked: layer.locked,
            selectable: layer.selectable,
            visible: layer.visible,
            cursor: layer.cursor.clone(),
        }
    }

    /// Rebuild a layer. Derived state is left for the surface to recompute.
    pub(crate) fn into_layer(self) -> LayerObject {
        let mut layer = LayerObject::new(self.content);
        layer.id = self.id;
        layer.transform = self.transform;
        layer.filters = self.filters;
        layer.locked = self.locked;
        layer.selectable = self.selectable;
        layer.visible = self.visible;
        layer.cursor = self.cursor;
        layer
    }
}
