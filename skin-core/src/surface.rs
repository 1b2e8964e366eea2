//! Editable drawing surfaces.
//!
//! A [`Surface`] holds an ordered layer stack for one material, channel,
//! frame and size multiplier. Index 0 is the base layer once a skin texture
//! has loaded; it is never selectable, lockable or removable, and no user
//! layer may be sent behind it.
//!
//! Every mutation emits a [`SurfaceEvent`] on the surface's broadcast
//! channel. Events carry the tracking flag at emission time so the history
//! manager can ignore programmatic changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::buffer::RgbaBuffer;
use crate::error::{SkinError, SkinResult};
use crate::event::{SurfaceEvent, SurfaceEventKind};
use crate::key::{Channel, SurfaceKey};
use crate::layer::{CursorHints, ImageId, LayerContent, LayerId, LayerObject, Transform};
use crate::pixel_ops::{apply_filters, FilterKind};
use crate::snapshot::{SurfaceSnapshot, SNAPSHOT_VERSION};

/// Shared handle to a surface.
pub type SurfaceHandle = Arc<RwLock<Surface>>;

/// Capacity of each surface's change channel.
const EVENT_CAPACITY: usize = 64;

/// Lowest z-index a user layer may be sent back to.
const Z_ORDER_FLOOR: usize = 1;

/// Interaction mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrawMode {
    /// Pick and transform layers.
    #[default]
    Select,
    /// Freehand painting. Metallic surfaces only.
    Paint,
}

/// Freehand brush used in [`DrawMode::Paint`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushSettings {
    /// Gray level of new strokes.
    pub gray: u8,
    /// Stroke width in pixels (1 to 50).
    pub width: f32,
}

impl BrushSettings {
    /// Minimum stroke width.
    pub const MIN_WIDTH: f32 = 1.0;
    /// Maximum stroke width.
    pub const MAX_WIDTH: f32 = 50.0;

    /// Create brush settings with the width clamped into range.
    #[must_use]
    pub fn new(gray: u8, width: f32) -> Self {
        Self {
            gray,
            width: width.clamp(Self::MIN_WIDTH, Self::MAX_WIDTH),
        }
    }
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            gray: 200,
            width: 10.0,
        }
    }
}

/// Which layers a filter edit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    /// The current selection.
    Selected,
    /// Only the base layer.
    Base,
    /// Every layer, base included.
    All,
}

/// Per-surface layout options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceOptions {
    /// Margin around the texture region for interactive handles.
    pub padding: u32,
    /// Offset applied to duplicated layers, in both axes.
    pub duplicate_offset: f32,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            padding: 64,
            duplicate_offset: 20.0,
        }
    }
}

/// A pixel rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// State right after the most recent base layer was installed.
///
/// History compares `epoch` with its own to notice a base load it has not
/// yet caught up with, and restarts from `baseline`.
#[derive(Debug, Clone, Default)]
pub struct BaseEpoch {
    /// Number of base layers installed so far.
    pub epoch: u64,
    /// Edit revision at installation.
    pub revision: u64,
    /// Layer stack at installation.
    pub baseline: Option<SurfaceSnapshot>,
}

/// An editable drawing surface.
#[derive(Debug)]
pub struct Surface {
    key: SurfaceKey,
    texture_width: u32,
    texture_height: u32,
    options: SurfaceOptions,
    layers: Vec<LayerObject>,
    base: Option<LayerId>,
    selection: Vec<LayerId>,
    locked: HashSet<LayerId>,
    images: HashMap<ImageId, Arc<RgbaBuffer>>,
    mode: DrawMode,
    brush: BrushSettings,
    tracking: bool,
    revision: u64,
    base_ticket: u64,
    base_epoch: BaseEpoch,
    events: broadcast::Sender<SurfaceEvent>,
}

impl Surface {
    /// Create an empty surface for a texture of the given size.
    ///
    /// Metallic surfaces start in paint mode.
    #[must_use]
    pub fn new(key: SurfaceKey, texture_width: u32, texture_height: u32, options: SurfaceOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mode = match key.channel {
            Channel::Metallic => DrawMode::Paint,
            Channel::Color => DrawMode::Select,
        };
        Self {
            key,
            texture_width,
            texture_height,
            options,
            layers: Vec::new(),
            base: None,
            selection: Vec::new(),
            locked: HashSet::new(),
            images: HashMap::new(),
            mode,
            brush: BrushSettings::default(),
            tracking: true,
            revision: 0,
            base_ticket: 0,
            base_epoch: BaseEpoch::default(),
            events,
        }
    }

    /// Wrap in a shared handle.
    #[must_use]
    pub fn into_handle(self) -> SurfaceHandle {
        Arc::new(RwLock::new(self))
    }

    /// Surface address.
    #[must_use]
    pub fn key(&self) -> &SurfaceKey {
        &self.key
    }

    /// Channel this surface paints.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.key.channel
    }

    /// Texture size in pixels.
    #[must_use]
    pub fn texture_size(&self) -> (u32, u32) {
        (self.texture_width, self.texture_height)
    }

    /// Padding margin around the texture region.
    #[must_use]
    pub fn padding(&self) -> u32 {
        self.options.padding
    }

    /// Full surface size including padding.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        let pad = self.options.padding * 2;
        (self.texture_width + pad, self.texture_height + pad)
    }

    /// The texture area, excluding padding.
    #[must_use]
    pub fn texture_region(&self) -> Region {
        Region {
            x: self.options.padding,
            y: self.options.padding,
            width: self.texture_width,
            height: self.texture_height,
        }
    }

    fn center(&self) -> (f32, f32) {
        let (w, h) = self.size();
        (w as f32 / 2.0, h as f32 / 2.0)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribe to change events. Drop the receiver to unsubscribe.
    #[must_use]
    pub fn on_change(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    /// Whether changes are currently recorded by history.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Enable or disable history tracking.
    pub fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    /// Counter bumped by every tracked user edit.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Base epoch of the current base layer.
    #[must_use]
    pub fn base_epoch(&self) -> &BaseEpoch {
        &self.base_epoch
    }

    fn emit(&mut self, kind: SurfaceEventKind) {
        let event = SurfaceEvent {
            key: self.key.clone(),
            kind,
            tracked: self.tracking,
        };
        if event.is_user_edit() {
            self.revision += 1;
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run `f` with tracking suspended, restoring the previous flag after.
    fn untracked<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = self.tracking;
        self.tracking = false;
        let result = f(self);
        self.tracking = previous;
        result
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Layers in z-order, bottom first.
    #[must_use]
    pub fn layers(&self) -> &[LayerObject] {
        &self.layers
    }

    /// Number of layers, base included.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Get a layer by ID.
    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&LayerObject> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Z-index of a layer.
    #[must_use]
    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// The base layer, once loaded.
    #[must_use]
    pub fn base_layer(&self) -> Option<&LayerObject> {
        self.base.and_then(|id| self.layer(id))
    }

    /// Whether `id` is the base layer.
    #[must_use]
    pub fn is_base(&self, id: LayerId) -> bool {
        self.base == Some(id)
    }

    /// Decoded image from the pool.
    #[must_use]
    pub fn image(&self, id: ImageId) -> Option<Arc<RgbaBuffer>> {
        self.images.get(&id).cloned()
    }

    /// Pixels to draw for an image layer: filtered if filters are active.
    #[must_use]
    pub fn layer_pixels(&self, layer: &LayerObject) -> Option<Arc<RgbaBuffer>> {
        if let Some(rendered) = layer.rendered() {
            return Some(Arc::clone(rendered));
        }
        layer.content.image_id().and_then(|id| self.image(id))
    }

    /// Selected layer IDs in selection order.
    #[must_use]
    pub fn selection(&self) -> &[LayerId] {
        &self.selection
    }

    /// Locked layer IDs.
    #[must_use]
    pub fn locked_layers(&self) -> &HashSet<LayerId> {
        &self.locked
    }

    /// Whether every selected layer is locked.
    #[must_use]
    pub fn is_selection_locked(&self) -> bool {
        !self.selection.is_empty() && self.selection.iter().all(|id| self.locked.contains(id))
    }

    /// Current interaction mode.
    #[must_use]
    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    /// Current brush.
    #[must_use]
    pub fn brush(&self) -> BrushSettings {
        self.brush
    }

    // ------------------------------------------------------------------
    // Mode and brush
    // ------------------------------------------------------------------

    /// Switch interaction mode. Paint mode is only available on metallic
    /// surfaces; returns whether the mode is now `mode`.
    pub fn set_mode(&mut self, mode: DrawMode) -> bool {
        if mode == DrawMode::Paint && self.key.channel != Channel::Metallic {
            return false;
        }
        if self.mode != mode {
            debug!(surface = %self.key, ?mode, "Draw mode changed");
            self.mode = mode;
            if mode == DrawMode::Paint {
                self.clear_selection();
            }
        }
        true
    }

    /// Replace the brush settings.
    pub fn set_brush(&mut self, brush: BrushSettings) {
        self.brush = BrushSettings::new(brush.gray, brush.width);
    }

    // ------------------------------------------------------------------
    // Adding layers
    // ------------------------------------------------------------------

    /// Decode image bytes and add them as a new layer.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Decode`] for undecodable bytes and
    /// [`SkinError::ZeroDimensionImage`] for an empty image. The layer stack
    /// is unchanged on error.
    pub fn add_layer(&mut self, bytes: &[u8]) -> SkinResult<LayerId> {
        let image = RgbaBuffer::decode(bytes)?;
        self.add_image(image)
    }

    /// Add a decoded image as a new layer.
    ///
    /// The image is scaled down uniformly to fit the texture, centred, and on
    /// metallic surfaces marked grayscale. It becomes the selection, and the
    /// surface leaves paint mode.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::ZeroDimensionImage`] for an empty image.
    pub fn add_image(&mut self, image: RgbaBuffer) -> SkinResult<LayerId> {
        if image.is_empty() {
            return Err(SkinError::ZeroDimensionImage {
                width: image.width,
                height: image.height,
            });
        }

        let width_ratio = image.width as f32 / self.texture_width as f32;
        let height_ratio = image.height as f32 / self.texture_height as f32;
        let scale = if width_ratio > 1.0 || height_ratio > 1.0 {
            1.0 / width_ratio.max(height_ratio)
        } else {
            1.0
        };

        let (cx, cy) = self.center();
        let image_id = ImageId::new();
        let mut layer = LayerObject::new(LayerContent::Image {
            image: image_id,
            width: image.width,
            height: image.height,
        })
        .with_transform(Transform {
            scale_x: scale,
            scale_y: scale,
            ..Transform::at(cx, cy)
        });
        layer.grayscale = self.key.channel == Channel::Metallic;

        self.images.insert(image_id, Arc::new(image));
        render_layer(&self.images, &mut layer);

        let id = layer.id;
        debug!(surface = %self.key, layer = %id, scale, "Layer added");
        self.mode = DrawMode::Select;
        self.layers.push(layer);
        self.emit(SurfaceEventKind::Added);
        self.set_selection(vec![id]);
        Ok(id)
    }

    /// Add a freehand stroke in the current brush. Points are in surface
    /// coordinates.
    ///
    /// Returns `None` outside paint mode or for an empty stroke.
    pub fn paint_stroke(&mut self, points: &[[f32; 2]]) -> Option<LayerId> {
        if self.mode != DrawMode::Paint || points.is_empty() {
            return None;
        }
        let (mut x0, mut y0) = (f32::MAX, f32::MAX);
        let (mut x1, mut y1) = (f32::MIN, f32::MIN);
        for [x, y] in points {
            x0 = x0.min(*x);
            y0 = y0.min(*y);
            x1 = x1.max(*x);
            y1 = y1.max(*y);
        }
        let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
        let local = points.iter().map(|[x, y]| [x - cx, y - cy]).collect();

        let mut layer = LayerObject::new(LayerContent::Path {
            points: local,
            width: self.brush.width,
            gray: self.brush.gray,
        })
        .with_transform(Transform::at(cx, cy));
        layer.grayscale = self.key.channel == Channel::Metallic;

        let id = layer.id;
        self.layers.push(layer);
        self.emit(SurfaceEventKind::Added);
        Some(id)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn set_selection(&mut self, selection: Vec<LayerId>) {
        if self.selection != selection {
            self.selection = selection;
            self.emit(SurfaceEventKind::SelectionChanged);
        }
    }

    /// Replace the selection.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::BaseLayerProtected`] if `ids` contains the base
    /// layer or another non-selectable layer, and [`SkinError::LayerNotFound`]
    /// for an unknown ID. The selection is unchanged on error.
    pub fn select(&mut self, ids: &[LayerId]) -> SkinResult<()> {
        for id in ids {
            let layer = self
                .layer(*id)
                .ok_or_else(|| SkinError::LayerNotFound(id.to_string()))?;
            if self.is_base(*id) || !layer.selectable {
                return Err(SkinError::BaseLayerProtected);
            }
        }
        let mut selection = Vec::with_capacity(ids.len());
        for id in ids {
            if !selection.contains(id) {
                selection.push(*id);
            }
        }
        self.set_selection(selection);
        Ok(())
    }

    /// Clear the selection.
    pub fn clear_selection(&mut self) {
        self.set_selection(Vec::new());
    }

    /// Remove every selected layer. Returns the number removed.
    pub fn remove_selection(&mut self) -> usize {
        if self.selection.is_empty() {
            return 0;
        }
        let doomed: HashSet<LayerId> = self.selection.iter().copied().collect();
        let before = self.layers.len();
        let base = self.base;
        self.layers
            .retain(|l| !doomed.contains(&l.id) || base == Some(l.id));
        self.locked.retain(|id| !doomed.contains(id));
        let removed = before - self.layers.len();
        self.prune_images();

        self.clear_selection();
        if removed > 0 {
            debug!(surface = %self.key, removed, "Selection removed");
            self.emit(SurfaceEventKind::Removed);
        }
        removed
    }

    /// Clone every selected layer, offset the clones and select them.
    ///
    /// Each clone is added to the stack individually, above all existing
    /// layers, keeping the original relative order.
    pub fn duplicate_selection(&mut self) -> Vec<LayerId> {
        if self.selection.is_empty() {
            return Vec::new();
        }
        let offset = self.options.duplicate_offset;
        let clones: Vec<LayerObject> = self
            .layers
            .iter()
            .filter(|l| self.selection.contains(&l.id))
            .map(|l| {
                let mut copy = l.duplicate();
                copy.transform.x += offset;
                copy.transform.y += offset;
                copy
            })
            .collect();

        let ids: Vec<LayerId> = clones.iter().map(|l| l.id).collect();
        for clone in clones {
            if clone.locked {
                self.locked.insert(clone.id);
            }
            self.layers.push(clone);
        }
        debug!(surface = %self.key, count = ids.len(), "Selection duplicated");
        self.emit(SurfaceEventKind::Added);
        self.set_selection(ids.clone());
        ids
    }

    fn active_index(&self) -> Option<usize> {
        match self.selection.as_slice() {
            [id] => self.index_of(*id),
            _ => None,
        }
    }

    /// Move the single selected layer one step up. Returns whether it moved.
    pub fn bring_selection_forward(&mut self) -> bool {
        let Some(index) = self.active_index() else {
            return false;
        };
        if index + 1 >= self.layers.len() {
            return false;
        }
        self.layers.swap(index, index + 1);
        self.emit(SurfaceEventKind::Modified);
        true
    }

    /// Move the single selected layer one step down, never below index 1.
    /// Returns whether it moved.
    pub fn send_selection_backward(&mut self) -> bool {
        let Some(index) = self.active_index() else {
            return false;
        };
        if index <= Z_ORDER_FLOOR {
            return false;
        }
        self.layers.swap(index, index - 1);
        self.emit(SurfaceEventKind::Modified);
        true
    }

    /// Lock every selected layer. Returns the number newly locked.
    pub fn lock_selection(&mut self) -> usize {
        self.set_selection_locked(true)
    }

    /// Unlock every selected layer. Returns the number newly unlocked.
    pub fn unlock_selection(&mut self) -> usize {
        self.set_selection_locked(false)
    }

    fn set_selection_locked(&mut self, locked: bool) -> usize {
        let mut changed = 0;
        for layer in &mut self.layers {
            if !self.selection.contains(&layer.id) || layer.locked == locked {
                continue;
            }
            layer.locked = locked;
            if locked {
                self.locked.insert(layer.id);
            } else {
                self.locked.remove(&layer.id);
            }
            changed += 1;
        }
        if changed > 0 {
            self.emit(SurfaceEventKind::Modified);
        }
        changed
    }

    /// Shift every selected, unlocked layer. Returns the number moved.
    pub fn nudge_selection(&mut self, top: f32, left: f32) -> usize {
        let mut moved = 0;
        for layer in &mut self.layers {
            if !self.selection.contains(&layer.id) {
                continue;
            }
            if layer.locked {
                debug!(layer = %layer.id, "Skipping nudge of locked layer");
                continue;
            }
            layer.transform.x += left;
            layer.transform.y += top;
            moved += 1;
        }
        if moved > 0 {
            self.emit(SurfaceEventKind::Modified);
        }
        moved
    }

    /// Replace a layer's transform.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::LayerNotFound`], [`SkinError::BaseLayerProtected`]
    /// for the base layer, or [`SkinError::Locked`] for a locked layer.
    pub fn set_transform(&mut self, id: LayerId, transform: Transform) -> SkinResult<()> {
        if self.is_base(id) {
            return Err(SkinError::BaseLayerProtected);
        }
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| SkinError::LayerNotFound(id.to_string()))?;
        if layer.locked {
            return Err(SkinError::Locked(id.to_string()));
        }
        layer.transform = transform;
        self.emit(SurfaceEventKind::Modified);
        Ok(())
    }

    /// Show or hide a layer.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::LayerNotFound`] for an unknown ID.
    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> SkinResult<()> {
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| SkinError::LayerNotFound(id.to_string()))?;
        if layer.visible != visible {
            layer.visible = visible;
            self.emit(SurfaceEventKind::Modified);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    fn filter_targets(&self, target: FilterTarget) -> Vec<LayerId> {
        match target {
            FilterTarget::Selected => self.selection.clone(),
            FilterTarget::Base => self.base.into_iter().collect(),
            FilterTarget::All => self.layers.iter().map(|l| l.id).collect(),
        }
    }

    /// Set one filter value on the targeted layers and re-render them from
    /// their source pixels. Returns the number of layers updated.
    pub fn set_filter(&mut self, target: FilterTarget, kind: FilterKind, value: f32) -> usize {
        let targets = self.filter_targets(target);
        let mut updated = 0;
        for layer in &mut self.layers {
            if !targets.contains(&layer.id) {
                continue;
            }
            layer.filters.set(kind, value);
            render_layer(&self.images, layer);
            updated += 1;
        }
        if updated > 0 {
            self.emit(SurfaceEventKind::Modified);
        }
        updated
    }

    /// Common filter value across the targeted layers; `None` when they
    /// differ or there are no targets.
    #[must_use]
    pub fn filter_value(&self, target: FilterTarget, kind: FilterKind) -> Option<f32> {
        let targets = self.filter_targets(target);
        let mut values = self
            .layers
            .iter()
            .filter(|l| targets.contains(&l.id))
            .map(|l| l.filters.get(kind));
        let first = values.next()?;
        values.all(|v| v == first).then_some(first)
    }

    // ------------------------------------------------------------------
    // Base layer
    // ------------------------------------------------------------------

    /// Start loading a new base texture and return its ticket.
    ///
    /// The surface is untouched until [`Surface::finish_base_load`] accepts
    /// the ticket; only the most recent one is accepted.
    pub fn begin_base_load(&mut self) -> u64 {
        self.base_ticket += 1;
        debug!(surface = %self.key, ticket = self.base_ticket, "Base load started");
        self.base_ticket
    }

    /// Ticket of the most recent base load.
    #[must_use]
    pub fn base_ticket(&self) -> u64 {
        self.base_ticket
    }

    /// Install a loaded base texture if `ticket` is still current.
    ///
    /// The texture is stretched to exactly fill the texture region, centred,
    /// locked and made non-selectable. Returns `false` when the load was
    /// superseded and the texture discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::ZeroDimensionImage`] for an empty texture.
    pub fn finish_base_load(&mut self, ticket: u64, texture: RgbaBuffer) -> SkinResult<bool> {
        if ticket != self.base_ticket {
            debug!(surface = %self.key, ticket, latest = self.base_ticket, "Discarding stale base load");
            return Ok(false);
        }
        if texture.is_empty() {
            return Err(SkinError::ZeroDimensionImage {
                width: texture.width,
                height: texture.height,
            });
        }

        let scale_x = if texture.width == self.texture_width {
            1.0
        } else {
            self.texture_width as f32 / texture.width as f32
        };
        let scale_y = if texture.height == self.texture_height {
            1.0
        } else {
            self.texture_height as f32 / texture.height as f32
        };
        let (cx, cy) = self.center();
        let image_id = ImageId::new();
        let mut layer = LayerObject::new(LayerContent::Image {
            image: image_id,
            width: texture.width,
            height: texture.height,
        })
        .with_transform(Transform {
            scale_x,
            scale_y,
            ..Transform::at(cx, cy)
        });
        layer.selectable = false;
        layer.locked = true;
        layer.cursor = CursorHints::arrow();
        layer.grayscale = self.key.channel == Channel::Metallic;

        let id = layer.id;
        self.untracked(|s| {
            s.layers.clear();
            s.images.clear();
            s.locked.clear();
            s.selection.clear();
            s.images.insert(image_id, Arc::new(texture));
            render_layer(&s.images, &mut layer);
            s.layers.push(layer);
            s.base = Some(id);
            s.emit(SurfaceEventKind::BaseLoaded);
        });
        let baseline = match self.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(surface = %self.key, "Failed to capture base baseline: {}", e);
                None
            }
        };
        self.base_epoch = BaseEpoch {
            epoch: self.base_epoch.epoch + 1,
            revision: self.revision,
            baseline,
        };
        debug!(surface = %self.key, ticket, scale_x, scale_y, "Base layer installed");
        Ok(true)
    }

    fn prune_images(&mut self) {
        let referenced: HashSet<ImageId> = self
            .layers
            .iter()
            .filter_map(|l| l.content.image_id())
            .collect();
        self.images.retain(|id, _| referenced.contains(id));
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize the layer stack.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Serialization`] if encoding fails.
    pub fn snapshot(&self) -> SkinResult<SurfaceSnapshot> {
        SurfaceSnapshot::capture(&self.layers, self.base, &self.images)
    }

    /// Clear the surface and reload it from a snapshot.
    ///
    /// Tracking is suspended during the reload. The selection is cleared,
    /// the locked set rebuilt and derived layer state recomputed for this
    /// surface's channel.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Serialization`] for a malformed snapshot, in
    /// which case the surface is unchanged.
    pub fn restore(&mut self, snapshot: &SurfaceSnapshot) -> SkinResult<()> {
        let doc = snapshot.parse()?;
        if doc.version != SNAPSHOT_VERSION {
            warn!(surface = %self.key, version = doc.version, "Restoring snapshot from another version");
        }

        let grayscale = self.key.channel == Channel::Metallic;
        let mut base = None;
        let mut layers = Vec::with_capacity(doc.layers.len());
        for record in doc.layers {
            let is_base = record.base;
            let mut layer = record.into_layer();
            if let Some(image) = layer.content.image_id() {
                if !self.images.contains_key(&image) {
                    if let Some(kept) = snapshot.images().get(&image) {
                        self.images.insert(image, Arc::clone(kept));
                    }
                }
                if !self.images.contains_key(&image) {
                    warn!(surface = %self.key, %image, "Snapshot references a released image; skipping layer");
                    continue;
                }
            }
            if is_base {
                base = Some(layer.id);
            }
            layer.grayscale = grayscale;
            render_layer(&self.images, &mut layer);
            layers.push(layer);
        }

        self.untracked(|s| {
            s.locked = layers.iter().filter(|l| l.locked).map(|l| l.id).collect();
            s.layers = layers;
            s.base = base;
            s.prune_images();
            s.clear_selection();
            s.emit(SurfaceEventKind::Modified);
        });
        debug!(surface = %self.key, layers = self.layers.len(), "Surface restored");
        Ok(())
    }
}

/// Recompute a layer's filtered pixels from its source image.
fn render_layer(images: &HashMap<ImageId, Arc<RgbaBuffer>>, layer: &mut LayerObject) {
    layer.rendered = None;
    if !layer.grayscale && layer.filters.is_identity() {
        return;
    }
    if let Some(source) = layer.content.image_id().and_then(|id| images.get(&id)) {
        layer.rendered = Some(Arc::new(apply_filters(source, &layer.filters, layer.grayscale)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(channel: Channel) -> Surface {
        Surface::new(
            SurfaceKey::new("base", channel, 0, 1),
            64,
            32,
            SurfaceOptions::default(),
        )
    }

    fn with_base(channel: Channel) -> Surface {
        let mut s = surface(channel);
        let ticket = s.begin_base_load();
        assert!(s
            .finish_base_load(ticket, RgbaBuffer::filled(64, 32, [90, 90, 90, 255]))
            .expect("base"));
        s
    }

    #[test]
    fn test_add_image_scales_to_fit_and_centres() {
        let mut s = surface(Channel::Color);
        let id = s
            .add_image(RgbaBuffer::filled(128, 16, [255, 0, 0, 255]))
            .expect("add");
        let layer = s.layer(id).expect("layer");
        assert!((layer.transform.scale_x - 0.5).abs() < f32::EPSILON);
        assert!((layer.transform.scale_y - 0.5).abs() < f32::EPSILON);
        assert!((layer.transform.x - 96.0).abs() < f32::EPSILON);
        assert!((layer.transform.y - 80.0).abs() < f32::EPSILON);
        assert_eq!(s.selection(), &[id]);
        assert!(!layer.grayscale);
        assert!(layer.rendered().is_none());
    }

    #[test]
    fn test_small_image_keeps_natural_size() {
        let mut s = surface(Channel::Color);
        let id = s.add_image(RgbaBuffer::filled(8, 8, [1, 2, 3, 4])).expect("add");
        let t = s.layer(id).expect("layer").transform;
        assert!((t.scale_x - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut s = with_base(Channel::Color);
        let before = s.layer_count();
        let err = s.add_image(RgbaBuffer::transparent(0, 12)).unwrap_err();
        assert!(matches!(err, SkinError::ZeroDimensionImage { width: 0, height: 12 }));
        let err = s.add_image(RgbaBuffer::transparent(12, 0)).unwrap_err();
        assert!(matches!(err, SkinError::ZeroDimensionImage { .. }));
        assert_eq!(s.layer_count(), before);
    }

    #[test]
    fn test_metallic_layers_are_grayscale() {
        let mut s = surface(Channel::Metallic);
        assert!(s.set_mode(DrawMode::Paint));
        let id = s
            .add_image(RgbaBuffer::filled(4, 4, [30, 60, 90, 255]))
            .expect("add");
        let layer = s.layer(id).expect("layer");
        assert!(layer.grayscale);
        assert_eq!(s.mode(), DrawMode::Select);
        let pixels = s.layer_pixels(layer).expect("pixels");
        assert_eq!(pixels.pixel(0, 0), Some([60, 60, 60, 255]));
    }

    #[test]
    fn test_paint_mode_only_on_metallic() {
        let mut s = surface(Channel::Color);
        assert!(!s.set_mode(DrawMode::Paint));
        assert_eq!(s.mode(), DrawMode::Select);
        assert!(s.paint_stroke(&[[1.0, 1.0]]).is_none());
    }

    #[test]
    fn test_paint_stroke_uses_brush() {
        let mut s = surface(Channel::Metallic);
        s.set_brush(BrushSettings::new(180, 500.0));
        assert!(s.set_mode(DrawMode::Paint));
        let id = s.paint_stroke(&[[10.0, 10.0], [30.0, 20.0]]).expect("stroke");
        let layer = s.layer(id).expect("layer");
        match &layer.content {
            LayerContent::Path { points, width, gray } => {
                assert_eq!(*gray, 180);
                assert!((width - BrushSettings::MAX_WIDTH).abs() < f32::EPSILON);
                assert_eq!(points, &vec![[-10.0, -5.0], [10.0, 5.0]]);
            }
            LayerContent::Image { .. } => panic!("expected a path"),
        }
        assert!(s.selection().is_empty());
    }

    #[test]
    fn test_base_layer_is_protected() {
        let mut s = with_base(Channel::Color);
        let base = s.base_layer().expect("base").id;
        assert!(matches!(s.select(&[base]), Err(SkinError::BaseLayerProtected)));
        assert!(matches!(
            s.set_transform(base, Transform::default()),
            Err(SkinError::BaseLayerProtected)
        ));
        assert!(s.selection().is_empty());
        assert_eq!(s.remove_selection(), 0);
        assert_eq!(s.layer_count(), 1);
    }

    #[test]
    fn test_base_layer_stretches_to_texture() {
        let mut s = surface(Channel::Color);
        let ticket = s.begin_base_load();
        s.finish_base_load(ticket, RgbaBuffer::filled(32, 32, [0, 0, 0, 255]))
            .expect("load");
        let base = s.base_layer().expect("base");
        assert!((base.transform.scale_x - 2.0).abs() < f32::EPSILON);
        assert!((base.transform.scale_y - 1.0).abs() < f32::EPSILON);
        assert!(base.locked);
        assert!(!base.selectable);
        assert_eq!(base.cursor, CursorHints::arrow());
        assert_eq!(s.index_of(base.id), Some(0));
    }

    #[test]
    fn test_stale_base_load_discarded() {
        let mut s = surface(Channel::Color);
        let first = s.begin_base_load();
        let second = s.begin_base_load();
        let applied = s
            .finish_base_load(first, RgbaBuffer::filled(64, 32, [1, 1, 1, 255]))
            .expect("stale");
        assert!(!applied);
        assert!(s.base_layer().is_none());

        assert!(s
            .finish_base_load(second, RgbaBuffer::filled(64, 32, [2, 2, 2, 255]))
            .expect("current"));
        let base = s.base_layer().expect("base");
        let pixels = s.layer_pixels(base).expect("pixels");
        assert_eq!(pixels.pixel(0, 0), Some([2, 2, 2, 255]));
    }

    #[test]
    fn test_send_backward_floor() {
        let mut s = with_base(Channel::Color);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        let b = s.add_image(RgbaBuffer::filled(4, 4, [0, 1, 0, 255])).expect("b");

        s.select(&[a]).expect("select");
        assert_eq!(s.index_of(a), Some(1));
        assert!(!s.send_selection_backward());
        assert_eq!(s.index_of(a), Some(1));

        s.select(&[b]).expect("select");
        assert!(s.send_selection_backward());
        assert_eq!(s.index_of(b), Some(1));
        assert!(!s.send_selection_backward());

        assert!(s.bring_selection_forward());
        assert_eq!(s.index_of(b), Some(2));
        assert!(!s.bring_selection_forward());
    }

    #[test]
    fn test_z_order_needs_single_selection() {
        let mut s = with_base(Channel::Color);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        let b = s.add_image(RgbaBuffer::filled(4, 4, [0, 1, 0, 255])).expect("b");
        s.select(&[a, b]).expect("select");
        assert!(!s.bring_selection_forward());
        assert!(!s.send_selection_backward());
    }

    #[test]
    fn test_duplicate_offsets_and_copies_lock() {
        let mut s = with_base(Channel::Color);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        let b = s.add_image(RgbaBuffer::filled(4, 4, [0, 1, 0, 255])).expect("b");
        s.select(&[b, a]).expect("select");
        assert_eq!(s.lock_selection(), 2);

        let clones = s.duplicate_selection();
        assert_eq!(clones.len(), 2);
        assert_eq!(s.layer_count(), 5);
        assert_eq!(s.selection(), clones.as_slice());

        let original = s.layer(a).expect("a").transform;
        let copy = s.layer(clones[0]).expect("copy");
        assert!((copy.transform.x - original.x - 20.0).abs() < f32::EPSILON);
        assert!((copy.transform.y - original.y - 20.0).abs() < f32::EPSILON);
        assert!(copy.locked);
        assert!(s.locked_layers().contains(&copy.id));
        // Clones keep the z-order of their originals.
        assert_eq!(s.index_of(clones[0]), Some(3));
        assert_eq!(s.index_of(clones[1]), Some(4));
    }

    #[test]
    fn test_locked_layers_reject_transforms() {
        let mut s = with_base(Channel::Color);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        assert_eq!(s.lock_selection(), 1);
        assert!(s.is_selection_locked());
        assert_eq!(s.selection(), &[a]);

        assert!(matches!(
            s.set_transform(a, Transform::default()),
            Err(SkinError::Locked(_))
        ));
        assert_eq!(s.nudge_selection(1.0, 1.0), 0);

        assert_eq!(s.unlock_selection(), 1);
        assert!(s.locked_layers().is_empty());
        assert_eq!(s.nudge_selection(-1.0, 2.0), 1);
    }

    #[test]
    fn test_nudge_moves_selection() {
        let mut s = surface(Channel::Color);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        let before = s.layer(a).expect("a").transform;
        s.nudge_selection(1.0, -1.0);
        let after = s.layer(a).expect("a").transform;
        assert!((after.y - before.y - 1.0).abs() < f32::EPSILON);
        assert!((after.x - before.x + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_remove_selection() {
        let mut s = with_base(Channel::Color);
        s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        assert_eq!(s.remove_selection(), 1);
        assert_eq!(s.layer_count(), 1);
        assert_eq!(s.remove_selection(), 0);
    }

    #[test]
    fn test_filter_targets() {
        let mut s = with_base(Channel::Color);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [100, 50, 0, 255])).expect("a");

        assert_eq!(s.set_filter(FilterTarget::Selected, FilterKind::Brightness, 0.5), 1);
        assert!(s.layer(a).expect("a").rendered().is_some());
        assert_eq!(s.filter_value(FilterTarget::Selected, FilterKind::Brightness), Some(0.5));
        assert_eq!(s.filter_value(FilterTarget::All, FilterKind::Brightness), None);

        assert_eq!(s.set_filter(FilterTarget::Base, FilterKind::Contrast, 0.2), 1);
        assert_eq!(s.set_filter(FilterTarget::All, FilterKind::Brightness, 0.0), 2);
        assert_eq!(s.filter_value(FilterTarget::All, FilterKind::Brightness), Some(0.0));

        s.clear_selection();
        assert_eq!(s.set_filter(FilterTarget::Selected, FilterKind::Saturation, 0.3), 0);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut s = with_base(Channel::Metallic);
        let a = s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("a");
        s.lock_selection();
        let snapshot = s.snapshot().expect("snapshot");

        s.unlock_selection();
        s.remove_selection();
        assert_eq!(s.layer_count(), 1);

        s.restore(&snapshot).expect("restore");
        assert_eq!(s.layer_count(), 2);
        assert!(s.layer(a).expect("a").locked);
        assert!(s.layer(a).expect("a").grayscale);
        assert!(s.locked_layers().contains(&a));
        assert!(s.selection().is_empty());
        assert!(s.base_layer().is_some());
        assert!(s.is_tracking());
        assert!(s.snapshot().expect("again").same_state(&snapshot));
    }

    #[tokio::test]
    async fn test_events_carry_tracking_flag() {
        let mut s = surface(Channel::Color);
        let mut rx = s.on_change();

        s.add_image(RgbaBuffer::filled(4, 4, [1, 0, 0, 255])).expect("add");
        let added = rx.recv().await.expect("added");
        assert_eq!(added.kind, SurfaceEventKind::Added);
        assert!(added.tracked);
        let selected = rx.recv().await.expect("selection");
        assert_eq!(selected.kind, SurfaceEventKind::SelectionChanged);

        let ticket = s.begin_base_load();
        assert!(rx.try_recv().is_err());
        assert!(s.is_tracking());

        s.finish_base_load(ticket, RgbaBuffer::filled(64, 32, [0, 0, 0, 255]))
            .expect("load");
        let loaded = rx.recv().await.expect("loaded");
        assert_eq!(loaded.kind, SurfaceEventKind::BaseLoaded);
        assert!(!loaded.tracked);
    }
}
