//! Layer objects - the drawable items stacked on a surface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::buffer::RgbaBuffer;
use crate::pixel_ops::FilterSet;

/// Unique identifier for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(Uuid);

impl LayerId {
    /// Create a new unique layer ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a decoded image held in a surface's image pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(Uuid);

impl ImageId {
    /// Create a new unique image ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a layer draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum LayerContent {
    /// A raster image from the surface's image pool.
    Image {
        /// Pool entry.
        image: ImageId,
        /// Natural width in pixels.
        width: u32,
        /// Natural height in pixels.
        height: u32,
    },

    /// A freehand brush stroke.
    Path {
        /// Points relative to the layer centre.
        points: Vec<[f32; 2]>,
        /// Stroke width in pixels.
        width: f32,
        /// Gray level of the stroke.
        gray: u8,
    },
}

impl LayerContent {
    /// Unscaled half-extents around the layer centre.
    #[must_use]
    pub fn half_extents(&self) -> (f32, f32) {
        match self {
            Self::Image { width, height, .. } => (*width as f32 / 2.0, *height as f32 / 2.0),
            Self::Path { points, width, .. } => {
                let pad = width / 2.0;
                let (mut hx, mut hy) = (0.0_f32, 0.0_f32);
                for [x, y] in points {
                    hx = hx.max(x.abs());
                    hy = hy.max(y.abs());
                }
                (hx + pad, hy + pad)
            }
        }
    }

    /// Pool image referenced by this content, if any.
    #[must_use]
    pub fn image_id(&self) -> Option<ImageId> {
        match self {
            Self::Image { image, .. } => Some(*image),
            Self::Path { .. } => None,
        }
    }
}

/// Placement of a layer on its surface.
///
/// `x`/`y` locate the layer centre in surface coordinates, which include the
/// interactive padding margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    /// Centre X.
    pub x: f32,
    /// Centre Y.
    pub y: f32,
    /// Horizontal scale.
    pub scale_x: f32,
    /// Vertical scale.
    pub scale_y: f32,
    /// Rotation in degrees, clockwise.
    pub angle: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
        }
    }
}

impl Transform {
    /// Transform centred at a point with unit scale.
    #[must_use]
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    /// Map a surface point into the layer's unscaled local space.
    ///
    /// Returns `None` for a degenerate (zero) scale.
    #[must_use]
    pub fn to_local(&self, sx: f32, sy: f32) -> Option<(f32, f32)> {
        if self.scale_x == 0.0 || self.scale_y == 0.0 {
            return None;
        }
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let dx = sx - self.x;
        let dy = sy - self.y;
        let rx = dx * cos + dy * sin;
        let ry = -dx * sin + dy * cos;
        Some((rx / self.scale_x, ry / self.scale_y))
    }

    /// Axis-aligned bounds `(min_x, min_y, max_x, max_y)` of a local box.
    #[must_use]
    pub fn bounds(&self, half_w: f32, half_h: f32) -> (f32, f32, f32, f32) {
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let hw = half_w * self.scale_x.abs();
        let hh = half_h * self.scale_y.abs();
        let ex = (hw * cos).abs() + (hh * sin).abs();
        let ey = (hw * sin).abs() + (hh * cos).abs();
        (self.x - ex, self.y - ey, self.x + ex, self.y + ey)
    }
}

/// Cursor hints shown by an interactive front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorHints {
    /// Cursor while hovering.
    pub hover: String,
    /// Cursor while dragging.
    pub moving: String,
}

impl Default for CursorHints {
    fn default() -> Self {
        Self {
            hover: "move".to_string(),
            moving: "move".to_string(),
        }
    }
}

impl CursorHints {
    /// Plain arrow cursor, for the base layer.
    #[must_use]
    pub fn arrow() -> Self {
        Self {
            hover: "default".to_string(),
            moving: "default".to_string(),
        }
    }
}

/// A drawable object in a surface's layer stack.
#[derive(Debug, Clone)]
pub struct LayerObject {
    /// Unique identifier.
    pub id: LayerId,
    /// Content.
    pub content: LayerContent,
    /// Position, scale and rotation.
    pub transform: Transform,
    /// User-adjustable filters.
    pub filters: FilterSet,
    /// Internal grayscale filter; set on every metallic-surface layer.
    pub grayscale: bool,
    /// Movement, scaling and rotation locked.
    pub locked: bool,
    /// Whether the layer may be selected.
    pub selectable: bool,
    /// Whether the layer is drawn.
    pub visible: bool,
    /// Cursor hints.
    pub cursor: CursorHints,
    pub(crate) rendered: Option<Arc<RgbaBuffer>>,
}

impl LayerObject {
    /// Create a layer with the given content.
    #[must_use]
    pub fn new(content: LayerContent) -> Self {
        Self {
            id: LayerId::new(),
            content,
            transform: Transform::default(),
            filters: FilterSet::default(),
            grayscale: false,
            locked: false,
            selectable: true,
            visible: true,
            cursor: CursorHints::default(),
            rendered: None,
        }
    }

    /// Set the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Clone under a fresh ID.
    ///
    /// Lock and visibility are copied explicitly along with the rest.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = LayerId::new();
        copy.locked = self.locked;
        copy.visible = self.visible;
        copy
    }

    /// Surface-space bounds `(min_x, min_y, max_x, max_y)`.
    #[must_use]
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let (hw, hh) = self.content.half_extents();
        self.transform.bounds(hw, hh)
    }

    /// Filtered pixels, when filters or grayscale are active.
    #[must_use]
    pub fn rendered(&self) -> Option<&Arc<RgbaBuffer>> {
        self.rendered.as_ref()
    }
}
