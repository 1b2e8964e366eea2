//! Per-pixel channel transforms on RGBA buffers.
//!
//! The four channel transforms operate on 8-bit values with no clamping
//! except the explicit alpha floor in [`combine_color_and_alpha`]. The layer
//! filters at the bottom of this module saturate to `0..=255` like a canvas
//! image-data write does.

use serde::{Deserialize, Serialize};

use crate::buffer::RgbaBuffer;
use crate::error::{SkinError, SkinResult};

/// Minimum alpha written by [`combine_color_and_alpha`].
pub const ALPHA_FLOOR: u8 = 1;

/// Replace RGB with the pixel's own alpha and make it opaque.
#[must_use]
pub fn alpha_to_grayscale(mut buffer: RgbaBuffer) -> RgbaBuffer {
    for px in buffer.data.chunks_exact_mut(4) {
        let alpha = px[3];
        px[0] = alpha;
        px[1] = alpha;
        px[2] = alpha;
        px[3] = 255;
    }
    buffer
}

/// Pack a grayscale painting into a metallic-roughness texture.
///
/// Red is unused and zeroed. Green carries roughness, which falls as the
/// painted (metallic) value rises. Blue and alpha pass through.
#[must_use]
pub fn grayscale_to_metallic_roughness(mut buffer: RgbaBuffer) -> RgbaBuffer {
    for px in buffer.data.chunks_exact_mut(4) {
        let gray = px[0];
        px[0] = 0;
        px[1] = 255 - gray;
    }
    buffer
}

/// Keep the colour buffer's RGB and take alpha from the metallic buffer's red channel.
///
/// # Errors
///
/// Returns [`SkinError::BufferLength`] if the two buffers differ in size.
pub fn combine_color_and_alpha(
    mut color: RgbaBuffer,
    metallic: &RgbaBuffer,
) -> SkinResult<RgbaBuffer> {
    if color.data.len() != metallic.data.len() {
        return Err(SkinError::BufferLength {
            expected: color.data.len(),
            actual: metallic.data.len(),
        });
    }
    for (px, gray) in color
        .data
        .chunks_exact_mut(4)
        .zip(metallic.data.chunks_exact(4))
    {
        px[3] = gray[0].max(ALPHA_FLOOR);
    }
    Ok(color)
}

/// Force every pixel opaque.
#[must_use]
pub fn strip_alpha(mut buffer: RgbaBuffer) -> RgbaBuffer {
    for px in buffer.data.chunks_exact_mut(4) {
        px[3] = 255;
    }
    buffer
}

/// Decode PNG bytes.
///
/// # Errors
///
/// Returns [`SkinError::Decode`] for a malformed container.
pub fn decode_png(bytes: &[u8]) -> SkinResult<RgbaBuffer> {
    RgbaBuffer::decode_png(bytes)
}

/// Encode a buffer as PNG.
///
/// # Errors
///
/// Returns [`SkinError::BufferLength`] or [`SkinError::Encode`].
pub fn encode_png(buffer: &RgbaBuffer) -> SkinResult<Vec<u8>> {
    buffer.encode_png()
}

// ============================================================================
// Layer filters
// ============================================================================

/// Adjustable filter values for one layer.
///
/// Hue is in half-turns (`-1.0..=1.0` maps to -180°..180°); the other values
/// are offsets in `-1.0..=1.0` where `0.0` is the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    /// Hue rotation in half-turns.
    pub hue_rotation: f32,
    /// Saturation offset.
    pub saturation: f32,
    /// Brightness offset.
    pub brightness: f32,
    /// Contrast offset.
    pub contrast: f32,
}

/// One kind of adjustable filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    /// Hue rotation.
    HueRotation,
    /// Saturation.
    Saturation,
    /// Brightness.
    Brightness,
    /// Contrast.
    Contrast,
}

impl FilterSet {
    /// Whether every value is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Read one filter value.
    #[must_use]
    pub fn get(&self, kind: FilterKind) -> f32 {
        match kind {
            FilterKind::HueRotation => self.hue_rotation,
            FilterKind::Saturation => self.saturation,
            FilterKind::Brightness => self.brightness,
            FilterKind::Contrast => self.contrast,
        }
    }

    /// Set one filter value, clamped to `-1.0..=1.0`.
    pub fn set(&mut self, kind: FilterKind, value: f32) {
        let value = value.clamp(-1.0, 1.0);
        match kind {
            FilterKind::HueRotation => self.hue_rotation = value,
            FilterKind::Saturation => self.saturation = value,
            FilterKind::Brightness => self.brightness = value,
            FilterKind::Contrast => self.contrast = value,
        }
    }
}

/// Apply a layer's full filter stack to its source pixels.
///
/// Always starts from `source`, so repeated application never compounds.
/// Grayscale runs last so metallic layers end up single-channel no matter
/// what colour adjustments precede it.
#[must_use]
pub fn apply_filters(source: &RgbaBuffer, filters: &FilterSet, grayscale: bool) -> RgbaBuffer {
    let mut out = source.clone();
    if filters.hue_rotation != 0.0 {
        hue_rotate(&mut out, filters.hue_rotation);
    }
    if filters.saturation != 0.0 {
        saturate(&mut out, filters.saturation);
    }
    if filters.brightness != 0.0 {
        brighten(&mut out, filters.brightness);
    }
    if filters.contrast != 0.0 {
        apply_contrast(&mut out, filters.contrast);
    }
    if grayscale {
        to_grayscale(&mut out);
    }
    out
}

/// Average the colour channels.
pub fn to_grayscale(buffer: &mut RgbaBuffer) {
    for px in buffer.data.chunks_exact_mut(4) {
        let sum = u16::from(px[0]) + u16::from(px[1]) + u16::from(px[2]);
        #[allow(clippy::cast_possible_truncation)]
        let avg = (sum / 3) as u8;
        px[0] = avg;
        px[1] = avg;
        px[2] = avg;
    }
}

fn hue_rotate(buffer: &mut RgbaBuffer, rotation: f32) {
    let angle = rotation * std::f32::consts::PI;
    let (sin, cos) = angle.sin_cos();
    let third: f32 = 1.0 / 3.0;
    let third_sqrt_sin = third.sqrt() * sin;
    let one_minus_cos = 1.0 - cos;
    let m = [
        [
            cos + one_minus_cos / 3.0,
            third * one_minus_cos - third_sqrt_sin,
            third * one_minus_cos + third_sqrt_sin,
        ],
        [
            third * one_minus_cos + third_sqrt_sin,
            cos + third * one_minus_cos,
            third * one_minus_cos - third_sqrt_sin,
        ],
        [
            third * one_minus_cos - third_sqrt_sin,
            third * one_minus_cos + third_sqrt_sin,
            cos + third * one_minus_cos,
        ],
    ];
    for px in buffer.data.chunks_exact_mut(4) {
        let (r, g, b) = (f32::from(px[0]), f32::from(px[1]), f32::from(px[2]));
        px[0] = clamp_channel(m[0][0] * r + m[0][1] * g + m[0][2] * b);
        px[1] = clamp_channel(m[1][0] * r + m[1][1] * g + m[1][2] * b);
        px[2] = clamp_channel(m[2][0] * r + m[2][1] * g + m[2][2] * b);
    }
}

fn saturate(buffer: &mut RgbaBuffer, saturation: f32) {
    let adjust = -saturation;
    for px in buffer.data.chunks_exact_mut(4) {
        let max = f32::from(px[0].max(px[1]).max(px[2]));
        for channel in &mut px[0..3] {
            let value = f32::from(*channel);
            *channel = clamp_channel(value + (max - value) * adjust);
        }
    }
}

fn brighten(buffer: &mut RgbaBuffer, brightness: f32) {
    let offset = brightness * 255.0;
    for px in buffer.data.chunks_exact_mut(4) {
        for channel in &mut px[0..3] {
            *channel = clamp_channel(f32::from(*channel) + offset);
        }
    }
}

fn apply_contrast(buffer: &mut RgbaBuffer, contrast: f32) {
    let c = contrast * 255.0;
    let factor = 259.0 * (c + 255.0) / (255.0 * (259.0 - c));
    for px in buffer.data.chunks_exact_mut(4) {
        for channel in &mut px[0..3] {
            *channel = clamp_channel(factor * (f32::from(*channel) - 128.0) + 128.0);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
