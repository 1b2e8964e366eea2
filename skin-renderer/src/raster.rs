//! Software rasterization of a surface's layer stack.
//!
//! Layers are drawn bottom to top with source-over blending. Each output
//! pixel centre is mapped back into layer space through the inverse
//! transform and sampled nearest-neighbour, so rotation and non-uniform
//! scale need no intermediate buffers.

use skin_core::{LayerContent, LayerObject, Region, RgbaBuffer, Surface};

/// Render the visible layers of `surface` inside `region`.
///
/// The output is `region.width × region.height`; pixels outside every layer
/// stay fully transparent.
#[must_use]
pub fn rasterize(surface: &Surface, region: Region) -> RgbaBuffer {
    let mut out = RgbaBuffer::transparent(region.width, region.height);
    for layer in surface.layers().iter().filter(|l| l.visible) {
        match &layer.content {
            LayerContent::Image { width, height, .. } => {
                let Some(pixels) = surface.layer_pixels(layer) else {
                    continue;
                };
                // Pool images keep their natural size; skip anything inconsistent.
                if pixels.width != *width || pixels.height != *height {
                    continue;
                }
                draw_image(&mut out, region, layer, &pixels);
            }
            LayerContent::Path {
                points,
                width,
                gray,
            } => draw_path(&mut out, region, layer, points, *width, *gray),
        }
    }
    out
}

/// Render the texture area of `surface`, excluding padding.
#[must_use]
pub fn rasterize_texture(surface: &Surface) -> RgbaBuffer {
    rasterize(surface, surface.texture_region())
}

/// Output pixel rows and columns covered by a layer's bounds.
fn covered(region: Region, layer: &LayerObject) -> Option<(u32, u32, u32, u32)> {
    let (min_x, min_y, max_x, max_y) = layer.bounds();
    let left = (min_x - region.x as f32).floor().max(0.0);
    let top = (min_y - region.y as f32).floor().max(0.0);
    let right = (max_x - region.x as f32).ceil().min(region.width as f32);
    let bottom = (max_y - region.y as f32).ceil().min(region.height as f32);
    if right <= left || bottom <= top {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((left as u32, top as u32, right as u32, bottom as u32))
}

fn draw_image(out: &mut RgbaBuffer, region: Region, layer: &LayerObject, source: &RgbaBuffer) {
    let Some((x0, y0, x1, y1)) = covered(region, layer) else {
        return;
    };
    let half_w = source.width as f32 / 2.0;
    let half_h = source.height as f32 / 2.0;
    for py in y0..y1 {
        for px in x0..x1 {
            let sx = (region.x + px) as f32 + 0.5;
            let sy = (region.y + py) as f32 + 0.5;
            let Some((lx, ly)) = layer.transform.to_local(sx, sy) else {
                return;
            };
            let u = (lx + half_w).floor();
            let v = (ly + half_h).floor();
            if u < 0.0 || v < 0.0 || u >= source.width as f32 || v >= source.height as f32 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            if let Some(src) = source.pixel(u as u32, v as u32) {
                blend_over(out, px, py, src);
            }
        }
    }
}

fn draw_path(
    out: &mut RgbaBuffer,
    region: Region,
    layer: &LayerObject,
    points: &[[f32; 2]],
    width: f32,
    gray: u8,
) {
    let Some((x0, y0, x1, y1)) = covered(region, layer) else {
        return;
    };
    let radius = width / 2.0;
    let colour = [gray, gray, gray, 255];
    for py in y0..y1 {
        for px in x0..x1 {
            let sx = (region.x + px) as f32 + 0.5;
            let sy = (region.y + py) as f32 + 0.5;
            let Some((lx, ly)) = layer.transform.to_local(sx, sy) else {
                return;
            };
            if distance_to_polyline(lx, ly, points) <= radius {
                blend_over(out, px, py, colour);
            }
        }
    }
}

fn distance_to_polyline(px: f32, py: f32, points: &[[f32; 2]]) -> f32 {
    match points {
        [] => f32::MAX,
        [only] => ((px - only[0]).powi(2) + (py - only[1]).powi(2)).sqrt(),
        _ => points
            .windows(2)
            .map(|w| distance_to_segment(px, py, w[0], w[1]))
            .fold(f32::MAX, f32::min),
    }
}

fn distance_to_segment(px: f32, py: f32, a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len_sq = dx * dx + dy * dy;
    if len_sq < 0.001 {
        return ((px - a[0]).powi(2) + (py - a[1]).powi(2)).sqrt();
    }
    let t = (((px - a[0]) * dx + (py - a[1]) * dy) / len_sq).clamp(0.0, 1.0);
    let cx = a[0] + t * dx;
    let cy = a[1] + t * dy;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Source-over blend of one straight-alpha pixel.
fn blend_over(out: &mut RgbaBuffer, x: u32, y: u32, src: [u8; 4]) {
    if src[3] == 0 {
        return;
    }
    if src[3] == 255 {
        out.set_pixel(x, y, src);
        return;
    }
    let Some(dst) = out.pixel(x, y) else {
        return;
    };
    let sa = f32::from(src[3]) / 255.0;
    let da = f32::from(dst[3]) / 255.0;
    let oa = sa + da * (1.0 - sa);
    let mut blended = [0u8; 4];
    for c in 0..3 {
        let value = (f32::from(src[c]) * sa + f32::from(dst[c]) * da * (1.0 - sa)) / oa;
        blended[c] = to_u8(value);
    }
    blended[3] = to_u8(oa * 255.0);
    out.set_pixel(x, y, blended);
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use skin_core::{BrushSettings, Channel, DrawMode, SurfaceKey, SurfaceOptions, Transform};

    fn surface(channel: Channel) -> Surface {
        Surface::new(
            SurfaceKey::new("base", channel, 0, 1),
            16,
            16,
            SurfaceOptions {
                padding: 8,
                duplicate_offset: 4.0,
            },
        )
    }

    #[test]
    fn test_empty_surface_is_transparent() {
        let s = surface(Channel::Color);
        let out = rasterize_texture(&s);
        assert_eq!((out.width, out.height), (16, 16));
        assert!(out.alpha_values().all(|a| a == 0));
    }

    #[test]
    fn test_base_layer_fills_texture_region() {
        let mut s = surface(Channel::Color);
        let ticket = s.begin_base_load();
        s.finish_base_load(ticket, RgbaBuffer::filled(4, 4, [10, 20, 30, 255]))
            .expect("base");
        let out = rasterize_texture(&s);
        assert_eq!(out.pixel(0, 0), Some([10, 20, 30, 255]));
        assert_eq!(out.pixel(15, 15), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_layers_stack_in_order() {
        let mut s = surface(Channel::Color);
        let ticket = s.begin_base_load();
        s.finish_base_load(ticket, RgbaBuffer::filled(16, 16, [0, 0, 255, 255]))
            .expect("base");
        s.add_image(RgbaBuffer::filled(4, 4, [255, 0, 0, 255]))
            .expect("add");
        let out = rasterize_texture(&s);
        // 4×4 layer centred in a 16×16 texture covers 6..10.
        assert_eq!(out.pixel(8, 8), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(5, 5), Some([0, 0, 255, 255]));
        assert_eq!(out.pixel(6, 6), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(10, 10), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_translucent_layer_blends() {
        let mut s = surface(Channel::Color);
        let ticket = s.begin_base_load();
        s.finish_base_load(ticket, RgbaBuffer::filled(16, 16, [0, 0, 0, 255]))
            .expect("base");
        s.add_image(RgbaBuffer::filled(16, 16, [255, 255, 255, 128]))
            .expect("add");
        let out = rasterize_texture(&s);
        let [r, g, b, a] = out.pixel(3, 3).expect("pixel");
        assert_eq!(a, 255);
        assert!(r == g && g == b);
        assert!((127..=129).contains(&r));
    }

    #[test]
    fn test_hidden_layers_skipped() {
        let mut s = surface(Channel::Color);
        let id = s
            .add_image(RgbaBuffer::filled(16, 16, [255, 0, 0, 255]))
            .expect("add");
        assert_eq!(rasterize_texture(&s).pixel(0, 0), Some([255, 0, 0, 255]));

        s.set_visible(id, false).expect("hide");
        assert_eq!(rasterize_texture(&s).pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_rotated_layer_samples_through_inverse() {
        let mut s = surface(Channel::Color);
        let mut img = RgbaBuffer::transparent(4, 2);
        for x in 0..4 {
            img.set_pixel(x, 0, [255, 0, 0, 255]);
            img.set_pixel(x, 1, [255, 0, 0, 255]);
        }
        let id = s.add_image(img).expect("add");
        let t = s.layer(id).expect("layer").transform;
        s.set_transform(id, Transform { angle: 90.0, ..t }).expect("rotate");
        let out = rasterize_texture(&s);
        // A 4×2 bar turned upright spans 2 columns and 4 rows around the centre.
        assert_eq!(out.pixel(7, 6).map(|p| p[3]), Some(255));
        assert_eq!(out.pixel(8, 9).map(|p| p[3]), Some(255));
        assert_eq!(out.pixel(5, 8).map(|p| p[3]), Some(0));
        assert_eq!(out.pixel(10, 8).map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_paint_strokes_draw_in_brush_gray() {
        let mut s = surface(Channel::Metallic);
        assert_eq!(s.mode(), DrawMode::Paint);
        s.set_brush(BrushSettings::new(90, 2.0));
        // Surface coordinates include the 8px padding.
        s.paint_stroke(&[[10.0, 16.5], [22.0, 16.5]]).expect("stroke");
        let out = rasterize_texture(&s);
        assert_eq!(out.pixel(5, 8), Some([90, 90, 90, 255]));
        assert_eq!(out.pixel(5, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_segment_distance() {
        assert!((distance_to_segment(0.0, 1.0, [-1.0, 0.0], [1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((distance_to_segment(3.0, 0.0, [-1.0, 0.0], [1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert!((distance_to_polyline(0.0, 0.0, &[[3.0, 4.0]]) - 5.0).abs() < 1e-6);
    }
}
