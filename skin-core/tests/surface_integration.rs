//! Surface Integration Tests
//!
//! Exercises the surface registry and layer stack through the public API:
//! - Z-order floor above the base layer
//! - Rejection of empty images
//! - Superseded base loads
//! - Filters surviving snapshot restore
//! - Image release on removal

use skin_core::{
    Channel, FilterKind, FilterTarget, RgbaBuffer, SkinError, SurfaceKey, SurfaceOptions,
    SurfaceRegistry,
};

fn registry() -> SurfaceRegistry {
    SurfaceRegistry::new(SurfaceOptions::default())
}

fn color_key(material: &str) -> SurfaceKey {
    SurfaceKey::new(material, Channel::Color, 0, 1)
}

fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    RgbaBuffer::filled(width, height, rgba)
        .encode_png()
        .expect("encode")
}

fn load_base(registry: &SurfaceRegistry, key: &SurfaceKey) {
    registry
        .update(key, |s| {
            let ticket = s.begin_base_load();
            s.finish_base_load(ticket, RgbaBuffer::filled(32, 32, [40, 40, 40, 255]))
        })
        .expect("surface")
        .expect("base");
}

// ============================================================================
// Z-order
// ============================================================================

#[test]
fn test_no_layer_goes_below_base() {
    let registry = registry();
    let key = color_key("base");
    let _ = registry.get_or_create(&key, 32, 32);
    load_base(&registry, &key);

    let ids: Vec<_> = (0..3)
        .map(|i| {
            registry
                .update(&key, |s| s.add_layer(&png(4, 4, [i, 0, 0, 255])))
                .expect("surface")
                .expect("add")
        })
        .collect();

    let top = ids[2];
    let moves = registry
        .update(&key, |s| {
            s.select(&[top]).expect("select");
            let mut moves = 0;
            while s.send_selection_backward() {
                moves += 1;
            }
            moves
        })
        .expect("surface");
    assert_eq!(moves, 2);

    let handle = registry.require(&key).expect("surface");
    let surface = handle.read().expect("lock");
    assert_eq!(surface.index_of(top), Some(1));
    assert!(surface.is_base(surface.layers()[0].id));
}

// ============================================================================
// Empty images
// ============================================================================

#[test]
fn test_zero_dimension_images_leave_stack_unchanged() {
    let registry = registry();
    let key = color_key("base");
    let _ = registry.get_or_create(&key, 32, 32);
    load_base(&registry, &key);

    let result = registry
        .update(&key, |s| s.add_image(RgbaBuffer::transparent(0, 0)))
        .expect("surface");
    assert!(matches!(result, Err(SkinError::ZeroDimensionImage { .. })));

    let result = registry
        .update(&key, |s| s.add_layer(b"not a png"))
        .expect("surface");
    assert!(matches!(result, Err(SkinError::Decode(_))));

    let count = registry.update(&key, |s| s.layer_count()).expect("surface");
    assert_eq!(count, 1);
}

#[test]
fn test_pending_base_load_leaves_surface_untouched() {
    let registry = registry();
    let key = color_key("base");
    let _ = registry.get_or_create(&key, 32, 32);
    load_base(&registry, &key);
    registry
        .update(&key, |s| s.add_image(RgbaBuffer::filled(4, 4, [9, 9, 9, 255])))
        .expect("surface")
        .expect("add");

    let (count, has_base) = registry
        .update(&key, |s| {
            let _ticket = s.begin_base_load();
            (s.layer_count(), s.base_layer().is_some())
        })
        .expect("surface");
    assert_eq!(count, 2);
    assert!(has_base);
}

// ============================================================================
// Base loads
// ============================================================================

#[test]
fn test_only_latest_base_load_applies() {
    let registry = registry();
    let key = color_key("disc");
    let handle = registry.get_or_create(&key, 16, 16);

    let (first, second) = {
        let mut s = handle.write().expect("lock");
        (s.begin_base_load(), s.begin_base_load())
    };

    let mut s = handle.write().expect("lock");
    assert!(s
        .finish_base_load(second, RgbaBuffer::filled(16, 16, [0, 200, 0, 255]))
        .expect("second"));
    assert!(!s
        .finish_base_load(first, RgbaBuffer::filled(16, 16, [200, 0, 0, 255]))
        .expect("first"));

    let base = s.base_layer().expect("base");
    let pixels = s.layer_pixels(base).expect("pixels");
    assert_eq!(pixels.pixel(8, 8), Some([0, 200, 0, 255]));
    assert_eq!(s.layer_count(), 1);
}

#[test]
fn test_base_load_clears_user_layers() {
    let registry = registry();
    let key = color_key("base");
    let _ = registry.get_or_create(&key, 32, 32);
    load_base(&registry, &key);
    registry
        .update(&key, |s| s.add_image(RgbaBuffer::filled(4, 4, [9, 9, 9, 255])))
        .expect("surface")
        .expect("add");

    load_base(&registry, &key);
    let count = registry.update(&key, |s| s.layer_count()).expect("surface");
    assert_eq!(count, 1);
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn test_filters_survive_restore() {
    let registry = registry();
    let key = color_key("base");
    let _ = registry.get_or_create(&key, 32, 32);
    load_base(&registry, &key);

    let snapshot = registry
        .update(&key, |s| {
            s.add_image(RgbaBuffer::filled(4, 4, [100, 100, 100, 255]))
                .expect("add");
            s.set_filter(FilterTarget::Selected, FilterKind::Brightness, 0.25);
            s.snapshot().expect("snapshot")
        })
        .expect("surface");

    registry
        .update(&key, |s| {
            s.set_filter(FilterTarget::All, FilterKind::Brightness, 0.0);
            s.restore(&snapshot).expect("restore");
        })
        .expect("surface");

    let handle = registry.require(&key).expect("surface");
    let surface = handle.read().expect("lock");
    let top = surface.layers().last().expect("layer");
    assert!((top.filters.brightness - 0.25).abs() < f32::EPSILON);
    assert!(top.rendered().is_some());
    let base = surface.base_layer().expect("base");
    assert!(base.filters.is_identity());
}

#[test]
fn test_missing_surface_is_an_error() {
    let registry = registry();
    let key = SurfaceKey::new("nowhere", Channel::Metallic, 0, 1);
    assert!(matches!(
        registry.update(&key, |s| s.layer_count()),
        Err(SkinError::SurfaceNotFound(_))
    ));
}

#[test]
fn test_removed_images_are_released_but_restorable() {
    let registry = registry();
    let key = color_key("base");
    let _ = registry.get_or_create(&key, 32, 32);
    load_base(&registry, &key);

    let (snapshot, image) = registry
        .update(&key, |s| {
            let id = s.add_image(RgbaBuffer::filled(4, 4, [7, 7, 7, 255])).expect("add");
            let image = s.layer(id).and_then(|l| l.content.image_id()).expect("image");
            (s.snapshot().expect("snapshot"), image)
        })
        .expect("surface");

    let released = registry
        .update(&key, |s| {
            assert_eq!(s.remove_selection(), 1);
            s.image(image).is_none()
        })
        .expect("surface");
    assert!(released);

    let handle = registry.require(&key).expect("surface");
    let mut surface = handle.write().expect("lock");
    surface.restore(&snapshot).expect("restore");
    assert_eq!(surface.layer_count(), 2);
    let top = surface.layers().last().expect("layer");
    let pixels = surface.layer_pixels(top).expect("pixels");
    assert_eq!(pixels.pixel(0, 0), Some([7, 7, 7, 255]));
}
