//! Shared surface registry.
//!
//! Provides a thread-safe [`SurfaceRegistry`] mapping [`SurfaceKey`]s to
//! surface handles. The editor controller registers and unregisters
//! surfaces; compositor, history and export look them up.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::{SkinError, SkinResult};
use crate::key::SurfaceKey;
use crate::surface::{Surface, SurfaceHandle, SurfaceOptions};

/// Thread-safe map of live surfaces.
///
/// # Example
///
/// ```
/// use skin_core::{Channel, SurfaceKey, SurfaceRegistry};
///
/// let registry = SurfaceRegistry::default();
/// let key = SurfaceKey::new("base", Channel::Color, 0, 1);
/// let surface = registry.get_or_create(&key, 512, 512);
/// assert!(registry.get(&key).is_some());
/// assert_eq!(surface.read().unwrap().texture_size(), (512, 512));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SurfaceRegistry {
    surfaces: Arc<RwLock<HashMap<SurfaceKey, SurfaceHandle>>>,
    options: SurfaceOptions,
}

impl SurfaceRegistry {
    /// Create an empty registry whose surfaces use `options`.
    #[must_use]
    pub fn new(options: SurfaceOptions) -> Self {
        Self {
            surfaces: Arc::new(RwLock::new(HashMap::new())),
            options,
        }
    }

    /// Get the surface for `key`, creating it with the given texture size if
    /// it is not registered yet.
    #[must_use]
    pub fn get_or_create(&self, key: &SurfaceKey, texture_width: u32, texture_height: u32) -> SurfaceHandle {
        let mut surfaces = self
            .surfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let options = self.options;
        Arc::clone(surfaces.entry(key.clone()).or_insert_with(|| {
            debug!(surface = %key, texture_width, texture_height, "Surface registered");
            Surface::new(key.clone(), texture_width, texture_height, options).into_handle()
        }))
    }

    /// Register an existing surface under its own key, replacing any
    /// previous registration.
    pub fn register(&self, surface: SurfaceHandle) -> Option<SurfaceHandle> {
        let key = surface
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .key()
            .clone();
        debug!(surface = %key, "Surface registered");
        self.surfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, surface)
    }

    /// Remove a surface. Returns the handle if it was registered.
    pub fn unregister(&self, key: &SurfaceKey) -> Option<SurfaceHandle> {
        let removed = self
            .surfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            debug!(surface = %key, "Surface unregistered");
        }
        removed
    }

    /// Look up a surface.
    #[must_use]
    pub fn get(&self, key: &SurfaceKey) -> Option<SurfaceHandle> {
        self.surfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Look up a surface that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::SurfaceNotFound`] if `key` is not registered.
    pub fn require(&self, key: &SurfaceKey) -> SkinResult<SurfaceHandle> {
        self.get(key)
            .ok_or_else(|| SkinError::SurfaceNotFound(key.to_string()))
    }

    /// Run `f` against a registered surface under its write lock.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::SurfaceNotFound`] if `key` is not registered.
    pub fn update<F, R>(&self, key: &SurfaceKey, f: F) -> SkinResult<R>
    where
        F: FnOnce(&mut Surface) -> R,
    {
        let surface = self.require(key)?;
        let mut guard = surface.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut guard))
    }

    /// All registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<SurfaceKey> {
        self.surfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of registered surfaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.surfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no surfaces are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister every surface.
    pub fn clear(&self) {
        self.surfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Options applied to newly created surfaces.
    #[must_use]
    pub fn options(&self) -> SurfaceOptions {
        self.options
    }
}
