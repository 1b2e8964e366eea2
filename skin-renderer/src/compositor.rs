//! Live texture compositing.
//!
//! The compositor rasterizes surfaces and derives the textures shown on the
//! 3D model: colour surfaces become opaque base-colour textures, metallic
//! surfaces become packed metallic-roughness textures. Results are stored
//! as PNG bytes per material, channel and frame and broadcast to
//! subscribers.
//!
//! Recomposition is asynchronous and may overlap. A per-surface generation
//! counter makes the newest call win: every call takes a fresh generation
//! before it starts, and its result is committed only if no newer call has
//! started since. Superseded results are dropped silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use skin_core::{Channel, LayerId, RgbaBuffer, SurfaceHandle, SurfaceKey, SurfaceRegistry};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};
use crate::raster::rasterize_texture;
use crate::worker::PixelWorker;

/// Capacity of the texture update channel.
const UPDATE_CAPACITY: usize = 64;

/// Address of a live texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveTextureKey {
    /// Material name.
    pub material: String,
    /// Channel.
    pub channel: Channel,
    /// Animation frame.
    pub frame: usize,
}

impl From<&SurfaceKey> for LiveTextureKey {
    fn from(key: &SurfaceKey) -> Self {
        Self {
            material: key.material.clone(),
            channel: key.channel,
            frame: key.frame,
        }
    }
}

/// A newly committed live texture.
#[derive(Debug, Clone)]
pub struct TextureUpdate {
    /// Which texture changed.
    pub key: LiveTextureKey,
    /// PNG bytes.
    pub png: Arc<Vec<u8>>,
}

/// Per-key generation counters for last-call-wins commits.
#[derive(Debug, Default)]
pub struct GenerationGuard {
    generations: Mutex<HashMap<SurfaceKey, u64>>,
}

impl GenerationGuard {
    /// Start a new call for `key` and return its generation.
    pub fn next(&self, key: &SurfaceKey) -> u64 {
        let mut generations = self.lock();
        let generation = generations.entry(key.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Whether `generation` is still the newest call for `key`.
    #[must_use]
    pub fn is_current(&self, key: &SurfaceKey, generation: u64) -> bool {
        self.lock().get(key) == Some(&generation)
    }

    /// Run `commit` only if `generation` is still current, holding the
    /// guard so no newer call can start in between. Returns whether it ran.
    pub fn commit_if_current(&self, key: &SurfaceKey, generation: u64, commit: impl FnOnce()) -> bool {
        let generations = self.lock();
        if generations.get(key) != Some(&generation) {
            return false;
        }
        commit();
        true
    }

    /// Forget a key.
    pub fn remove(&self, key: &SurfaceKey) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SurfaceKey, u64>> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared with listener tasks.
#[derive(Debug)]
struct Shared {
    worker: Arc<PixelWorker>,
    live: RwLock<HashMap<LiveTextureKey, Arc<Vec<u8>>>>,
    guard: GenerationGuard,
    updates: broadcast::Sender<TextureUpdate>,
}

impl Shared {
    async fn recompose(&self, surface: &SurfaceHandle) -> RenderResult<bool> {
        // The generation is taken under the surface lock so a newer
        // generation always carries a newer raster.
        let (key, generation, raster) = {
            let surface = surface.read().unwrap_or_else(PoisonError::into_inner);
            let key = surface.key().clone();
            let generation = self.guard.next(&key);
            (key, generation, rasterize_texture(&surface))
        };

        let packed = match key.channel {
            Channel::Color => self.worker.strip_alpha(raster).await?,
            Channel::Metallic => self.worker.grayscale_to_metallic_roughness(raster).await?,
        };
        let png = Arc::new(self.worker.encode_png(packed).await?);

        let live_key = LiveTextureKey::from(&key);
        let committed = self.guard.commit_if_current(&key, generation, || {
            self.live
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(live_key.clone(), Arc::clone(&png));
        });
        if committed {
            debug!(surface = %key, generation, bytes = png.len(), "Live texture committed");
            // No subscribers is fine.
            let _ = self.updates.send(TextureUpdate { key: live_key, png });
        } else {
            debug!(surface = %key, generation, "Discarding superseded recomposition");
        }
        Ok(committed)
    }
}

/// Derives live textures from surfaces.
#[derive(Debug)]
pub struct Compositor {
    shared: Arc<Shared>,
    listeners: Mutex<HashMap<SurfaceKey, JoinHandle<()>>>,
}

impl Compositor {
    /// Create a compositor that runs pixel work on `worker`.
    #[must_use]
    pub fn new(worker: Arc<PixelWorker>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                worker,
                live: RwLock::new(HashMap::new()),
                guard: GenerationGuard::default(),
                updates,
            }),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// The pixel worker.
    #[must_use]
    pub fn worker(&self) -> &Arc<PixelWorker> {
        &self.shared.worker
    }

    /// Subscribe to committed live textures.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TextureUpdate> {
        self.shared.updates.subscribe()
    }

    /// Most recent live texture as PNG bytes.
    #[must_use]
    pub fn get_live_texture(&self, material: &str, channel: Channel, frame: usize) -> Option<Arc<Vec<u8>>> {
        let key = LiveTextureKey {
            material: material.to_string(),
            channel,
            frame,
        };
        self.shared
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Rebuild the live texture of one surface. Returns whether the result
    /// was committed.
    ///
    /// # Errors
    ///
    /// Returns a worker error if the pixel work fails.
    pub async fn recompose(&self, surface: &SurfaceHandle) -> RenderResult<bool> {
        self.shared.recompose(surface).await
    }

    /// Recompose `surface` whenever its pixels change.
    ///
    /// Must be called inside a tokio runtime. Events that arrive while a
    /// recomposition is running are coalesced into one follow-up.
    pub fn watch(&self, surface: &SurfaceHandle) {
        let (key, mut events) = {
            let guard = surface.read().unwrap_or_else(PoisonError::into_inner);
            (guard.key().clone(), guard.on_change())
        };
        let weak: Weak<_> = Arc::downgrade(surface);
        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let listener = tokio::spawn(async move {
            loop {
                let dirty = match events.recv().await {
                    Ok(event) => event.affects_pixels(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(surface = %task_key, skipped, "Compositor listener lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                let mut dirty = dirty;
                loop {
                    match events.try_recv() {
                        Ok(event) => dirty |= event.affects_pixels(),
                        Err(TryRecvError::Lagged(_)) => dirty = true,
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
                if !dirty {
                    continue;
                }
                let Some(surface) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = shared.recompose(&surface).await {
                    warn!(surface = %task_key, "Recomposition failed: {}", e);
                }
            }
        });

        let previous = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), listener);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(surface = %key, "Compositor watching surface");
    }

    /// Stop watching a surface and drop its live texture.
    pub fn unwatch(&self, key: &SurfaceKey) {
        let listener = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(listener) = listener {
            listener.abort();
        }
        self.shared.guard.remove(key);
        self.shared
            .live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&LiveTextureKey::from(key));
    }

    /// Stop watching every surface.
    pub fn unwatch_all(&self) {
        let keys: Vec<SurfaceKey> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for key in keys {
            self.unwatch(&key);
        }
    }

    /// Number of watched surfaces.
    #[must_use]
    pub fn watched(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Rasterize the colour surface for `color_key` and add it as a new
    /// layer on the matching metallic surface, where it is shown in
    /// grayscale.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] if either surface is not
    /// registered, or the core error if the raster is empty.
    pub fn copy_to_metallic(&self, registry: &SurfaceRegistry, color_key: &SurfaceKey) -> RenderResult<LayerId> {
        let color_key = color_key.with_channel(Channel::Color);
        let metallic_key = color_key.with_channel(Channel::Metallic);
        let color = registry
            .get(&color_key)
            .ok_or_else(|| RenderError::MissingSurface(color_key.to_string()))?;
        let metallic = registry
            .get(&metallic_key)
            .ok_or_else(|| RenderError::MissingSurface(metallic_key.to_string()))?;

        let raster = {
            let surface = color.read().unwrap_or_else(PoisonError::into_inner);
            rasterize_texture(&surface)
        };
        let id = metallic
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_image(raster)?;
        debug!(from = %color_key, to = %metallic_key, layer = %id, "Copied colour to metallic");
        Ok(id)
    }

    /// Composite the final exported image of one material frame.
    ///
    /// Without a metallic surface the colour raster is returned unchanged.
    /// Otherwise alpha is taken from the metallic raster.
    ///
    /// # Errors
    ///
    /// Returns a worker error, or the core error for mismatched sizes.
    pub async fn composite_final(
        &self,
        color: &SurfaceHandle,
        metallic: Option<&SurfaceHandle>,
    ) -> RenderResult<RgbaBuffer> {
        let color_raster = {
            let surface = color.read().unwrap_or_else(PoisonError::into_inner);
            rasterize_texture(&surface)
        };
        let Some(metallic) = metallic else {
            return Ok(color_raster);
        };
        let metallic_raster = {
            let surface = metallic.read().unwrap_or_else(PoisonError::into_inner);
            rasterize_texture(&surface)
        };
        self.shared
            .worker
            .combine_color_and_alpha(color_raster, metallic_raster)
            .await
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        for (_, listener) in self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            listener.abort();
        }
    }
}
