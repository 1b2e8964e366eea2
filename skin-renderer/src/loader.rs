//! Texture asset loading.
//!
//! [`AssetLoader`] resolves a texture location to raw bytes. [`FsLoader`]
//! reads `data:` URIs and local files; [`CachedLoader`] wraps any loader
//! with a size-bounded LRU cache keyed by location. [`BaseLayerLoader`]
//! turns a fetched skin texture into the base layer of a surface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use skin_core::{Channel, SurfaceHandle};
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};
use crate::worker::PixelWorker;

/// Resolves texture locations to bytes.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    /// Fetch the bytes at `location`.
    async fn fetch(&self, location: &str) -> RenderResult<Vec<u8>>;
}

/// Decode a `data:` URI, base64 or percent-encoded.
///
/// # Errors
///
/// Returns [`RenderError::Resource`] for a malformed URI.
pub fn decode_data_uri(uri: &str) -> RenderResult<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| RenderError::Resource("Not a data URI".to_string()))?;
    let (metadata, payload) = rest
        .split_once(',')
        .ok_or_else(|| RenderError::Resource("Invalid data URI: missing comma".to_string()))?;

    if metadata.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| RenderError::Resource(format!("Failed to decode base64: {e}")))
    } else {
        percent_decode(payload)
    }
}

fn percent_decode(input: &str) -> RenderResult<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = input
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| RenderError::Resource("Invalid URL encoding".to_string()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Loads `data:` URIs and local files.
///
/// Relative paths resolve against `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FsLoader {
    root: Option<PathBuf>,
}

impl FsLoader {
    /// Resolve relative paths against the working directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = PathBuf::from(location);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl AssetLoader for FsLoader {
    async fn fetch(&self, location: &str) -> RenderResult<Vec<u8>> {
        if location.starts_with("data:") {
            return decode_data_uri(location);
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            return Err(RenderError::Resource(format!(
                "Remote fetch not available: {location}"
            )));
        }
        let path = self.resolve(location);
        tokio::fs::read(&path)
            .await
            .map_err(|e| RenderError::Resource(format!("{}: {e}", path.display())))
    }
}

/// Limits for [`CachedLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetCacheConfig {
    /// Maximum cached bytes.
    pub max_size_bytes: usize,
    /// Maximum number of entries.
    pub max_entries: usize,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 128 * 1024 * 1024,
            max_entries: 256,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that went to the inner loader.
    pub misses: u64,
    /// Entries evicted.
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheEntry {
    bytes: Arc<Vec<u8>>,
    last_accessed: Instant,
}

#[derive(Debug, Default)]
struct AssetCache {
    entries: HashMap<String, CacheEntry>,
    current_size: usize,
    stats: CacheStats,
}

impl AssetCache {
    fn get(&mut self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = Instant::now();
            self.stats.hits += 1;
            Some(Arc::clone(&entry.bytes))
        } else {
            self.stats.misses += 1;
            None
        }
    }

    fn insert(&mut self, key: String, bytes: Arc<Vec<u8>>, config: AssetCacheConfig) {
        let size = bytes.len();
        if size > config.max_size_bytes {
            return;
        }
        if let Some(old) = self.entries.remove(&key) {
            self.current_size -= old.bytes.len();
        }
        while self.current_size + size > config.max_size_bytes && !self.entries.is_empty() {
            self.evict_lru();
        }
        while self.entries.len() >= config.max_entries && !self.entries.is_empty() {
            self.evict_lru();
        }
        self.current_size += size;
        self.entries.insert(
            key,
            CacheEntry {
                bytes,
                last_accessed: Instant::now(),
            },
        );
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());
        if let Some(entry) = oldest.and_then(|key| self.entries.remove(&key)) {
            self.current_size -= entry.bytes.len();
            self.stats.evictions += 1;
        }
    }
}

/// Wraps a loader with an in-memory LRU cache.
#[derive(Debug)]
pub struct CachedLoader<L> {
    inner: L,
    config: AssetCacheConfig,
    cache: Mutex<AssetCache>,
}

impl<L: AssetLoader> CachedLoader<L> {
    /// Wrap `inner` with default limits.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self::with_config(inner, AssetCacheConfig::default())
    }

    /// Wrap `inner` with custom limits.
    #[must_use]
    pub fn with_config(inner: L, config: AssetCacheConfig) -> Self {
        Self {
            inner,
            config,
            cache: Mutex::new(AssetCache::default()),
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, AssetCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache().stats
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache().entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache().entries.is_empty()
    }

    /// Cached bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.cache().current_size
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        let mut cache = self.cache();
        cache.entries.clear();
        cache.current_size = 0;
    }
}

#[async_trait]
impl<L: AssetLoader> AssetLoader for CachedLoader<L> {
    async fn fetch(&self, location: &str) -> RenderResult<Vec<u8>> {
        if let Some(bytes) = self.cache().get(location) {
            return Ok(bytes.as_ref().clone());
        }
        let bytes = self.inner.fetch(location).await?;
        self.cache()
            .insert(location.to_string(), Arc::new(bytes.clone()), self.config);
        Ok(bytes)
    }
}

/// Loads skin textures into surface base layers.
pub struct BaseLayerLoader {
    loader: Arc<dyn AssetLoader>,
    worker: Arc<PixelWorker>,
}

impl std::fmt::Debug for BaseLayerLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseLayerLoader").finish_non_exhaustive()
    }
}

impl BaseLayerLoader {
    /// Create a loader fetching through `loader` and converting on `worker`.
    #[must_use]
    pub fn new(loader: Arc<dyn AssetLoader>, worker: Arc<PixelWorker>) -> Self {
        Self { loader, worker }
    }

    /// Replace the base layer of `surface` with the texture at `location`.
    ///
    /// The surface is cleared immediately. If `location` cannot be fetched
    /// or decoded and a `fallback` is given, the fallback is tried once.
    /// Colour surfaces get the texture with alpha stripped; metallic
    /// surfaces get its alpha channel as grayscale.
    ///
    /// Returns `false` when a newer load started in the meantime and this
    /// texture was discarded.
    ///
    /// # Errors
    ///
    /// Returns the fetch or decode error when every attempt fails. The
    /// surface keeps its current layers in that case.
    pub async fn load(
        &self,
        surface: &SurfaceHandle,
        location: &str,
        fallback: Option<&str>,
    ) -> RenderResult<bool> {
        let (ticket, channel, key) = {
            let mut guard = surface.write().unwrap_or_else(PoisonError::into_inner);
            (guard.begin_base_load(), guard.channel(), guard.key().clone())
        };

        let texture = match self.fetch_texture(location).await {
            Ok(texture) => texture,
            Err(e) => match fallback {
                Some(fallback) if fallback != location => {
                    warn!(surface = %key, location, fallback, "Texture failed to load, trying default: {}", e);
                    self.fetch_texture(fallback).await?
                }
                _ => return Err(e),
            },
        };

        let texture = match channel {
            Channel::Color => self.worker.strip_alpha(texture).await?,
            Channel::Metallic => self.worker.alpha_to_grayscale(texture).await?,
        };

        let applied = surface
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .finish_base_load(ticket, texture)?;
        debug!(surface = %key, location, applied, "Base layer load finished");
        Ok(applied)
    }

    async fn fetch_texture(&self, location: &str) -> RenderResult<skin_core::RgbaBuffer> {
        let bytes = self.loader.fetch(location).await?;
        self.worker.decode_png(bytes).await
    }
}
