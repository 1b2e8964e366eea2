//! Editor controller.
//!
//! [`SkinEditor`] owns everything with the lifetime of one mounted model:
//! the surface registry, the pixel worker, the compositor and one history
//! manager per surface. Mounting creates a colour surface per material
//! frame (plus a metallic one when the material has a metallic-roughness
//! texture), starts base texture loads and watches every surface for live
//! texture updates. Unmounting tears all of it down, worker included.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use futures::future::join_all;
use serde::Serialize;
use skin_core::{
    resolve_skin_textures, Channel, Command, EditorConfig, HistoryManager, KeyInput, LayerId,
    MaterialCatalog, MaterialDefinition, ModelType, SkinSelection, SurfaceHandle, SurfaceKey,
    SurfaceRegistry,
};
use tracing::{debug, info, warn};

use crate::compositor::Compositor;
use crate::error::{RenderError, RenderResult};
use crate::export::{ExportAssembler, ExportFormat, ExportOutput, ExportTarget};
use crate::loader::{AssetLoader, BaseLayerLoader};
use crate::worker::PixelWorker;

/// Outcome of loading a skin's base textures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Base layers installed.
    pub applied: usize,
    /// Loads superseded by a newer one.
    pub stale: usize,
    /// Loads that failed, default fallback included.
    pub failed: usize,
}

/// State that exists only while a model is mounted.
struct Session {
    worker: Arc<PixelWorker>,
    compositor: Compositor,
    base_loader: BaseLayerLoader,
    histories: HashMap<SurfaceKey, HistoryManager>,
    selection: SkinSelection,
    size_multiplier: u32,
    export_materials: HashSet<String>,
    active_material: String,
    active_channel: Channel,
    active_frame: usize,
}

/// Drives editing of one model's skin.
pub struct SkinEditor {
    config: EditorConfig,
    catalog: Arc<MaterialCatalog>,
    loader: Arc<dyn AssetLoader>,
    registry: SurfaceRegistry,
    session: Option<Session>,
}

impl std::fmt::Debug for SkinEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkinEditor")
            .field("surfaces", &self.registry.len())
            .field("mounted", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl SkinEditor {
    /// Create an editor with nothing mounted.
    #[must_use]
    pub fn new(config: EditorConfig, catalog: Arc<MaterialCatalog>, loader: Arc<dyn AssetLoader>) -> Self {
        let registry = SurfaceRegistry::new(config.surface_options());
        Self {
            config,
            catalog,
            loader,
            registry,
            session: None,
        }
    }

    /// Editor settings.
    #[must_use]
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Material catalog.
    #[must_use]
    pub fn catalog(&self) -> &MaterialCatalog {
        &self.catalog
    }

    /// Mounted surfaces.
    #[must_use]
    pub fn registry(&self) -> &SurfaceRegistry {
        &self.registry
    }

    /// Whether a model is mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> RenderResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))
    }

    fn session_mut(&mut self) -> RenderResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))
    }

    /// The compositor of the mounted model.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] when nothing is mounted.
    pub fn compositor(&self) -> RenderResult<&Compositor> {
        Ok(&self.session()?.compositor)
    }

    /// Current skin selection.
    #[must_use]
    pub fn selection(&self) -> Option<&SkinSelection> {
        self.session.as_ref().map(|s| &s.selection)
    }

    /// Texture size multiplier of the mounted surfaces.
    #[must_use]
    pub fn size_multiplier(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.size_multiplier)
    }

    /// Materials that are editable and exportable for `model`.
    fn editable_materials<'c>(catalog: &'c MaterialCatalog, model: &str) -> Vec<&'c MaterialDefinition> {
        catalog
            .materials_for(model)
            .filter(|m| !m.hidden && m.is_selectable())
            .collect()
    }

    // ------------------------------------------------------------------
    // Mounting
    // ------------------------------------------------------------------

    /// Mount every surface of `selection`'s model at `size_multiplier` and
    /// load the skin's base textures. Any previous model is unmounted.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerSpawn`] if the pixel worker cannot
    /// start, or the core error for a misnamed animated material or a
    /// texture size that overflows at `size_multiplier`. Failed texture
    /// loads are reported in the summary, not as errors.
    pub async fn mount(&mut self, selection: SkinSelection, size_multiplier: u32) -> RenderResult<LoadSummary> {
        self.unmount();
        let size_multiplier = size_multiplier.max(1);

        let worker = Arc::new(PixelWorker::spawn()?);
        let compositor = Compositor::new(Arc::clone(&worker));
        let base_loader = BaseLayerLoader::new(Arc::clone(&self.loader), Arc::clone(&worker));
        let materials = Self::editable_materials(&self.catalog, &selection.model);
        let histories = match self.mount_surfaces(&materials, size_multiplier, &compositor) {
            Ok(histories) => histories,
            Err(e) => {
                compositor.unwatch_all();
                self.registry.clear();
                return Err(e);
            }
        };

        let active_material = materials.first().map(|m| m.name.clone()).unwrap_or_default();
        let export_materials = materials.iter().map(|m| m.name.clone()).collect();
        info!(
            model = %selection.model,
            skin = %selection.skin,
            surfaces = self.registry.len(),
            size_multiplier,
            "Model mounted"
        );
        self.session = Some(Session {
            worker,
            compositor,
            base_loader,
            histories,
            selection: selection.clone(),
            size_multiplier,
            export_materials,
            active_material,
            active_channel: Channel::Color,
            active_frame: 0,
        });

        self.load_skin(selection).await
    }

    fn mount_surfaces(
        &self,
        materials: &[&MaterialDefinition],
        size_multiplier: u32,
        compositor: &Compositor,
    ) -> RenderResult<HashMap<SurfaceKey, HistoryManager>> {
        let history_config = self.config.history_config();
        let mut histories = HashMap::new();
        for material in materials {
            let [width, height] =
                material.scaled_size_or(self.config.default_texture_size, size_multiplier)?;
            let mut channels = vec![Channel::Color];
            if material.has_metallic() {
                channels.push(Channel::Metallic);
            }
            for frame in 0..material.frames() {
                for channel in &channels {
                    let key = SurfaceKey::new(&material.name, *channel, frame, size_multiplier);
                    let surface = self.registry.get_or_create(&key, width, height);
                    histories.insert(key, HistoryManager::attach(Arc::clone(&surface), history_config)?);
                    compositor.watch(&surface);
                }
            }
        }
        Ok(histories)
    }

    /// Load another skin of the mounted model onto every surface.
    ///
    /// Loads whose surface started a newer load before they resolved are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] when nothing is mounted, or
    /// the core error when texture locations cannot be resolved.
    pub async fn load_skin(&mut self, selection: SkinSelection) -> RenderResult<LoadSummary> {
        let bases = self.config.texture_bases();
        let urls = resolve_skin_textures(&self.catalog, &bases, &selection)?;
        let default_urls = match self.catalog.default_skin(&selection.model) {
            Some(skin) => {
                let default = SkinSelection::default_skin(&selection.model, selection.model_type, skin);
                resolve_skin_textures(&self.catalog, &bases, &default)?
            }
            None => BTreeMap::new(),
        };

        let session = self.session_mut()?;
        session.selection = selection.clone();
        let multiplier = session.size_multiplier;

        let mut jobs = Vec::new();
        for material in Self::editable_materials(&self.catalog, &selection.model) {
            let lookup = match selection.model_type {
                ModelType::Player => "base",
                ModelType::Weapon | ModelType::Vehicle => material.file_name(),
            };
            let frames = urls.get(lookup);
            let defaults = default_urls
                .get(lookup)
                .filter(|_| material.has_default_texture());
            for frame in 0..material.frames() {
                let Some(location) = frames.and_then(|f| f.get(frame)) else {
                    debug!(material = %material.name, frame, "No texture for material");
                    continue;
                };
                let fallback = defaults.and_then(|d| d.get(frame)).cloned();
                for channel in [Channel::Color, Channel::Metallic] {
                    let key = SurfaceKey::new(&material.name, channel, frame, multiplier);
                    if let Some(surface) = self.registry.get(&key) {
                        jobs.push((surface, location.clone(), fallback.clone()));
                    }
                }
            }
        }

        let session = self.session()?;
        let results = join_all(jobs.iter().map(|(surface, location, fallback)| {
            session.base_loader.load(surface, location, fallback.as_deref())
        }))
        .await;

        let mut summary = LoadSummary::default();
        for ((surface, location, _), result) in jobs.iter().zip(results) {
            match result {
                Ok(true) => summary.applied += 1,
                Ok(false) => summary.stale += 1,
                Err(e) => {
                    let key = surface.read().unwrap_or_else(PoisonError::into_inner).key().clone();
                    warn!(surface = %key, location = %location, "Base texture failed to load: {}", e);
                    summary.failed += 1;
                }
            }
        }
        info!(
            skin = %selection.skin,
            applied = summary.applied,
            stale = summary.stale,
            failed = summary.failed,
            "Skin loaded"
        );
        Ok(summary)
    }

    /// Tear down every surface, history and listener, and stop the worker.
    pub fn unmount(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.compositor.unwatch_all();
        drop(session.histories);
        self.registry.clear();
        session.worker.shutdown();
        info!(model = %session.selection.model, "Model unmounted");
    }

    /// Rebuild every live texture now.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] when nothing is mounted, or
    /// the first worker error.
    pub async fn refresh_live_textures(&self) -> RenderResult<()> {
        let session = self.session()?;
        for key in self.registry.keys() {
            if let Some(surface) = self.registry.get(&key) {
                session.compositor.recompose(&surface).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Active surface
    // ------------------------------------------------------------------

    /// Address of the surface being edited.
    #[must_use]
    pub fn active_key(&self) -> Option<SurfaceKey> {
        self.session.as_ref().map(|s| {
            SurfaceKey::new(&s.active_material, s.active_channel, s.active_frame, s.size_multiplier)
        })
    }

    /// The surface being edited.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] if it is not mounted.
    pub fn active_surface(&self) -> RenderResult<SurfaceHandle> {
        let key = self
            .active_key()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))?;
        self.registry
            .get(&key)
            .ok_or_else(|| RenderError::MissingSurface(key.to_string()))
    }

    /// Switch the active material, keeping channel and frame 0.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] if the material is not mounted.
    pub fn set_active_material(&mut self, material: &str) -> RenderResult<()> {
        let session = self.session()?;
        let key = SurfaceKey::new(material, session.active_channel, 0, session.size_multiplier);
        let key = if self.registry.get(&key).is_some() {
            key
        } else {
            key.with_channel(Channel::Color)
        };
        if self.registry.get(&key).is_none() {
            return Err(RenderError::MissingSurface(key.to_string()));
        }
        let session = self.session_mut()?;
        session.active_material = material.to_string();
        session.active_channel = key.channel;
        session.active_frame = 0;
        debug!(material, "Active material changed");
        Ok(())
    }

    /// Switch the active channel.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] if the active material has no
    /// surface on that channel.
    pub fn set_active_channel(&mut self, channel: Channel) -> RenderResult<()> {
        let key = self
            .active_key()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))?
            .with_channel(channel);
        if self.registry.get(&key).is_none() {
            return Err(RenderError::MissingSurface(key.to_string()));
        }
        self.session_mut()?.active_channel = channel;
        Ok(())
    }

    /// Switch the active animation frame.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] if the frame is not mounted.
    pub fn set_active_frame(&mut self, frame: usize) -> RenderResult<()> {
        let mut key = self
            .active_key()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))?;
        key.frame = frame;
        if self.registry.get(&key).is_none() {
            return Err(RenderError::MissingSurface(key.to_string()));
        }
        self.session_mut()?.active_frame = frame;
        Ok(())
    }

    /// History of a mounted surface.
    #[must_use]
    pub fn history(&self, key: &SurfaceKey) -> Option<&HistoryManager> {
        self.session.as_ref().and_then(|s| s.histories.get(key))
    }

    fn active_history(&self) -> RenderResult<&HistoryManager> {
        let key = self
            .active_key()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))?;
        self.history(&key)
            .ok_or_else(|| RenderError::MissingSurface(key.to_string()))
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Decode an image and add it to the active surface.
    ///
    /// # Errors
    ///
    /// Returns the decode or zero-dimension error; the surface is unchanged.
    pub fn add_layer(&self, bytes: &[u8]) -> RenderResult<LayerId> {
        let surface = self.active_surface()?;
        let id = surface
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_layer(bytes)?;
        Ok(id)
    }

    /// Add several images independently; one failure does not affect the
    /// others.
    #[must_use]
    pub fn add_layers(&self, images: &[Vec<u8>]) -> Vec<RenderResult<LayerId>> {
        images.iter().map(|bytes| self.add_layer(bytes)).collect()
    }

    /// Undo on the active surface.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] or a restore error.
    pub fn undo(&self) -> RenderResult<bool> {
        Ok(self.active_history()?.undo()?)
    }

    /// Redo on the active surface.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] or a restore error.
    pub fn redo(&self) -> RenderResult<bool> {
        Ok(self.active_history()?.redo()?)
    }

    /// Apply a command to the active surface. Returns whether anything
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] or a restore error.
    pub fn dispatch(&self, command: Command) -> RenderResult<bool> {
        match command {
            Command::Undo => return self.undo(),
            Command::Redo => return self.redo(),
            _ => {}
        }
        let surface = self.active_surface()?;
        let mut surface = surface.write().unwrap_or_else(PoisonError::into_inner);
        let changed = match command {
            Command::RemoveSelection => surface.remove_selection() > 0,
            Command::Duplicate => !surface.duplicate_selection().is_empty(),
            Command::BringForward => surface.bring_selection_forward(),
            Command::SendBackward => surface.send_selection_backward(),
            Command::Lock => surface.lock_selection() > 0,
            Command::Unlock => surface.unlock_selection() > 0,
            Command::Nudge { top, left } => surface.nudge_selection(top, left) > 0,
            Command::SetMode(mode) => surface.mode() != mode && surface.set_mode(mode),
            Command::Undo | Command::Redo => false,
        };
        debug!(?command, changed, "Command dispatched");
        Ok(changed)
    }

    /// Map a key press to a command and dispatch it. Returns whether the
    /// key was handled and changed anything.
    ///
    /// # Errors
    ///
    /// Propagates [`SkinEditor::dispatch`] errors.
    pub fn handle_key(&self, input: &KeyInput) -> RenderResult<bool> {
        let Some(channel) = self.session.as_ref().map(|s| s.active_channel) else {
            return Ok(false);
        };
        match Command::from_key(input, channel, self.config.nudge_step) {
            Some(command) => self.dispatch(command),
            None => Ok(false),
        }
    }

    /// Copy the active material's colour frame into its metallic surface
    /// and switch to the metallic channel.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] if the material has no
    /// metallic surface.
    pub fn copy_to_metallic(&mut self) -> RenderResult<LayerId> {
        let key = self
            .active_key()
            .ok_or_else(|| RenderError::MissingSurface("no model mounted".to_string()))?;
        let id = self.session()?.compositor.copy_to_metallic(&self.registry, &key)?;
        self.session_mut()?.active_channel = Channel::Metallic;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Materials chosen for export.
    #[must_use]
    pub fn export_materials(&self) -> Option<&HashSet<String>> {
        self.session.as_ref().map(|s| &s.export_materials)
    }

    /// Choose which materials to export.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::MissingSurface`] when nothing is mounted.
    pub fn set_export_materials(&mut self, materials: HashSet<String>) -> RenderResult<()> {
        self.session_mut()?.export_materials = materials;
        Ok(())
    }

    /// Composite and package the mounted skin.
    ///
    /// # Errors
    ///
    /// See [`ExportAssembler::export_skin`].
    pub async fn export_skin(&self, name: &str, format: ExportFormat) -> RenderResult<ExportOutput> {
        let session = self.session()?;
        let target = ExportTarget {
            model: session.selection.model.clone(),
            model_type: session.selection.model_type,
            materials: session.export_materials.clone(),
            size_multiplier: session.size_multiplier,
        };
        ExportAssembler::new(&self.catalog, &self.registry, &session.compositor)
            .export_skin(&target, name, format)
            .await
    }
}

impl Drop for SkinEditor {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skin_core::RgbaBuffer;

    const CATALOG: &str = r#"{
        "materials": {
            "disc": [
                { "name": "disc", "size": [8, 8], "metallicFactor": 0.5 },
                { "name": "shield", "file": "discshield", "size": [4, 4],
                  "metallicFactor": 0, "roughnessFactor": 1 }
            ]
        },
        "modelDefaults": { "disc": "base" },
        "modelTypes": { "disc": "weapon" }
    }"#;

    /// Serves a fixed set of textures.
    struct MapLoader(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl AssetLoader for MapLoader {
        async fn fetch(&self, location: &str) -> RenderResult<Vec<u8>> {
            self.0
                .get(location)
                .cloned()
                .ok_or_else(|| RenderError::Resource(location.to_string()))
        }
    }

    fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        RgbaBuffer::filled(width, height, rgba).encode_png().expect("encode")
    }

    fn editor() -> SkinEditor {
        let config = EditorConfig {
            textures_base: "tex".to_string(),
            ..EditorConfig::default()
        };
        let catalog = Arc::new(MaterialCatalog::from_json(CATALOG).expect("catalog"));
        let mut files = HashMap::new();
        files.insert("tex/disc.png".to_string(), png(8, 8, [200, 10, 10, 255]));
        SkinEditor::new(config, catalog, Arc::new(MapLoader(files)))
    }

    fn disc_base() -> SkinSelection {
        SkinSelection::default_skin("disc", ModelType::Weapon, "base")
    }

    #[tokio::test]
    async fn test_mount_creates_surfaces_and_loads_bases() {
        let mut editor = editor();
        let summary = editor.mount(disc_base(), 1).await.expect("mount");

        // disc colour + metallic, shield colour only
        assert_eq!(editor.registry().len(), 3);
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.failed, 1);

        let key = editor.active_key().expect("active");
        assert_eq!(key, SurfaceKey::new("disc", Channel::Color, 0, 1));
        let surface = editor.active_surface().expect("surface");
        assert!(surface.read().expect("read").base_layer().is_some());
    }

    #[tokio::test]
    async fn test_size_multiplier_scales_surfaces() {
        let mut editor = editor();
        editor.mount(disc_base(), 2).await.expect("mount");
        let surface = editor
            .registry()
            .get(&SurfaceKey::new("shield", Channel::Color, 0, 2))
            .expect("shield");
        assert_eq!(surface.read().expect("read").texture_size(), (8, 8));
    }

    #[tokio::test]
    async fn test_unmount_tears_everything_down() {
        let mut editor = editor();
        editor.mount(disc_base(), 1).await.expect("mount");
        let worker = Arc::clone(editor.compositor().expect("compositor").worker());
        editor.unmount();

        assert!(!editor.is_mounted());
        assert!(editor.registry().is_empty());
        assert!(!worker.is_running());
        assert!(editor.active_surface().is_err());
    }

    #[tokio::test]
    async fn test_channel_switch_requires_metallic_surface() {
        let mut editor = editor();
        editor.mount(disc_base(), 1).await.expect("mount");
        editor.set_active_channel(Channel::Metallic).expect("disc metallic");

        // shield has no metallic surface, so the colour channel is kept
        editor.set_active_material("shield").expect("shield");
        assert_eq!(editor.active_key().map(|k| k.channel), Some(Channel::Color));
        assert!(matches!(
            editor.set_active_channel(Channel::Metallic),
            Err(RenderError::MissingSurface(_))
        ));
        assert!(editor.set_active_frame(1).is_err());
    }

    #[tokio::test]
    async fn test_keys_drive_the_active_surface() {
        let mut editor = editor();
        assert!(!editor.handle_key(&KeyInput::plain("Delete")).expect("unmounted"));

        editor.mount(disc_base(), 1).await.expect("mount");
        let id = editor.add_layer(&png(2, 2, [0, 0, 255, 255])).expect("add");
        let surface = editor.active_surface().expect("surface");
        assert_eq!(surface.read().expect("read").selection(), &[id]);

        assert!(!editor.handle_key(&KeyInput::plain("q")).expect("unmapped"));
        assert!(editor.handle_key(&KeyInput::plain("Delete")).expect("delete"));
        assert_eq!(surface.read().expect("read").layer_count(), 1);
    }

    #[tokio::test]
    async fn test_add_layers_are_independent() {
        let mut editor = editor();
        editor.mount(disc_base(), 1).await.expect("mount");
        let results = editor.add_layers(&[png(2, 2, [1, 1, 1, 255]), b"junk".to_vec(), png(3, 3, [2, 2, 2, 255])]);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        let surface = editor.active_surface().expect("surface");
        assert_eq!(surface.read().expect("read").layer_count(), 3);
    }
}
