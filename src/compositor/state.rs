//! Global compositor state
//!
//! `CompositorState` is the scene graph. Every change a client request
//! causes goes through it while the scene lock is held, so commits are
//! linearizable per surface. The renderer only ever sees the scene through
//! [`CompositorState::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use thiserror::Error;

use crate::compositor::layout::{self, cascade_position};
use crate::compositor::{
    Buffer, BufferStore, BufferTransform, ConnectionId, ConnectionRegistry, DamageRegion,
    FrameCallbackId, LayoutMode, OutputHealth, OutputId, OutputManager, OutputMode, Rect,
    SceneSnapshot, SnapshotOutput, SnapshotSurface, Surface, SurfaceId, SurfaceManager,
    SurfaceRole, TileParams, WindowId, WindowKind, WindowManager, WindowStates,
};
use crate::protocol::shm::ShmContents;
use crate::protocol::Region;

/// The scene as shared between the event loop, renderer and input bridge
pub type SharedScene = Arc<Mutex<CompositorState>>;

/// Lock the scene, recovering the guard if a holder panicked
pub fn lock_scene(scene: &Mutex<CompositorState>) -> MutexGuard<'_, CompositorState> {
    scene.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors raised by scene operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("unknown connection {0:?}")]
    UnknownConnection(ConnectionId),
    #[error("unknown surface {0:?}")]
    UnknownSurface(SurfaceId),
    #[error("unknown window {0:?}")]
    UnknownWindow(WindowId),
    #[error("unknown output {0:?}")]
    UnknownOutput(OutputId),
    #[error("invalid buffer scale {0}")]
    InvalidScale(i32),
    #[error("surface {surface:?} already has role {existing:?}, cannot take {requested:?}")]
    RoleConflict {
        surface: SurfaceId,
        existing: SurfaceRole,
        requested: SurfaceRole,
    },
    #[error("popup {0:?} cannot be its own parent")]
    PopupCycle(SurfaceId),
}

/// Scene tunables taken from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneConfig {
    /// Per-surface commit queue capacity
    pub commit_queue_depth: usize,
    pub layout: LayoutMode,
    pub tile: TileParams,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            commit_queue_depth: 3,
            layout: LayoutMode::default(),
            tile: TileParams::default(),
        }
    }
}

/// Objects released by a destroy or disconnect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teardown {
    pub surfaces: Vec<SurfaceId>,
    pub windows: Vec<WindowId>,
    /// Frame callbacks that will never fire
    pub callbacks: Vec<FrameCallbackId>,
}

impl Teardown {
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty() && self.windows.is_empty() && self.callbacks.is_empty()
    }
}

/// Result of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub seq: u64,
    /// An undisplayed frame was dropped to make room
    pub dropped_frame: bool,
    /// Window backed by the surface, if any
    pub window: Option<WindowId>,
    /// The window became visible with this commit
    pub mapped: bool,
    /// The window lost its buffer with this commit
    pub unmapped: bool,
}

/// A configure the server owes a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configure {
    Toplevel {
        window: WindowId,
        /// (0, 0) lets the client pick
        size: (i32, i32),
        states: WindowStates,
    },
    Popup {
        window: WindowId,
        /// Relative to the parent's window geometry
        geometry: Rect,
    },
}

impl Configure {
    pub fn window(&self) -> WindowId {
        match self {
            Configure::Toplevel { window, .. } | Configure::Popup { window, .. } => *window,
        }
    }
}

/// Surface found under a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTarget {
    pub surface: SurfaceId,
    pub owner: ConnectionId,
    pub window: WindowId,
    /// Point in surface-local coordinates
    pub local: (f64, f64),
}

/// The global compositor state
///
/// This struct holds the scene: connections and the surfaces, windows and
/// buffers they own, plus the outputs they are shown on.
pub struct CompositorState {
    pub connections: ConnectionRegistry,

    /// Surface manager - tracks all wl_surfaces
    pub surfaces: SurfaceManager,

    /// Window manager - stacking, focus and placement
    pub windows: WindowManager,

    /// Output manager - tracks displays/monitors
    pub outputs: OutputManager,

    buffers: BufferStore,
    config: SceneConfig,

    /// Global damage not tied to a queued frame (moves, unmaps, relayouts)
    damage: DamageRegion,

    configures: Vec<Configure>,
    commit_seq: u64,
    frame: u64,

    /// Serial counter for Wayland events
    serial: AtomicU64,
}

impl CompositorState {
    /// Create a new compositor state
    pub fn new(config: SceneConfig) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            surfaces: SurfaceManager::new(),
            windows: WindowManager::new(),
            outputs: OutputManager::new(),
            buffers: BufferStore::new(),
            config: SceneConfig {
                commit_queue_depth: config.commit_queue_depth.max(1),
                ..config
            },
            damage: DamageRegion::new(),
            configures: Vec::new(),
            commit_seq: 0,
            frame: 0,
            serial: AtomicU64::new(1),
        }
    }

    /// Wrap into the shared form
    pub fn into_shared(self) -> SharedScene {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Get the next serial number for Wayland events
    pub fn next_serial(&self) -> u32 {
        self.serial.fetch_add(1, Ordering::Relaxed) as u32
    }

    // ---------------------------------------------------------------------
    // Connections
    // ---------------------------------------------------------------------

    pub fn open_connection(&mut self) -> ConnectionId {
        let id = self.connections.open();
        debug!("Opened connection {:?}", id);
        id
    }

    /// Destroy everything a connection owns
    ///
    /// Closing an unknown or already closed connection does nothing.
    pub fn close_connection(&mut self, id: ConnectionId) -> Teardown {
        let mut teardown = Teardown::default();
        let Some(connection) = self.connections.remove(id) else {
            return teardown;
        };

        for surface in connection.surfaces {
            self.teardown_surface(surface, &mut teardown);
        }
        let stray: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, w)| w.owner == id)
            .map(|(wid, _)| *wid)
            .collect();
        for window in stray {
            self.remove_window(window, &mut teardown);
        }

        self.buffers.prune();
        self.relayout_tiles();
        info!(
            "Closed connection {:?}: {} surfaces, {} windows released",
            id,
            teardown.surfaces.len(),
            teardown.windows.len()
        );
        teardown
    }

    // ---------------------------------------------------------------------
    // Surfaces and buffers
    // ---------------------------------------------------------------------

    pub fn create_surface(&mut self, owner: ConnectionId) -> Result<SurfaceId, SceneError> {
        let connection = self
            .connections
            .get_mut(owner)
            .ok_or(SceneError::UnknownConnection(owner))?;
        let id = self
            .surfaces
            .create_surface(owner, self.config.commit_queue_depth);
        connection.surfaces.insert(id);
        debug!("Created surface {:?} for {:?}", id, owner);
        Ok(id)
    }

    /// Destroy a surface along with any window or popups built on it
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Result<Teardown, SceneError> {
        if self.surfaces.get(id).is_none() {
            return Err(SceneError::UnknownSurface(id));
        }
        let mut teardown = Teardown::default();
        self.teardown_surface(id, &mut teardown);
        if !teardown.windows.is_empty() {
            self.relayout_tiles();
        }
        self.buffers.prune();
        debug!("Destroyed surface {:?}", id);
        Ok(teardown)
    }

    fn teardown_surface(&mut self, id: SurfaceId, teardown: &mut Teardown) {
        if let Some(window) = self.windows.window_for_surface(id) {
            self.remove_window(window, teardown);
        }
        for child in self.windows.children_of(id) {
            self.remove_window(child, teardown);
        }
        if let Some(mut surface) = self.surfaces.remove(id) {
            teardown.callbacks.append(&mut surface.pending.frame_callbacks);
            teardown.callbacks.extend(surface.queue.clear());
            teardown.surfaces.push(id);
            if let Some(connection) = self.connections.get_mut(surface.owner) {
                connection.surfaces.remove(&id);
            }
        }
    }

    /// Copy client pixels into an immutable buffer
    pub fn import_buffer(&mut self, owner: ConnectionId, contents: &ShmContents) -> Arc<Buffer> {
        self.buffers.insert(Buffer::from_shm(owner, contents))
    }

    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut Surface, SceneError> {
        self.surfaces
            .get_mut(id)
            .ok_or(SceneError::UnknownSurface(id))
    }

    pub fn attach(&mut self, id: SurfaceId, buffer: Option<Arc<Buffer>>) -> Result<(), SceneError> {
        self.surface_mut(id)?.attach(buffer);
        Ok(())
    }

    pub fn damage(&mut self, id: SurfaceId, rect: Rect) -> Result<(), SceneError> {
        self.surface_mut(id)?.damage(rect);
        Ok(())
    }

    pub fn damage_buffer(&mut self, id: SurfaceId, rect: Rect) -> Result<(), SceneError> {
        self.surface_mut(id)?.damage_buffer(rect);
        Ok(())
    }

    pub fn set_buffer_scale(&mut self, id: SurfaceId, scale: i32) -> Result<(), SceneError> {
        self.surface_mut(id)?.set_scale(scale)
    }

    pub fn set_buffer_transform(
        &mut self,
        id: SurfaceId,
        transform: BufferTransform,
    ) -> Result<(), SceneError> {
        self.surface_mut(id)?.set_transform(transform);
        Ok(())
    }

    pub fn set_offset(&mut self, id: SurfaceId, x: i32, y: i32) -> Result<(), SceneError> {
        self.surface_mut(id)?.set_offset(x, y);
        Ok(())
    }

    pub fn set_opaque_region(
        &mut self,
        id: SurfaceId,
        region: Option<Region>,
    ) -> Result<(), SceneError> {
        self.surface_mut(id)?.set_opaque_region(region);
        Ok(())
    }

    pub fn set_input_region(
        &mut self,
        id: SurfaceId,
        region: Option<Region>,
    ) -> Result<(), SceneError> {
        self.surface_mut(id)?.set_input_region(region);
        Ok(())
    }

    pub fn frame(&mut self, id: SurfaceId, callback: FrameCallbackId) -> Result<(), SceneError> {
        self.surface_mut(id)?.frame(callback);
        Ok(())
    }

    pub fn set_role(&mut self, id: SurfaceId, role: SurfaceRole) -> Result<(), SceneError> {
        self.surface_mut(id)?.set_role(role)
    }

    /// Promote pending state and queue the frame for the renderer
    ///
    /// Never waits for rendering; a full queue drops its oldest frame.
    pub fn commit(&mut self, id: SurfaceId) -> Result<CommitOutcome, SceneError> {
        let window = self.windows.window_for_surface(id);
        let old_bounds = window.and_then(|w| self.window_bounds(w));

        let seq = self.commit_seq + 1;
        let commit = self.surface_mut(id)?.commit(seq);
        self.commit_seq = seq;

        let mut outcome = CommitOutcome {
            seq,
            dropped_frame: commit.dropped_frame,
            window,
            mapped: false,
            unmapped: false,
        };
        let Some(window_id) = window else {
            return Ok(outcome);
        };
        let Some(was_mapped) = self.windows.get(window_id).map(|w| w.mapped) else {
            return Ok(outcome);
        };

        if commit.has_buffer && !was_mapped {
            self.map_window(window_id);
            outcome.mapped = true;
        } else if !commit.has_buffer && was_mapped {
            self.unmap_window(window_id, old_bounds);
            outcome.unmapped = true;
        } else if was_mapped && commit.offset != (0, 0) {
            if let Some(window) = self.windows.get_mut(window_id) {
                if window.is_toplevel() {
                    window.position.0 += commit.offset.0;
                    window.position.1 += commit.offset.1;
                }
            }
            if let Some(old) = old_bounds {
                self.damage.add(old);
            }
            self.damage_window(window_id);
        }
        Ok(outcome)
    }

    fn map_window(&mut self, id: WindowId) {
        let index = self.windows.mapped_toplevels().len();
        let area = self.placement_area(id, None);
        let cascade = self.config.layout == LayoutMode::Cascade;
        if let Some(window) = self.windows.get_mut(id) {
            window.mapped = true;
            let managed = window
                .states
                .intersects(WindowStates::MAXIMIZED | WindowStates::FULLSCREEN);
            if window.is_toplevel() && cascade && !managed {
                if let Some(area) = area {
                    window.position = cascade_position(area, index);
                }
            }
            debug!("Mapped window {:?} at {:?}", id, window.position);
        }
        self.windows.raise(id);
        self.relayout_tiles();
        self.damage_window(id);
    }

    fn unmap_window(&mut self, id: WindowId, old_bounds: Option<Rect>) {
        if let Some(window) = self.windows.get_mut(id) {
            window.mapped = false;
        }
        if let Some(old) = old_bounds {
            self.damage.add(old);
        }
        if self.windows.focused() == Some(id) {
            self.focus(None);
        }
        self.relayout_tiles();
        debug!("Unmapped window {:?}", id);
    }

    // ---------------------------------------------------------------------
    // Windows
    // ---------------------------------------------------------------------

    pub fn create_toplevel(&mut self, surface: SurfaceId) -> Result<WindowId, SceneError> {
        let owner = self.give_role(surface, SurfaceRole::XdgToplevel)?;
        let id = self.windows.create_toplevel(surface, owner);
        if let Some(connection) = self.connections.get_mut(owner) {
            connection.windows.insert(id);
        }
        self.relayout_tiles();
        debug!("Created toplevel {:?} on {:?}", id, surface);
        Ok(id)
    }

    pub fn create_popup(
        &mut self,
        surface: SurfaceId,
        parent: SurfaceId,
        geometry: Rect,
    ) -> Result<WindowId, SceneError> {
        if surface == parent {
            return Err(SceneError::PopupCycle(surface));
        }
        if self.surfaces.get(parent).is_none() {
            return Err(SceneError::UnknownSurface(parent));
        }
        let owner = self.give_role(surface, SurfaceRole::XdgPopup)?;
        let id = self.windows.create_popup(surface, owner, parent, geometry);
        if let Some(connection) = self.connections.get_mut(owner) {
            connection.windows.insert(id);
        }
        debug!("Created popup {:?} on {:?} (parent {:?})", id, surface, parent);
        Ok(id)
    }

    fn give_role(&mut self, surface: SurfaceId, role: SurfaceRole) -> Result<ConnectionId, SceneError> {
        let s = self.surface_mut(surface)?;
        s.set_role(role)?;
        Ok(s.owner)
    }

    /// Destroy a window; the surface stays and keeps its role
    pub fn destroy_window(&mut self, id: WindowId) -> Result<Teardown, SceneError> {
        if self.windows.get(id).is_none() {
            return Err(SceneError::UnknownWindow(id));
        }
        let mut teardown = Teardown::default();
        self.remove_window(id, &mut teardown);
        self.relayout_tiles();
        Ok(teardown)
    }

    fn remove_window(&mut self, id: WindowId, teardown: &mut Teardown) {
        let Some(surface) = self.windows.get(id).map(|w| w.surface_id) else {
            return;
        };
        for child in self.windows.children_of(surface) {
            self.remove_window(child, teardown);
        }
        self.damage_window(id);
        if let Some(window) = self.windows.remove(id) {
            if let Some(connection) = self.connections.get_mut(window.owner) {
                connection.windows.remove(&id);
            }
            self.configures.retain(|c| c.window() != id);
            teardown.windows.push(id);
        }
    }

    fn window_mut(&mut self, id: WindowId) -> Result<&mut crate::compositor::Window, SceneError> {
        self.windows
            .get_mut(id)
            .ok_or(SceneError::UnknownWindow(id))
    }

    pub fn set_title(&mut self, id: WindowId, title: String) -> Result<(), SceneError> {
        self.window_mut(id)?.title = Some(title);
        Ok(())
    }

    pub fn set_app_id(&mut self, id: WindowId, app_id: String) -> Result<(), SceneError> {
        self.window_mut(id)?.app_id = Some(app_id);
        Ok(())
    }

    pub fn set_min_size(&mut self, id: WindowId, width: i32, height: i32) -> Result<(), SceneError> {
        self.window_mut(id)?.min_size = (width.max(0), height.max(0));
        Ok(())
    }

    pub fn set_max_size(&mut self, id: WindowId, width: i32, height: i32) -> Result<(), SceneError> {
        self.window_mut(id)?.max_size = (width.max(0), height.max(0));
        Ok(())
    }

    /// Window geometry in surface coordinates
    pub fn set_window_geometry(&mut self, id: WindowId, geometry: Rect) -> Result<(), SceneError> {
        self.damage_window(id);
        self.window_mut(id)?.geometry = Some(geometry);
        self.damage_window(id);
        Ok(())
    }

    pub fn set_maximized(&mut self, id: WindowId, enabled: bool) -> Result<(), SceneError> {
        self.set_managed_state(id, WindowStates::MAXIMIZED, enabled, None)
    }

    /// Fullscreen on `output`, or on the output the window is on
    pub fn set_fullscreen(
        &mut self,
        id: WindowId,
        enabled: bool,
        output: Option<OutputId>,
    ) -> Result<(), SceneError> {
        self.set_managed_state(id, WindowStates::FULLSCREEN, enabled, output)
    }

    fn set_managed_state(
        &mut self,
        id: WindowId,
        flag: WindowStates,
        enabled: bool,
        output: Option<OutputId>,
    ) -> Result<(), SceneError> {
        if let Some(output) = output {
            if self.outputs.get(output).is_none() {
                return Err(SceneError::UnknownOutput(output));
            }
        }
        let area = self.placement_area(id, output);
        self.damage_window(id);
        let window = self.window_mut(id)?;
        if enabled {
            if !window
                .states
                .intersects(WindowStates::MAXIMIZED | WindowStates::FULLSCREEN)
            {
                window.restore_position = Some(window.position);
            }
            window.states.insert(flag);
        } else {
            window.states.remove(flag);
        }

        let managed = window
            .states
            .intersects(WindowStates::MAXIMIZED | WindowStates::FULLSCREEN);
        if managed {
            if let Some(area) = area {
                window.position = (area.x, area.y);
                window.requested_size = Some((area.width, area.height));
            }
        } else {
            if let Some(position) = window.restore_position.take() {
                window.position = position;
            }
            window.requested_size = None;
        }
        debug!("Window {:?} {:?} = {}", id, flag, enabled);

        self.queue_configure(id);
        self.relayout_tiles();
        self.damage_window(id);
        Ok(())
    }

    /// Raise a window (and its popups) to the top
    pub fn raise(&mut self, id: WindowId) -> Result<(), SceneError> {
        if self.windows.get(id).is_none() {
            return Err(SceneError::UnknownWindow(id));
        }
        self.windows.raise(id);
        self.damage_window(id);
        for child in self.popups_of(id) {
            self.damage_window(child);
        }
        Ok(())
    }

    fn popups_of(&self, id: WindowId) -> Vec<WindowId> {
        self.windows
            .get(id)
            .map(|w| self.windows.children_of(w.surface_id))
            .unwrap_or_default()
    }

    /// Move activation to a window, configuring both sides of the change
    pub fn focus(&mut self, id: Option<WindowId>) {
        for changed in self.windows.set_focused(id) {
            self.queue_configure(changed);
        }
    }

    /// Toplevel a window belongs to (itself for toplevels)
    pub fn toplevel_of(&self, id: WindowId) -> Option<WindowId> {
        let mut current = self.windows.get(id)?;
        for _ in 0..32 {
            match current.kind {
                WindowKind::Toplevel => return Some(current.id),
                WindowKind::Popup { parent, .. } => {
                    current = self.windows.get_by_surface(parent)?;
                }
            }
        }
        None
    }

    /// Move a toplevel's window geometry origin to a global position
    pub fn move_window(&mut self, id: WindowId, position: (i32, i32)) -> Result<(), SceneError> {
        self.damage_window(id);
        for child in self.popups_of(id) {
            self.damage_window(child);
        }
        let window = self.window_mut(id)?;
        if window.is_toplevel() {
            window.position = position;
        }
        self.damage_window(id);
        for child in self.popups_of(id) {
            self.damage_window(child);
        }
        Ok(())
    }

    /// Place a popup at new geometry relative to its parent
    pub fn reposition_popup(&mut self, id: WindowId, geometry: Rect) -> Result<(), SceneError> {
        self.damage_window(id);
        let window = self.window_mut(id)?;
        let WindowKind::Popup { geometry: current, .. } = &mut window.kind else {
            return Err(SceneError::UnknownWindow(id));
        };
        *current = geometry;
        self.queue_configure(id);
        self.damage_window(id);
        Ok(())
    }

    /// Global bounds of the window's surface
    pub fn window_bounds(&self, id: WindowId) -> Option<Rect> {
        let window = self.windows.get(id)?;
        let (x, y) = self.windows.surface_origin(id)?;
        let (w, h) = self.surfaces.get(window.surface_id)?.current.size();
        Some(Rect::new(x, y, w, h))
    }

    fn damage_window(&mut self, id: WindowId) {
        if self.windows.get(id).is_some_and(|w| w.mapped) {
            if let Some(bounds) = self.window_bounds(id) {
                self.damage.add(bounds);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Configures
    // ---------------------------------------------------------------------

    /// Mark the initial configure as sent and return it
    ///
    /// Until this is called, state changes do not queue configures.
    pub fn initial_configure(&mut self, id: WindowId) -> Result<Configure, SceneError> {
        self.window_mut(id)?.configured = true;
        self.configures.retain(|c| c.window() != id);
        self.configure_for(id).ok_or(SceneError::UnknownWindow(id))
    }

    fn configure_for(&self, id: WindowId) -> Option<Configure> {
        let window = self.windows.get(id)?;
        Some(match window.kind {
            WindowKind::Toplevel => Configure::Toplevel {
                window: id,
                size: window.requested_size.unwrap_or((0, 0)),
                states: window.states,
            },
            WindowKind::Popup { geometry, .. } => Configure::Popup {
                window: id,
                geometry,
            },
        })
    }

    fn queue_configure(&mut self, id: WindowId) {
        if !self.windows.get(id).is_some_and(|w| w.configured) {
            return;
        }
        if let Some(configure) = self.configure_for(id) {
            self.configures.retain(|c| c.window() != id);
            self.configures.push(configure);
        }
    }

    /// Configures produced since the last call, at most one per window
    pub fn take_configures(&mut self) -> Vec<Configure> {
        std::mem::take(&mut self.configures)
    }

    // ---------------------------------------------------------------------
    // Layout
    // ---------------------------------------------------------------------

    /// Area a window should be placed in
    fn placement_area(&self, id: WindowId, output: Option<OutputId>) -> Option<Rect> {
        if let Some(output) = output.and_then(|o| self.outputs.get(o)) {
            return Some(output.logical_rect());
        }
        let position = self.windows.position_of(id);
        position
            .and_then(|(x, y)| self.outputs.output_at(x, y))
            .or_else(|| self.outputs.primary())
            .map(|o| o.logical_rect())
    }

    fn relayout_tiles(&mut self) {
        if self.config.layout != LayoutMode::Tile {
            return;
        }
        let Some(area) = self.outputs.primary().map(|o| o.logical_rect()) else {
            return;
        };
        let mut ids: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, w)| {
                w.is_toplevel()
                    && !w
                        .states
                        .intersects(WindowStates::MAXIMIZED | WindowStates::FULLSCREEN)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();

        let tiles = layout::tile(area, ids.len(), self.config.tile);
        let mut moved = false;
        for (id, tile) in ids.into_iter().zip(tiles) {
            let changed = match self.windows.get_mut(id) {
                Some(window) => {
                    let size = window.constrain_size((tile.width, tile.height));
                    let changed = window.position != (tile.x, tile.y)
                        || window.requested_size != Some(size);
                    window.position = (tile.x, tile.y);
                    window.requested_size = Some(size);
                    changed
                }
                None => false,
            };
            if changed {
                moved = true;
                self.queue_configure(id);
            }
        }
        if moved {
            self.damage_outputs();
        }
    }

    // ---------------------------------------------------------------------
    // Outputs
    // ---------------------------------------------------------------------

    pub fn add_output(&mut self, name: String, mode: OutputMode, scale: f64) -> OutputId {
        let id = self.outputs.create_output(name, mode, scale);
        if let Some(output) = self.outputs.get(id) {
            info!(
                "Added output {} {}x{} scale {}",
                output.name, mode.width, mode.height, output.scale
            );
            self.damage.add(output.logical_rect());
        }
        self.relayout_tiles();
        id
    }

    /// Apply a new host size; this also clears any fault
    pub fn resize_output(
        &mut self,
        id: OutputId,
        mode: OutputMode,
        scale: f64,
    ) -> Result<(), SceneError> {
        let output = self
            .outputs
            .get_mut(id)
            .ok_or(SceneError::UnknownOutput(id))?;
        output.mode = mode;
        if scale.is_finite() && scale > 0.0 {
            output.scale = scale;
        }
        output.health = OutputHealth::Healthy;
        self.outputs.relayout();
        debug!("Output {:?} resized to {}x{}", id, mode.width, mode.height);

        let managed: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, w)| {
                w.states
                    .intersects(WindowStates::MAXIMIZED | WindowStates::FULLSCREEN)
            })
            .map(|(wid, _)| *wid)
            .collect();
        for window in managed {
            let area = self.placement_area(window, None);
            if let (Some(area), Some(w)) = (area, self.windows.get_mut(window)) {
                w.position = (area.x, area.y);
                w.requested_size = Some((area.width, area.height));
            }
            self.queue_configure(window);
        }
        self.relayout_tiles();
        self.damage_outputs();
        Ok(())
    }

    /// Stop rendering to an output until it is restored
    pub fn fault_output(&mut self, id: OutputId, reason: String) -> Result<(), SceneError> {
        let output = self
            .outputs
            .get_mut(id)
            .ok_or(SceneError::UnknownOutput(id))?;
        output.health = OutputHealth::Faulted { reason };
        Ok(())
    }

    pub fn restore_output(&mut self, id: OutputId) -> Result<(), SceneError> {
        let output = self
            .outputs
            .get_mut(id)
            .ok_or(SceneError::UnknownOutput(id))?;
        output.health = OutputHealth::Healthy;
        let rect = output.logical_rect();
        self.damage.add(rect);
        info!("Output {:?} restored", id);
        Ok(())
    }

    fn damage_outputs(&mut self) {
        for rect in self.outputs.iter().map(|o| o.logical_rect()) {
            self.damage.add(rect);
        }
    }

    // ---------------------------------------------------------------------
    // Renderer and input views
    // ---------------------------------------------------------------------

    /// Whether anything changed since the last snapshot
    pub fn needs_frame(&self) -> bool {
        !self.damage.is_empty() || self.surfaces.iter().any(|(_, s)| !s.queue.is_empty())
    }

    /// Build the renderer's view of the scene
    ///
    /// Drains every commit queue: the newest frame of each surface becomes
    /// its displayed frame, and the damage and callbacks of all drained
    /// frames are collected.
    pub fn snapshot(&mut self) -> SceneSnapshot {
        self.frame += 1;
        let mut damage = self.damage.take();
        let mut callbacks = Vec::new();

        for (id, surface) in self.surfaces.iter_mut() {
            let Some(mut frame) = surface.queue.take_latest() else {
                continue;
            };
            callbacks.append(&mut frame.callbacks);
            let origin = self
                .windows
                .window_for_surface(*id)
                .filter(|w| self.windows.get(*w).is_some_and(|w| w.mapped))
                .and_then(|w| self.windows.surface_origin(w));
            if let Some((x, y)) = origin {
                damage.merge(&frame.damage.translate(x, y));
            }
            surface.displayed = Some(frame);
        }

        let mut surfaces = Vec::new();
        for window_id in self.windows.stack() {
            let Some(window) = self.windows.get(*window_id) else {
                continue;
            };
            if !window.mapped {
                continue;
            }
            let Some(surface) = self.surfaces.get(window.surface_id) else {
                continue;
            };
            let Some(frame) = &surface.displayed else {
                continue;
            };
            let (Some(buffer), Some(origin)) =
                (frame.buffer.clone(), self.windows.surface_origin(*window_id))
            else {
                continue;
            };
            surfaces.push(SnapshotSurface {
                surface: surface.id,
                owner: surface.owner,
                window: *window_id,
                origin,
                size: frame.size(),
                buffer,
                scale: frame.scale,
                transform: frame.transform,
                seq: frame.seq,
            });
        }

        let outputs = self
            .outputs
            .iter()
            .map(|o| SnapshotOutput {
                id: o.id,
                rect: o.logical_rect(),
                mode: o.mode,
                scale: o.scale,
                faulted: o.is_faulted(),
            })
            .collect();

        SceneSnapshot {
            frame: self.frame,
            surfaces,
            outputs,
            damage,
            callbacks,
        }
    }

    /// Topmost surface accepting input at a global point
    pub fn hit_test(&self, x: f64, y: f64) -> Option<HitTarget> {
        for window_id in self.windows.stack().iter().rev() {
            let Some(window) = self.windows.get(*window_id) else {
                continue;
            };
            if !window.mapped {
                continue;
            }
            let (Some(surface), Some((ox, oy))) = (
                self.surfaces.get(window.surface_id),
                self.windows.surface_origin(*window_id),
            ) else {
                continue;
            };
            let local = (x - ox as f64, y - oy as f64);
            if surface
                .current
                .accepts_input(local.0.floor() as i32, local.1.floor() as i32)
            {
                return Some(HitTarget {
                    surface: surface.id,
                    owner: surface.owner,
                    window: *window_id,
                    local,
                });
            }
        }
        None
    }

    /// Frames dropped by full commit queues of live surfaces
    pub fn dropped_frames(&self) -> u64 {
        self.surfaces.iter().map(|(_, s)| s.queue.dropped()).sum()
    }
}

impl Default for CompositorState {
    fn default() -> Self {
        Self::new(SceneConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::shm::ShmFormat;
    use proptest::prelude::*;

    fn scene_with_output(layout: LayoutMode) -> CompositorState {
        let mut scene = CompositorState::new(SceneConfig {
            layout,
            ..SceneConfig::default()
        });
        scene.add_output("HOST-1".into(), OutputMode::new(800, 600, 60000), 1.0);
        scene
    }

    fn solid(scene: &mut CompositorState, owner: ConnectionId, w: u32, h: u32, color: u32) -> Arc<Buffer> {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..w * h {
            data.extend_from_slice(&color.to_le_bytes());
        }
        scene.import_buffer(
            owner,
            &ShmContents {
                width: w,
                height: h,
                stride: w * 4,
                format: ShmFormat::Argb8888,
                data,
            },
        )
    }

    fn mapped_toplevel(scene: &mut CompositorState, conn: ConnectionId) -> (SurfaceId, WindowId) {
        let surface = scene.create_surface(conn).unwrap();
        let window = scene.create_toplevel(surface).unwrap();
        scene.initial_configure(window).unwrap();
        let buffer = solid(scene, conn, 100, 80, 0xff00_00ff);
        scene.attach(surface, Some(buffer)).unwrap();
        scene.commit(surface).unwrap();
        (surface, window)
    }

    #[test]
    fn test_serial_increments() {
        let state = CompositorState::default();
        let s1 = state.next_serial();
        let s2 = state.next_serial();
        assert!(s2 > s1);
    }

    #[test]
    fn test_surface_requires_connection() {
        let mut scene = CompositorState::default();
        assert_eq!(
            scene.create_surface(ConnectionId(u64::MAX)),
            Err(SceneError::UnknownConnection(ConnectionId(u64::MAX)))
        );
    }

    #[test]
    fn test_first_buffer_maps_window() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let surface = scene.create_surface(conn).unwrap();
        let window = scene.create_toplevel(surface).unwrap();

        let outcome = scene.commit(surface).unwrap();
        assert!(!outcome.mapped);

        let buffer = solid(&mut scene, conn, 10, 10, 0xffff_ffff);
        scene.attach(surface, Some(buffer)).unwrap();
        let outcome = scene.commit(surface).unwrap();
        assert!(outcome.mapped);
        assert_eq!(outcome.window, Some(window));
        assert_eq!(scene.window_bounds(window), Some(Rect::new(0, 0, 10, 10)));

        scene.attach(surface, None).unwrap();
        let outcome = scene.commit(surface).unwrap();
        assert!(outcome.unmapped);
    }

    #[test]
    fn test_cascade_placement() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (_, first) = mapped_toplevel(&mut scene, conn);
        let (_, second) = mapped_toplevel(&mut scene, conn);
        assert_eq!(scene.windows.get(first).unwrap().position, (0, 0));
        assert_eq!(scene.windows.get(second).unwrap().position, (50, 50));
        assert_eq!(scene.windows.stack(), &[first, second]);
    }

    #[test]
    fn test_pending_state_not_in_snapshot() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (surface, _) = mapped_toplevel(&mut scene, conn);
        let first = scene.snapshot();
        let shown = first.surface(surface).unwrap().buffer.id;

        let pending = solid(&mut scene, conn, 100, 80, 0xff00_ff00);
        scene.attach(surface, Some(pending.clone())).unwrap();
        let second = scene.snapshot();
        assert_eq!(second.surface(surface).unwrap().buffer.id, shown);

        scene.commit(surface).unwrap();
        let third = scene.snapshot();
        assert_eq!(third.surface(surface).unwrap().buffer.id, pending.id);
    }

    #[test]
    fn test_snapshot_collects_damage_and_callbacks() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (surface, window) = mapped_toplevel(&mut scene, conn);
        scene.move_window(window, (200, 100)).unwrap();
        scene.snapshot();

        scene.damage(surface, Rect::new(1, 2, 3, 4)).unwrap();
        scene.frame(surface, FrameCallbackId(900)).unwrap();
        assert!(scene.snapshot().callbacks.is_empty());

        scene.commit(surface).unwrap();
        let snapshot = scene.snapshot();
        assert_eq!(snapshot.callbacks, vec![FrameCallbackId(900)]);
        assert_eq!(snapshot.damage.rects(), &[Rect::new(201, 102, 3, 4)]);
        assert!(!scene.needs_frame());
    }

    #[test]
    fn test_queue_overflow_keeps_callbacks() {
        let mut scene = CompositorState::new(SceneConfig {
            commit_queue_depth: 1,
            ..SceneConfig::default()
        });
        scene.add_output("HOST-1".into(), OutputMode::new(800, 600, 60000), 1.0);
        let conn = scene.open_connection();
        let (surface, _) = mapped_toplevel(&mut scene, conn);
        scene.snapshot();

        for cb in 1..=3 {
            scene.frame(surface, FrameCallbackId(cb)).unwrap();
            scene.commit(surface).unwrap();
        }
        assert_eq!(scene.dropped_frames(), 2);
        let snapshot = scene.snapshot();
        assert_eq!(
            snapshot.callbacks,
            vec![FrameCallbackId(1), FrameCallbackId(2), FrameCallbackId(3)]
        );
    }

    #[test]
    fn test_close_connection_releases_everything() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let other = scene.open_connection();
        let (surface, window) = mapped_toplevel(&mut scene, conn);
        let (kept, _) = mapped_toplevel(&mut scene, other);
        scene.frame(surface, FrameCallbackId(77)).unwrap();

        let teardown = scene.close_connection(conn);
        assert_eq!(teardown.surfaces, vec![surface]);
        assert_eq!(teardown.windows, vec![window]);
        assert_eq!(teardown.callbacks, vec![FrameCallbackId(77)]);
        assert_eq!(scene.buffers().live_for(conn), 0);
        assert!(scene.surfaces.get(kept).is_some());

        assert!(scene.close_connection(conn).is_empty());
    }

    #[test]
    fn test_destroy_parent_removes_popups() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (parent, _) = mapped_toplevel(&mut scene, conn);
        let popup_surface = scene.create_surface(conn).unwrap();
        let popup = scene
            .create_popup(popup_surface, parent, Rect::new(5, 5, 20, 20))
            .unwrap();

        let teardown = scene.destroy_surface(parent).unwrap();
        assert!(teardown.windows.contains(&popup));
        assert!(scene.windows.get(popup).is_none());
        assert!(scene.surfaces.get(popup_surface).is_some());
    }

    #[test]
    fn test_reposition_popup_configures() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (parent, toplevel) = mapped_toplevel(&mut scene, conn);
        let popup_surface = scene.create_surface(conn).unwrap();
        let popup = scene
            .create_popup(popup_surface, parent, Rect::new(5, 5, 20, 20))
            .unwrap();
        scene.initial_configure(popup).unwrap();
        scene.take_configures();

        let moved = Rect::new(30, 10, 20, 20);
        scene.reposition_popup(popup, moved).unwrap();
        assert_eq!(
            scene.take_configures(),
            vec![Configure::Popup {
                window: popup,
                geometry: moved
            }]
        );
        assert_eq!(scene.windows.position_of(popup), Some((30, 10)));
        assert!(scene.reposition_popup(toplevel, moved).is_err());
    }

    #[test]
    fn test_role_conflict() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let surface = scene.create_surface(conn).unwrap();
        let other = scene.create_surface(conn).unwrap();
        scene.create_toplevel(surface).unwrap();
        assert!(matches!(
            scene.create_popup(surface, other, Rect::new(0, 0, 1, 1)),
            Err(SceneError::RoleConflict { .. })
        ));
    }

    #[test]
    fn test_tile_layout_configures() {
        let mut scene = scene_with_output(LayoutMode::Tile);
        let conn = scene.open_connection();
        let (_, first) = mapped_toplevel(&mut scene, conn);
        scene.take_configures();

        let (_, second) = mapped_toplevel(&mut scene, conn);
        let configures = scene.take_configures();
        assert!(configures.contains(&Configure::Toplevel {
            window: first,
            size: (385, 580),
            states: WindowStates::empty(),
        }));
        assert_eq!(scene.windows.get(second).unwrap().position, (405, 10));
    }

    #[test]
    fn test_maximize_and_restore() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        mapped_toplevel(&mut scene, conn);
        let (_, window) = mapped_toplevel(&mut scene, conn);
        scene.take_configures();

        scene.set_maximized(window, true).unwrap();
        assert_eq!(
            scene.take_configures(),
            vec![Configure::Toplevel {
                window,
                size: (800, 600),
                states: WindowStates::MAXIMIZED,
            }]
        );
        assert_eq!(scene.windows.get(window).unwrap().position, (0, 0));

        scene.set_maximized(window, false).unwrap();
        assert_eq!(scene.windows.get(window).unwrap().position, (50, 50));
        assert_eq!(
            scene.take_configures(),
            vec![Configure::Toplevel {
                window,
                size: (0, 0),
                states: WindowStates::empty(),
            }]
        );
    }

    #[test]
    fn test_focus_configures_both_windows() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (_, a) = mapped_toplevel(&mut scene, conn);
        let (_, b) = mapped_toplevel(&mut scene, conn);
        scene.focus(Some(a));
        scene.take_configures();

        scene.focus(Some(b));
        let windows: Vec<WindowId> = scene.take_configures().iter().map(|c| c.window()).collect();
        assert_eq!(windows, vec![a, b]);
    }

    #[test]
    fn test_hit_test_respects_stack_and_input_region() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let conn = scene.open_connection();
        let (bottom, _) = mapped_toplevel(&mut scene, conn);
        let (top, _) = mapped_toplevel(&mut scene, conn);

        // top window spans (50,50)-(150,130)
        assert_eq!(scene.hit_test(60.0, 60.0).map(|h| h.surface), Some(top));
        assert_eq!(scene.hit_test(10.0, 10.0).map(|h| h.surface), Some(bottom));
        assert_eq!(scene.hit_test(60.5, 70.0).unwrap().local, (10.5, 20.0));

        let mut region = Region::new();
        region.add(50, 0, 50, 80);
        scene.set_input_region(top, Some(region)).unwrap();
        scene.commit(top).unwrap();
        assert_eq!(scene.hit_test(60.0, 60.0).map(|h| h.surface), Some(bottom));
        assert_eq!(scene.hit_test(120.0, 60.0).map(|h| h.surface), Some(top));
        assert!(scene.hit_test(700.0, 500.0).is_none());
    }

    #[test]
    fn test_output_fault_and_restore() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let output = scene.outputs.primary().unwrap().id;
        scene.snapshot();

        scene.fault_output(output, "device lost".into()).unwrap();
        assert!(scene.snapshot().outputs[0].faulted);

        scene.restore_output(output).unwrap();
        let snapshot = scene.snapshot();
        assert!(!snapshot.outputs[0].faulted);
        assert_eq!(snapshot.damage.bounds(), Some(Rect::new(0, 0, 800, 600)));
    }

    #[test]
    fn test_resize_output_clears_fault_and_reflows() {
        let mut scene = scene_with_output(LayoutMode::Cascade);
        let output = scene.outputs.primary().unwrap().id;
        let conn = scene.open_connection();
        let (_, window) = mapped_toplevel(&mut scene, conn);
        scene.set_fullscreen(window, true, Some(output)).unwrap();
        scene.fault_output(output, "resized".into()).unwrap();
        scene.take_configures();

        scene
            .resize_output(output, OutputMode::new(1024, 768, 60000), 1.0)
            .unwrap();
        assert!(!scene.outputs.get(output).unwrap().is_faulted());
        assert_eq!(
            scene.take_configures(),
            vec![Configure::Toplevel {
                window,
                size: (1024, 768),
                states: WindowStates::FULLSCREEN,
            }]
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Attach(u8),
        Detach,
        Damage,
        Commit,
        Snapshot,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Attach),
            Just(Op::Detach),
            Just(Op::Damage),
            Just(Op::Commit),
            Just(Op::Snapshot),
        ]
    }

    proptest! {
        #[test]
        fn prop_snapshot_shows_latest_commit(ops in proptest::collection::vec(op(), 1..60), depth in 1usize..4) {
            let mut scene = CompositorState::new(SceneConfig {
                commit_queue_depth: depth,
                ..SceneConfig::default()
            });
            scene.add_output("HOST-1".into(), OutputMode::new(800, 600, 60000), 1.0);
            let conn = scene.open_connection();
            let surface = scene.create_surface(conn).unwrap();
            let window = scene.create_toplevel(surface).unwrap();
            scene.initial_configure(window).unwrap();

            let mut committed: Option<Arc<Buffer>> = None;
            let mut pending: Option<Option<Arc<Buffer>>> = None;
            for op in ops {
                match op {
                    Op::Attach(shade) => {
                        let buffer = solid(&mut scene, conn, 8, 8, 0xff00_0000 | shade as u32);
                        scene.attach(surface, Some(buffer.clone())).unwrap();
                        pending = Some(Some(buffer));
                    }
                    Op::Detach => {
                        scene.attach(surface, None).unwrap();
                        pending = Some(None);
                    }
                    Op::Damage => scene.damage(surface, Rect::new(0, 0, 2, 2)).unwrap(),
                    Op::Commit => {
                        scene.commit(surface).unwrap();
                        if let Some(change) = pending.take() {
                            committed = change;
                        }
                    }
                    Op::Snapshot => {
                        let snapshot = scene.snapshot();
                        let shown = snapshot.surface(surface).map(|s| s.buffer.id);
                        prop_assert_eq!(shown, committed.as_ref().map(|b| b.id));
                    }
                }
            }
        }

        #[test]
        fn prop_close_connection_frees_buffers(surfaces in 1usize..5, commits in 1usize..6, keep_snapshot in any::<bool>()) {
            let mut scene = scene_with_output(LayoutMode::Cascade);
            let conn = scene.open_connection();
            let other = scene.open_connection();
            let (_, _) = mapped_toplevel(&mut scene, other);

            for _ in 0..surfaces {
                let surface = scene.create_surface(conn).unwrap();
                let window = scene.create_toplevel(surface).unwrap();
                scene.initial_configure(window).unwrap();
                for _ in 0..commits {
                    let buffer = solid(&mut scene, conn, 4, 4, 0xffff_ffff);
                    scene.attach(surface, Some(buffer)).unwrap();
                    scene.commit(surface).unwrap();
                }
            }
            let snapshot = scene.snapshot();
            if !keep_snapshot {
                drop(snapshot);
                scene.close_connection(conn);
                prop_assert_eq!(scene.buffers().live_for(conn), 0);
            } else {
                scene.close_connection(conn);
                drop(snapshot);
                prop_assert_eq!(scene.buffers().live_for(conn), 0);
            }
            prop_assert_eq!(scene.buffers().live_for(other), 1);
            prop_assert!(scene.connections.get(conn).is_none());
        }
    }
}
