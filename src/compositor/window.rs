//! Window management
//!
//! Windows are xdg toplevels and popups. The manager keeps them in a single
//! stacking order (bottom to top) and tracks which one holds focus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::compositor::{ConnectionId, Rect, SurfaceId};

/// Unique identifier for windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl WindowId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        WindowId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

bitflags! {
    /// Toplevel states advertised to the client
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowStates: u32 {
        const MAXIMIZED = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const RESIZING = 1 << 2;
        const ACTIVATED = 1 << 3;
    }
}

/// What kind of xdg surface backs the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Toplevel,
    /// Placed relative to the parent's window geometry
    Popup { parent: SurfaceId, geometry: Rect },
}

/// A toplevel or popup window
#[derive(Debug)]
pub struct Window {
    pub id: WindowId,
    pub surface_id: SurfaceId,
    pub owner: ConnectionId,
    pub kind: WindowKind,
    pub title: Option<String>,
    pub app_id: Option<String>,
    /// Global position of the window geometry origin (toplevels only)
    pub position: (i32, i32),
    /// Window geometry in surface coordinates, as set by the client
    pub geometry: Option<Rect>,
    /// Minimum size (0 = no minimum)
    pub min_size: (i32, i32),
    /// Maximum size (0 = no maximum)
    pub max_size: (i32, i32),
    pub states: WindowStates,
    /// Size the compositor last asked for; None lets the client choose
    pub requested_size: Option<(i32, i32)>,
    /// Position to return to when leaving maximized or fullscreen
    pub restore_position: Option<(i32, i32)>,
    /// Has been shown with a buffer at least once since the last unmap
    pub mapped: bool,
    /// The initial configure went out, so later changes may be sent
    pub configured: bool,
}

impl Window {
    fn new(surface_id: SurfaceId, owner: ConnectionId, kind: WindowKind) -> Self {
        Self {
            id: WindowId::new(),
            surface_id,
            owner,
            kind,
            title: None,
            app_id: None,
            position: (0, 0),
            geometry: None,
            min_size: (0, 0),
            max_size: (0, 0),
            states: WindowStates::empty(),
            requested_size: None,
            restore_position: None,
            mapped: false,
            configured: false,
        }
    }

    pub fn is_toplevel(&self) -> bool {
        self.kind == WindowKind::Toplevel
    }

    /// Offset of the window geometry inside the surface
    pub fn geometry_offset(&self) -> (i32, i32) {
        self.geometry.map(|g| (g.x, g.y)).unwrap_or((0, 0))
    }

    /// Clamp a requested size to the client's min/max hints
    pub fn constrain_size(&self, (w, h): (i32, i32)) -> (i32, i32) {
        let mut w = w.max(self.min_size.0);
        let mut h = h.max(self.min_size.1);
        if self.max_size.0 > 0 {
            w = w.min(self.max_size.0);
        }
        if self.max_size.1 > 0 {
            h = h.min(self.max_size.1);
        }
        (w, h)
    }
}

/// Manager for all windows
#[derive(Debug, Default)]
pub struct WindowManager {
    windows: HashMap<WindowId, Window>,
    /// Map from surface ID to window ID
    surface_to_window: HashMap<SurfaceId, WindowId>,
    /// Stacking order, bottom first
    stack: Vec<WindowId>,
    /// Currently focused toplevel
    focused_window: Option<WindowId>,
}

impl WindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a toplevel window for a surface, on top of the stack
    pub fn create_toplevel(&mut self, surface_id: SurfaceId, owner: ConnectionId) -> WindowId {
        self.insert(Window::new(surface_id, owner, WindowKind::Toplevel))
    }

    /// Create a popup window placed relative to `parent`
    pub fn create_popup(
        &mut self,
        surface_id: SurfaceId,
        owner: ConnectionId,
        parent: SurfaceId,
        geometry: Rect,
    ) -> WindowId {
        self.insert(Window::new(
            surface_id,
            owner,
            WindowKind::Popup { parent, geometry },
        ))
    }

    fn insert(&mut self, window: Window) -> WindowId {
        let id = window.id;
        self.surface_to_window.insert(window.surface_id, id);
        self.windows.insert(id, window);
        self.stack.push(id);
        id
    }

    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    pub fn get_by_surface(&self, surface_id: SurfaceId) -> Option<&Window> {
        self.surface_to_window
            .get(&surface_id)
            .and_then(|id| self.windows.get(id))
    }

    pub fn window_for_surface(&self, surface_id: SurfaceId) -> Option<WindowId> {
        self.surface_to_window.get(&surface_id).copied()
    }

    /// Remove a window
    pub fn remove(&mut self, id: WindowId) -> Option<Window> {
        let window = self.windows.remove(&id)?;
        self.surface_to_window.remove(&window.surface_id);
        self.stack.retain(|w| *w != id);
        if self.focused_window == Some(id) {
            self.focused_window = None;
        }
        Some(window)
    }

    /// Popups whose parent is `surface`
    pub fn children_of(&self, surface: SurfaceId) -> Vec<WindowId> {
        self.stack
            .iter()
            .copied()
            .filter(|id| {
                matches!(
                    self.windows.get(id).map(|w| w.kind),
                    Some(WindowKind::Popup { parent, .. }) if parent == surface
                )
            })
            .collect()
    }

    /// Move a window and its popups to the top of the stack
    pub fn raise(&mut self, id: WindowId) {
        if !self.windows.contains_key(&id) {
            return;
        }
        let mut lifted = vec![id];
        let mut i = 0;
        while i < lifted.len() {
            if let Some(surface) = self.windows.get(&lifted[i]).map(|w| w.surface_id) {
                for child in self.children_of(surface) {
                    if !lifted.contains(&child) {
                        lifted.push(child);
                    }
                }
            }
            i += 1;
        }
        self.stack.retain(|w| !lifted.contains(w));
        self.stack.extend(lifted);
    }

    /// Windows in stacking order, bottom first
    pub fn stack(&self) -> &[WindowId] {
        &self.stack
    }

    /// Global position of the window geometry origin
    ///
    /// Popups are resolved through their parent chain.
    pub fn position_of(&self, id: WindowId) -> Option<(i32, i32)> {
        let mut current = self.windows.get(&id)?;
        let (mut dx, mut dy) = (0, 0);
        for _ in 0..32 {
            match current.kind {
                WindowKind::Toplevel => {
                    return Some((current.position.0 + dx, current.position.1 + dy));
                }
                WindowKind::Popup { parent, geometry } => {
                    dx += geometry.x;
                    dy += geometry.y;
                    current = self.get_by_surface(parent)?;
                }
            }
        }
        None
    }

    /// Global position of the window's surface origin
    pub fn surface_origin(&self, id: WindowId) -> Option<(i32, i32)> {
        let (x, y) = self.position_of(id)?;
        let (gx, gy) = self.windows.get(&id)?.geometry_offset();
        Some((x - gx, y - gy))
    }

    /// Change focus, returning windows whose activated state flipped
    pub fn set_focused(&mut self, id: Option<WindowId>) -> Vec<WindowId> {
        if self.focused_window == id {
            return Vec::new();
        }
        let mut changed = Vec::new();
        if let Some(prev_id) = self.focused_window {
            if let Some(window) = self.windows.get_mut(&prev_id) {
                window.states.remove(WindowStates::ACTIVATED);
                changed.push(prev_id);
            }
        }

        self.focused_window = id.filter(|id| self.windows.contains_key(id));

        if let Some(new_id) = self.focused_window {
            if let Some(window) = self.windows.get_mut(&new_id) {
                window.states.insert(WindowStates::ACTIVATED);
                changed.push(new_id);
            }
        }
        changed
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focused_window
    }

    /// Mapped toplevels in stacking order
    pub fn mapped_toplevels(&self) -> Vec<WindowId> {
        self.stack
            .iter()
            .copied()
            .filter(|id| {
                self.windows
                    .get(id)
                    .is_some_and(|w| w.is_toplevel() && w.mapped)
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WindowId, &Window)> {
        self.windows.iter()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
