//! xdg_shell bookkeeping
//!
//! Positioner math, configure/ack tracking and the validation rules the
//! server enforces for xdg_wm_base, xdg_surface, xdg_toplevel and
//! xdg_popup. Nothing here touches a socket.

use bitflags::bitflags;

use crate::compositor::{Rect, WindowStates};

/// XDG shell errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum XdgShellError {
    #[error("surface already has a non-xdg role")]
    Role,
    #[error("xdg_surface already has a role object")]
    AlreadyConstructed,
    #[error("xdg_surface has no role object yet")]
    NotConstructed,
    #[error("configure serial {0} was never sent")]
    InvalidSerial(u32),
    #[error("invalid window geometry {width}x{height}")]
    InvalidSize { width: i32, height: i32 },
    #[error("buffer committed before the first configure was acked")]
    UnconfiguredBuffer,
    #[error("invalid positioner input")]
    InvalidInput,
    #[error("positioner is missing a size or anchor rectangle")]
    InvalidPositioner,
    #[error("xdg_wm_base destroyed while surfaces remain")]
    DefunctSurfaces,
}

/// Validate xdg_surface.set_window_geometry arguments
pub fn window_geometry(x: i32, y: i32, width: i32, height: i32) -> Result<Rect, XdgShellError> {
    if width <= 0 || height <= 0 {
        return Err(XdgShellError::InvalidSize { width, height });
    }
    Ok(Rect::new(x, y, width, height))
}

/// Encode toplevel states as the xdg_toplevel.configure array
pub fn encode_states(states: WindowStates) -> Vec<u8> {
    const TABLE: [(WindowStates, u32); 4] = [
        (WindowStates::MAXIMIZED, 1),
        (WindowStates::FULLSCREEN, 2),
        (WindowStates::RESIZING, 3),
        (WindowStates::ACTIVATED, 4),
    ];
    TABLE
        .iter()
        .filter(|(flag, _)| states.contains(*flag))
        .flat_map(|(_, value)| value.to_ne_bytes())
        .collect()
}

/// Configure serials sent to one xdg_surface and the latest ack
#[derive(Debug, Default)]
pub struct ConfigureTracker {
    sent: Vec<u32>,
    acked: Option<u32>,
}

impl ConfigureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&mut self, serial: u32) {
        self.sent.push(serial);
    }

    /// Acknowledge a configure; older unacked serials are dropped with it
    pub fn ack(&mut self, serial: u32) -> Result<(), XdgShellError> {
        let index = self
            .sent
            .iter()
            .position(|s| *s == serial)
            .ok_or(XdgShellError::InvalidSerial(serial))?;
        self.sent.drain(..=index);
        self.acked = Some(serial);
        Ok(())
    }

    /// A configure has been sent, acked or not
    pub fn has_sent(&self) -> bool {
        !self.sent.is_empty() || self.acked.is_some()
    }

    /// The client acked at least one configure
    pub fn is_configured(&self) -> bool {
        self.acked.is_some()
    }
}

/// Tracks the periodic xdg_wm_base.ping for one client
#[derive(Debug, Default)]
pub struct PingTracker {
    outstanding: Option<u32>,
    missed: u32,
}

impl PingTracker {
    /// Start a new ping, returning how many intervals in a row went unanswered
    pub fn ping(&mut self, serial: u32) -> u32 {
        if self.outstanding.replace(serial).is_some() {
            self.missed += 1;
        } else {
            self.missed = 0;
        }
        self.missed
    }

    /// Returns false for a serial that was never sent
    pub fn pong(&mut self, serial: u32) -> bool {
        if self.outstanding == Some(serial) {
            self.outstanding = None;
            self.missed = 0;
            true
        } else {
            false
        }
    }
}

/// Anchor edge for popup positioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Anchor {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Gravity for popup positioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Gravity {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

macro_rules! edge_enum_impl {
    ($ty:ident) => {
        impl $ty {
            /// Parse the protocol value
            pub fn from_raw(value: u32) -> Option<Self> {
                Some(match value {
                    0 => $ty::None,
                    1 => $ty::Top,
                    2 => $ty::Bottom,
                    3 => $ty::Left,
                    4 => $ty::Right,
                    5 => $ty::TopLeft,
                    6 => $ty::BottomLeft,
                    7 => $ty::TopRight,
                    8 => $ty::BottomRight,
                    _ => return None,
                })
            }

            fn flip_x(self) -> Self {
                match self {
                    $ty::Left => $ty::Right,
                    $ty::Right => $ty::Left,
                    $ty::TopLeft => $ty::TopRight,
                    $ty::TopRight => $ty::TopLeft,
                    $ty::BottomLeft => $ty::BottomRight,
                    $ty::BottomRight => $ty::BottomLeft,
                    other => other,
                }
            }

            fn flip_y(self) -> Self {
                match self {
                    $ty::Top => $ty::Bottom,
                    $ty::Bottom => $ty::Top,
                    $ty::TopLeft => $ty::BottomLeft,
                    $ty::BottomLeft => $ty::TopLeft,
                    $ty::TopRight => $ty::BottomRight,
                    $ty::BottomRight => $ty::TopRight,
                    other => other,
                }
            }

            /// -1, 0 or 1 along each axis
            fn direction(self) -> (i32, i32) {
                match self {
                    $ty::None => (0, 0),
                    $ty::Top => (0, -1),
                    $ty::Bottom => (0, 1),
                    $ty::Left => (-1, 0),
                    $ty::Right => (1, 0),
                    $ty::TopLeft => (-1, -1),
                    $ty::TopRight => (1, -1),
                    $ty::BottomLeft => (-1, 1),
                    $ty::BottomRight => (1, 1),
                }
            }
        }
    };
}

edge_enum_impl!(Anchor);
edge_enum_impl!(Gravity);

bitflags! {
    /// xdg_positioner.constraint_adjustment
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConstraintAdjustment: u32 {
        const SLIDE_X = 1;
        const SLIDE_Y = 2;
        const FLIP_X = 4;
        const FLIP_Y = 8;
        const RESIZE_X = 16;
        const RESIZE_Y = 32;
    }
}

/// XDG positioner for popup placement
#[derive(Debug, Clone, Default)]
pub struct XdgPositioner {
    size: Option<(i32, i32)>,
    /// Anchor rectangle in parent window-geometry coordinates
    anchor_rect: Option<Rect>,
    pub anchor: Anchor,
    pub gravity: Gravity,
    pub constraint_adjustment: ConstraintAdjustment,
    pub offset: (i32, i32),
}

impl XdgPositioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_size(&mut self, width: i32, height: i32) -> Result<(), XdgShellError> {
        if width <= 0 || height <= 0 {
            return Err(XdgShellError::InvalidInput);
        }
        self.size = Some((width, height));
        Ok(())
    }

    pub fn set_anchor_rect(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<(), XdgShellError> {
        if width < 0 || height < 0 {
            return Err(XdgShellError::InvalidInput);
        }
        self.anchor_rect = Some(Rect::new(x, y, width, height));
        Ok(())
    }

    pub fn set_anchor(&mut self, anchor: Anchor) {
        self.anchor = anchor;
    }

    pub fn set_gravity(&mut self, gravity: Gravity) {
        self.gravity = gravity;
    }

    pub fn set_constraint_adjustment(&mut self, adjustment: u32) {
        self.constraint_adjustment = ConstraintAdjustment::from_bits_truncate(adjustment);
    }

    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.offset = (x, y);
    }

    pub fn is_complete(&self) -> bool {
        self.size.is_some() && self.anchor_rect.is_some()
    }

    /// Unconstrained popup geometry relative to the parent
    pub fn geometry(&self) -> Result<Rect, XdgShellError> {
        self.place(self.anchor, self.gravity)
    }

    fn place(&self, anchor: Anchor, gravity: Gravity) -> Result<Rect, XdgShellError> {
        let (Some((w, h)), Some(rect)) = (self.size, self.anchor_rect) else {
            return Err(XdgShellError::InvalidPositioner);
        };

        let (ax, ay) = anchor.direction();
        let anchor_x = rect.x + rect.width * (ax + 1) / 2;
        let anchor_y = rect.y + rect.height * (ay + 1) / 2;

        // gravity says which way the popup extends from the anchor point
        let (gx, gy) = gravity.direction();
        let x = anchor_x - w * (1 - gx) / 2;
        let y = anchor_y - h * (1 - gy) / 2;

        Ok(Rect::new(x + self.offset.0, y + self.offset.1, w, h))
    }

    /// Popup geometry adjusted to stay inside `bounds`
    ///
    /// `bounds` is in the same coordinate space as the anchor rectangle.
    /// Flip is tried first, then slide, then resize, per axis.
    pub fn constrained_geometry(&self, bounds: Rect) -> Result<Rect, XdgShellError> {
        let mut geometry = self.geometry()?;
        let adjust = self.constraint_adjustment;

        if !fits_x(&geometry, &bounds) {
            if adjust.contains(ConstraintAdjustment::FLIP_X) {
                let flipped = self.place(self.anchor.flip_x(), self.gravity.flip_x())?;
                if fits_x(&flipped, &bounds) {
                    geometry.x = flipped.x;
                }
            }
            if !fits_x(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::SLIDE_X) {
                geometry.x = slide(geometry.x, geometry.width, bounds.x, bounds.width);
            }
            if !fits_x(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::RESIZE_X) {
                let left = geometry.x.max(bounds.x);
                let right = geometry.right().min(bounds.right());
                if right > left {
                    geometry.x = left;
                    geometry.width = right - left;
                }
            }
        }

        if !fits_y(&geometry, &bounds) {
            if adjust.contains(ConstraintAdjustment::FLIP_Y) {
                let flipped = self.place(self.anchor.flip_y(), self.gravity.flip_y())?;
                if fits_y(&flipped, &bounds) {
                    geometry.y = flipped.y;
                }
            }
            if !fits_y(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::SLIDE_Y) {
                geometry.y = slide(geometry.y, geometry.height, bounds.y, bounds.height);
            }
            if !fits_y(&geometry, &bounds) && adjust.contains(ConstraintAdjustment::RESIZE_Y) {
                let top = geometry.y.max(bounds.y);
                let bottom = geometry.bottom().min(bounds.bottom());
                if bottom > top {
                    geometry.y = top;
                    geometry.height = bottom - top;
                }
            }
        }

        Ok(geometry)
    }
}

fn fits_x(rect: &Rect, bounds: &Rect) -> bool {
    rect.x >= bounds.x && rect.right() <= bounds.right()
}

fn fits_y(rect: &Rect, bounds: &Rect) -> bool {
    rect.y >= bounds.y && rect.bottom() <= bounds.bottom()
}

/// Move a span into `[start, start + len)`, keeping its leading edge visible
fn slide(pos: i32, size: i32, start: i32, len: i32) -> i32 {
    let pos = pos.min(start + len - size);
    pos.max(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positioner(anchor: Anchor, gravity: Gravity) -> XdgPositioner {
        let mut positioner = XdgPositioner::new();
        positioner.set_size(200, 100).unwrap();
        positioner.set_anchor_rect(0, 0, 100, 50).unwrap();
        positioner.set_anchor(anchor);
        positioner.set_gravity(gravity);
        positioner
    }

    #[test]
    fn test_positioner() {
        let geometry = positioner(Anchor::BottomRight, Gravity::BottomRight)
            .geometry()
            .unwrap();
        assert_eq!(geometry, Rect::new(100, 50, 200, 100));

        let geometry = positioner(Anchor::None, Gravity::None).geometry().unwrap();
        assert_eq!(geometry, Rect::new(-50, -25, 200, 100));

        let geometry = positioner(Anchor::TopLeft, Gravity::TopLeft).geometry().unwrap();
        assert_eq!(geometry, Rect::new(-200, -100, 200, 100));
    }

    #[test]
    fn test_positioner_offset() {
        let mut p = positioner(Anchor::Bottom, Gravity::Bottom);
        p.set_offset(5, -3);
        assert_eq!(p.geometry().unwrap(), Rect::new(-45, 47, 200, 100));
    }

    #[test]
    fn test_incomplete_positioner() {
        let mut p = XdgPositioner::new();
        assert_eq!(p.geometry(), Err(XdgShellError::InvalidPositioner));
        assert_eq!(p.set_size(0, 10), Err(XdgShellError::InvalidInput));
        assert_eq!(p.set_anchor_rect(0, 0, -1, 1), Err(XdgShellError::InvalidInput));
        p.set_size(10, 10).unwrap();
        assert!(!p.is_complete());
    }

    #[test]
    fn test_flip_then_slide() {
        let mut p = positioner(Anchor::BottomRight, Gravity::BottomRight);
        p.set_constraint_adjustment((ConstraintAdjustment::FLIP_X | ConstraintAdjustment::SLIDE_Y).bits());
        // 250 wide: the popup overflows on the right, flipping puts it at -200
        let bounds = Rect::new(-300, 0, 550, 120);
        let geometry = p.constrained_geometry(bounds).unwrap();
        assert_eq!(geometry.x, -200);
        assert_eq!(geometry.y, 20);
    }

    #[test]
    fn test_resize_when_nothing_else_fits() {
        let mut p = positioner(Anchor::BottomRight, Gravity::BottomRight);
        p.set_constraint_adjustment(ConstraintAdjustment::RESIZE_X.bits());
        let geometry = p.constrained_geometry(Rect::new(0, 0, 250, 400)).unwrap();
        assert_eq!(geometry, Rect::new(100, 50, 150, 100));
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(Anchor::from_raw(6), Some(Anchor::BottomLeft));
        assert_eq!(Gravity::from_raw(7), Some(Gravity::TopRight));
        assert_eq!(Anchor::from_raw(9), None);
    }

    #[test]
    fn test_configure_tracker() {
        let mut tracker = ConfigureTracker::new();
        assert!(!tracker.has_sent());
        tracker.sent(5);
        tracker.sent(9);
        assert_eq!(tracker.ack(7), Err(XdgShellError::InvalidSerial(7)));
        assert!(!tracker.is_configured());
        tracker.ack(9).unwrap();
        assert!(tracker.is_configured());
        // 5 was superseded by the ack of 9
        assert_eq!(tracker.ack(5), Err(XdgShellError::InvalidSerial(5)));
    }

    #[test]
    fn test_ping_tracker() {
        let mut ping = PingTracker::default();
        assert_eq!(ping.ping(1), 0);
        assert_eq!(ping.ping(2), 1);
        assert!(!ping.pong(1));
        assert!(ping.pong(2));
        assert_eq!(ping.ping(3), 0);
    }

    #[test]
    fn test_encode_states() {
        let bytes = encode_states(WindowStates::MAXIMIZED | WindowStates::ACTIVATED);
        let mut expected = 1u32.to_ne_bytes().to_vec();
        expected.extend_from_slice(&4u32.to_ne_bytes());
        assert_eq!(bytes, expected);
        assert!(encode_states(WindowStates::empty()).is_empty());
    }

    #[test]
    fn test_window_geometry() {
        assert_eq!(
            window_geometry(0, 0, 0, 5),
            Err(XdgShellError::InvalidSize {
                width: 0,
                height: 5
            })
        );
        assert_eq!(window_geometry(1, 2, 3, 4), Ok(Rect::new(1, 2, 3, 4)));
    }
}
