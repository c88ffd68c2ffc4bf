//! Rectangles and per-type geometry constraints.
//!
//! All coordinates are in root-window space unless stated otherwise.  A
//! screen's back-buffer is addressed in *screen-relative* space, which is
//! what [`Rect::relative_to`] produces.

use crate::registry::WindowType;
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, (right - x) as u32, (bottom - y) as u32)
    }

    /// The same rectangle expressed relative to `origin`'s top-left corner.
    pub fn relative_to(&self, origin: &Rect) -> Rect {
        Rect::new(self.x - origin.x, self.y - origin.y, self.width, self.height)
    }

    /// The rectangle at `(0, 0)` with this rectangle's size.
    pub fn at_origin(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Resolve the geometry a managed window is allowed to occupy on `screen`.
///
/// * `Normal` windows always fill the whole screen.
/// * `Desktop` windows fill the screen except for a `desktop_strip` pixel
///   high band at the bottom, where the desktop list is drawn.
/// * Everything else keeps its requested geometry, clamped into the screen.
///
/// Returns `None` when the result equals `requested`, so callers only issue
/// a configure when something actually changed.
pub fn constrain(
    window_type: WindowType,
    screen: &Rect,
    desktop_strip: u32,
    requested: &Rect,
) -> Option<Rect> {
    let resolved = match window_type {
        WindowType::Normal => *screen,
        WindowType::Desktop => Rect::new(
            screen.x,
            screen.y,
            screen.width,
            screen.height.saturating_sub(desktop_strip),
        ),
        WindowType::Dialog
        | WindowType::Dock
        | WindowType::Internal
        | WindowType::Unknown => {
            let mut r = *requested;
            if r.x < screen.x {
                r.x = screen.x;
            }
            if r.y < screen.y {
                r.y = screen.y;
            }
            if r.right() > screen.right() {
                r.width = (screen.right() - r.x).max(0) as u32;
            }
            if r.bottom() > screen.bottom() {
                r.height = (screen.bottom() - r.y).max(0) as u32;
            }
            r
        }
    };

    (resolved != *requested).then_some(resolved)
}
