//! Damage-driven repaint into the per-screen back-buffers.
//!
//! Paint runs once per loop turn after the event queue is drained.  The
//! registry is walked in creation order (back to front) starting at the
//! first dirty window, so everything stacked above a changed window is
//! redrawn on top of it.  Each touched screen then gets its back-buffer
//! copied to the front picture, and dirty state is only cleared once the
//! display accepted the flush.

use crate::display::{Blend, Composite, DisplayConnection, DisplayError, PictureId};
use crate::geometry::Rect;
use crate::registry::{ClientWindow, ScreenId, WindowFlags, WindowId, WindowRegistry, WindowType};
use crate::slots::Screen;
use log::{debug, trace};
use std::time::{Duration, Instant};

/// What a paint pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PaintReport {
    /// Windows composited into a back-buffer.
    pub composited: usize,
    /// Screens whose back-buffer was flushed.
    pub flushed: Vec<ScreenId>,
}

/// Paint settings.
#[derive(Debug, Clone, Copy)]
pub struct PaintScheduler {
    /// Opacity of override-redirect windows.
    pub osd_opacity: f32,
    /// Menu redraw interval.
    pub menu_refresh: Duration,
}

impl PaintScheduler {
    pub fn new(osd_opacity: f32, menu_refresh: Duration) -> Self {
        Self {
            osd_opacity: osd_opacity.clamp(0.0, 1.0),
            menu_refresh,
        }
    }

    /// Repaint everything that changed since the last successful pass.
    ///
    /// `desktop_list` names the screen whose desktop-list popup is
    /// visible, if any.
    pub fn paint<D: DisplayConnection>(
        &self,
        display: &mut D,
        registry: &mut WindowRegistry,
        screens: &mut [Screen],
        desktop_list: Option<ScreenId>,
        now: Instant,
    ) -> Result<PaintReport, DisplayError> {
        // A hosting screen that must be redrawn as a whole repaints every
        // window on it.
        let mut full: Vec<bool> = screens
            .iter()
            .map(|s| s.invalidated || s.active_slot().dirty)
            .collect();
        for screen in screens.iter() {
            if screen.active_slot().is_menu() {
                continue;
            }
            if full[screen.id.0] {
                for id in registry.ids() {
                    if let Some(w) = registry.get_mut(id) {
                        if w.screen == Some(screen.id) && w.is_mapped() {
                            w.flags |= WindowFlags::DIRTY;
                        }
                    }
                }
            }
        }

        let mut touched = vec![false; screens.len()];
        let mut painted: Vec<WindowId> = Vec::new();
        let order = registry.ids();
        let start = order
            .iter()
            .position(|id| {
                registry
                    .get(*id)
                    .is_some_and(|w| w.is_dirty() && needs_paint(w, screens))
            })
            .unwrap_or(order.len());
        // Hidden windows keep nothing to show; their damage is dropped.
        let hidden: Vec<WindowId> = order
            .iter()
            .copied()
            .filter(|id| {
                registry
                    .get(*id)
                    .is_some_and(|w| w.is_dirty() && !needs_paint(w, screens))
            })
            .collect();

        for id in &order[start..] {
            let Some(w) = registry.get(*id) else {
                continue;
            };
            if w.window_type == WindowType::Internal {
                continue;
            }
            let Some(composition) = w.composition else {
                continue;
            };

            let on_menu = w
                .screen
                .and_then(|s| screens.get(s.0))
                .is_some_and(|s| s.active_slot().is_menu());
            if on_menu {
                if let Some(s) = w.screen {
                    full[s.0] = true;
                }
                painted.push(*id);
                continue;
            }
            if !w.is_mapped() {
                continue;
            }

            if w.is_unmanaged() {
                for screen in screens.iter() {
                    display.composite(&Composite {
                        src: composition.picture,
                        dst: screen.surface.back,
                        blend: Blend::Over {
                            opacity: self.osd_opacity,
                        },
                        src_x: 0,
                        src_y: 0,
                        dst_area: w.position.relative_to(&screen.area),
                    })?;
                    touched[screen.id.0] = true;
                }
            } else if let Some(screen) = w.screen.and_then(|s| screens.get(s.0)) {
                display.composite(&Composite {
                    src: composition.picture,
                    dst: screen.surface.back,
                    blend: Blend::Source,
                    src_x: 0,
                    src_y: 0,
                    dst_area: w.position.relative_to(&screen.area),
                })?;
                touched[screen.id.0] = true;
            } else {
                continue;
            }
            trace!("composited 0x{:08x}", w.native);
            painted.push(*id);
        }

        let mut report = PaintReport {
            composited: painted.len(),
            flushed: Vec::new(),
        };
        let mut refreshed = Vec::new();

        for screen in screens.iter() {
            let i = screen.id.0;
            let view = screen.switcher_view();
            let back = screen.surface.back;
            let menu = screen.active_slot().is_menu();

            let mut region: Option<Rect> = None;
            if full[i] || touched[i] {
                region = Some(screen.area.at_origin());
            }
            if menu && (full[i] || screen.exposed.is_some()) {
                display.draw_menu(back, &view)?;
                refreshed.push(i);
            }
            if !menu && desktop_list == Some(screen.id) {
                display.draw_desktop_list(back, &view)?;
                region = Some(screen.area.at_origin());
            }
            if region.is_none() {
                region = screen.exposed;
            }

            if let Some(area) = region {
                flush_region(display, back, screen.surface.front, area)?;
                report.flushed.push(screen.id);
            }
        }

        display.flush()?;

        for id in painted.iter().chain(&hidden) {
            if let Some(w) = registry.get_mut(*id) {
                w.flags.remove(WindowFlags::DIRTY);
            }
        }
        for screen in screens.iter_mut() {
            screen.invalidated = false;
            screen.exposed = None;
            for slot in &mut screen.slots {
                slot.dirty = false;
            }
        }
        for i in refreshed {
            screens[i].active_slot_mut().next_refresh = Some(now + self.menu_refresh);
        }

        if report.composited > 0 || !report.flushed.is_empty() {
            debug!(
                "painted {} window(s), flushed {} screen(s)",
                report.composited,
                report.flushed.len()
            );
        }
        Ok(report)
    }
}

/// Whether `w` contributes anything to a paint pass.
fn needs_paint(w: &ClientWindow, screens: &[Screen]) -> bool {
    if w.window_type == WindowType::Internal || w.composition.is_none() {
        return false;
    }
    let screen = w.screen.and_then(|s| screens.get(s.0));
    if screen.is_some_and(|s| s.active_slot().is_menu()) {
        return true;
    }
    w.is_mapped() && (w.is_unmanaged() || screen.is_some())
}

/// Copy `area` of the back-buffer to the same place in the front picture.
fn flush_region<D: DisplayConnection>(
    display: &mut D,
    back: PictureId,
    front: PictureId,
    area: Rect,
) -> Result<(), DisplayError> {
    display.composite(&Composite {
        src: back,
        dst: front,
        blend: Blend::Source,
        src_x: area.x,
        src_y: area.y,
        dst_area: area,
    })
}

/// Invalidate every screen whose active slot shows the menu.
pub fn invalidate_menus(screens: &mut [Screen]) {
    for screen in screens.iter_mut() {
        if screen.active_slot().is_menu() {
            screen.invalidate();
        }
    }
}

/// Earliest menu redraw deadline across all screens.
pub fn next_deadline(screens: &[Screen]) -> Option<Instant> {
    screens
        .iter()
        .filter(|s| s.active_slot().is_menu())
        .filter_map(|s| s.active_slot().next_refresh)
        .min()
}

/// Invalidate menu screens whose redraw deadline has passed.  Returns
/// whether anything was invalidated.
pub fn expire_deadlines(screens: &mut [Screen], now: Instant) -> bool {
    let mut any = false;
    for screen in screens.iter_mut() {
        let slot = screen.active_slot();
        if slot.is_menu() && slot.next_refresh.is_some_and(|t| t <= now) {
            screen.active_slot_mut().next_refresh = None;
            screen.invalidate();
            any = true;
        }
    }
    any
}
