//! Which windows are shown, and which one has the keyboard.
//!
//! A focus pass has two halves.  [`plan`] is pure: it reads the registry
//! and derives the set of windows a screen should show for one of its
//! slots.  [`realize`] applies that plan, mapping the new set first and
//! only marking the rest as `WANTS_UNMAPPED`; [`unmap_stale`] hides them
//! afterwards, so a switch never shows an empty screen in between.

use crate::display::{DisplayConnection, DisplayError, NativeId, Time};
use crate::registry::{WindowFlags, WindowId, WindowRegistry, WindowType};
use crate::slots::{Screen, SlotMode};
use log::debug;

/// The outcome of [`plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusPlan {
    /// Windows to show, bottom to top.
    pub map: Vec<WindowId>,
    /// Window that receives input focus.
    pub focus: NativeId,
}

/// Windows that turned out to be gone while a plan was applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Vanished(pub Vec<NativeId>);

/// The window that owns `slot`: its first non-transient `Normal` window,
/// or failing that the first non-transient, non-dock window on it.
pub fn primary_window(registry: &WindowRegistry, screen: &Screen, slot: usize) -> Option<WindowId> {
    let target = screen.slot_ref(slot);
    let on_slot = || {
        registry
            .iter()
            .filter(move |(_, w)| w.desktop == Some(target) && w.transient_for.is_none())
    };
    on_slot()
        .find(|(_, w)| w.window_type == WindowType::Normal)
        .or_else(|| on_slot().find(|(_, w)| w.window_type != WindowType::Dock))
        .map(|(id, _)| id)
}

/// Derive the mapped set of `screen` with `slot` active.
///
/// * Menu: the screen's background surface and its first desktop window.
/// * Hosting: the primary window, then in creation order every other
///   window of the slot whose transient chain does not end at some other
///   top-level window (transients of the primary, orphans, dangling chains).
/// * Always: the screen's docks.
///
/// Focus goes to the primary window, else to the screen surface.
pub fn plan(registry: &WindowRegistry, screen: &Screen, slot: usize) -> FocusPlan {
    let mut map = Vec::new();
    let mut focus = screen.surface.window;

    match screen.slots[slot].mode {
        SlotMode::Menu => {
            map.extend(screen.background);
            let desktop = registry.iter().find(|(_, w)| {
                w.screen == Some(screen.id) && w.window_type == WindowType::Desktop
            });
            map.extend(desktop.map(|(id, _)| id));
        }
        SlotMode::Hosting => {
            let target = screen.slot_ref(slot);
            if let Some(primary) = primary_window(registry, screen, slot) {
                if let Some(w) = registry.get(primary) {
                    focus = w.native;
                }
                map.push(primary);
                for (id, w) in registry.iter() {
                    if id == primary || w.desktop != Some(target) || w.window_type == WindowType::Dock
                    {
                        continue;
                    }
                    let belongs = match registry.transient_root(id) {
                        None => true,
                        Some(root) if root == primary || root == id => true,
                        Some(_) => false,
                    };
                    if belongs {
                        map.push(id);
                    }
                }
            }
        }
    }

    for (id, w) in registry.iter() {
        if w.window_type == WindowType::Dock
            && !w.is_unmanaged()
            && w.screen.map_or(true, |s| s == screen.id)
            && !map.contains(&id)
        {
            map.push(id);
        }
    }

    FocusPlan { map, focus }
}

/// Apply `plan` to `screen`: show the planned windows and mark every other
/// shown window of the screen `WANTS_UNMAPPED`.
///
/// Focus is only moved when `focus_time` is given, i.e. when the screen is
/// the current one.
pub fn realize<D: DisplayConnection>(
    display: &mut D,
    registry: &mut WindowRegistry,
    screen: &Screen,
    plan: &FocusPlan,
    focus_time: Option<Time>,
) -> Result<Vanished, DisplayError> {
    let mut vanished = Vanished::default();

    for id in registry.ids() {
        if let Some(w) = registry.get_mut(id) {
            if w.is_mapped() && !w.is_unmanaged() && w.screen == Some(screen.id) {
                w.flags |= WindowFlags::WANTS_UNMAPPED;
            }
        }
    }

    for id in &plan.map {
        let Some(w) = registry.get_mut(*id) else {
            continue;
        };
        match display.map_window(w.native, &w.target) {
            Ok(()) => {
                if !w.is_mapped() {
                    w.flags |= WindowFlags::DIRTY;
                }
                w.flags.remove(WindowFlags::WANTS_UNMAPPED);
                w.flags.insert(WindowFlags::MAPPED);
            }
            Err(DisplayError::BadWindow(native)) => vanished.0.push(native),
            Err(e) => return Err(e),
        }
    }

    if let Some(time) = focus_time {
        debug!("screen {}: focus 0x{:08x}", screen.id.0, plan.focus);
        match display.set_input_focus(plan.focus, time) {
            Ok(()) => {}
            Err(DisplayError::BadWindow(native)) => vanished.0.push(native),
            Err(e) => return Err(e),
        }
    }

    Ok(vanished)
}

/// Hide every window of `screen` still marked `WANTS_UNMAPPED`.
pub fn unmap_stale<D: DisplayConnection>(
    display: &mut D,
    registry: &mut WindowRegistry,
    screen: &Screen,
) -> Result<Vanished, DisplayError> {
    let mut vanished = Vanished::default();
    for id in registry.ids() {
        let Some(w) = registry.get_mut(id) else {
            continue;
        };
        if w.screen != Some(screen.id) || !w.flags.contains(WindowFlags::WANTS_UNMAPPED) {
            continue;
        }
        w.flags.remove(WindowFlags::WANTS_UNMAPPED | WindowFlags::MAPPED);
        match display.unmap_window(w.native) {
            Ok(()) => {}
            Err(DisplayError::BadWindow(native)) => vanished.0.push(native),
            Err(e) => return Err(e),
        }
    }
    Ok(vanished)
}
