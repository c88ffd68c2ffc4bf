//! The window registry: every client surface the window manager knows about.
//!
//! Windows live in a generation-checked arena.  A [`WindowId`] handed out
//! for a window stops resolving the moment that window is removed, even if
//! its arena slot is later reused, so stale handles fail lookups instead of
//! aliasing a newer window.
//!
//! Iteration follows creation order, which is also the back-to-front paint
//! order.

use crate::display::{Composition, DisplayConnection, NativeId};
use crate::geometry::Rect;
use bitflags::bitflags;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Per-window state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WindowFlags: u8 {
        /// Currently shown by the window manager.
        const MAPPED = 1 << 0;
        /// Shown, but not selected by the last focus pass; hide it once the
        /// new set is on screen.
        const WANTS_UNMAPPED = 1 << 1;
        /// Override-redirect: no placement, no focus policy.
        const UNMANAGED = 1 << 2;
        /// Contents changed since the last paint.
        const DIRTY = 1 << 3;
    }
}

/// What kind of surface a window is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowType {
    Normal,
    Dialog,
    Dock,
    Desktop,
    /// The window manager's own per-screen surface.
    Internal,
    /// Not resolved yet, or the hint query failed.
    Unknown,
}

/// Index of a screen.  Screens are never destroyed, so this never dangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScreenId(pub usize);

/// Address of a desktop slot: the screen plus the slot index on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub screen: ScreenId,
    pub slot: usize,
}

/// Generation-checked handle to a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId {
    index: u32,
    generation: u32,
}

/// One tracked surface.
///
/// `screen`, `desktop` and `transient_for` are back-references only; they
/// never keep their target alive.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientWindow {
    pub native: NativeId,
    /// Geometry last reported by the server.
    pub position: Rect,
    /// Geometry the window manager asked for.
    pub target: Rect,
    pub flags: WindowFlags,
    pub window_type: WindowType,
    pub transient_for: Option<NativeId>,
    pub screen: Option<ScreenId>,
    pub desktop: Option<SlotRef>,
    pub composition: Option<Composition>,
}

impl ClientWindow {
    fn new(native: NativeId, geometry: Rect, override_redirect: bool) -> Self {
        let mut flags = WindowFlags::empty();
        if override_redirect {
            flags |= WindowFlags::UNMANAGED;
        }
        Self {
            native,
            position: geometry,
            target: geometry,
            flags,
            window_type: WindowType::Unknown,
            transient_for: None,
            screen: None,
            desktop: None,
            composition: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.flags.contains(WindowFlags::MAPPED)
    }

    pub fn is_unmanaged(&self) -> bool {
        self.flags.contains(WindowFlags::UNMANAGED)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(WindowFlags::DIRTY)
    }
}

#[derive(Debug)]
enum Entry {
    Occupied { generation: u32, window: ClientWindow },
    Vacant { generation: u32 },
}

/// Registry of client windows, keyed both by arena handle and native id.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    entries: Vec<Entry>,
    free: Vec<u32>,
    /// Live handles in creation order.
    order: Vec<WindowId>,
    by_native: HashMap<NativeId, WindowId>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    //  Lifecycle

    /// Start tracking `native`.
    ///
    /// Idempotent: if the id is already known the existing handle is
    /// returned and the entry is left untouched.
    pub fn create(&mut self, native: NativeId, geometry: Rect, override_redirect: bool) -> WindowId {
        if let Some(id) = self.by_native.get(&native) {
            return *id;
        }

        let window = ClientWindow::new(native, geometry, override_redirect);
        let id = match self.free.pop() {
            Some(index) => {
                let generation = match self.entries[index as usize] {
                    Entry::Vacant { generation } => generation,
                    Entry::Occupied { .. } => unreachable!("free list points at a live entry"),
                };
                self.entries[index as usize] = Entry::Occupied { generation, window };
                WindowId { index, generation }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry::Occupied {
                    generation: 0,
                    window,
                });
                WindowId {
                    index,
                    generation: 0,
                }
            }
        };

        self.order.push(id);
        self.by_native.insert(native, id);
        debug!("tracking window 0x{:08x}", native);
        id
    }

    /// Stop tracking `native` and hand back its last state.
    ///
    /// Unknown ids are ignored.
    pub fn remove(&mut self, native: NativeId) -> Option<ClientWindow> {
        let id = self.by_native.remove(&native)?;
        self.order.retain(|o| *o != id);

        let slot = &mut self.entries[id.index as usize];
        let old = std::mem::replace(
            slot,
            Entry::Vacant {
                generation: id.generation.wrapping_add(1),
            },
        );
        self.free.push(id.index);
        debug!("forgetting window 0x{:08x}", native);

        match old {
            Entry::Occupied { window, .. } => Some(window),
            Entry::Vacant { .. } => None,
        }
    }

    //  Lookup

    pub fn lookup(&self, native: NativeId) -> Option<WindowId> {
        self.by_native.get(&native).copied()
    }

    pub fn get(&self, id: WindowId) -> Option<&ClientWindow> {
        match self.entries.get(id.index as usize)? {
            Entry::Occupied { generation, window } if *generation == id.generation => Some(window),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut ClientWindow> {
        match self.entries.get_mut(id.index as usize)? {
            Entry::Occupied { generation, window } if *generation == id.generation => Some(window),
            _ => None,
        }
    }

    pub fn by_native(&self, native: NativeId) -> Option<&ClientWindow> {
        self.lookup(native).and_then(|id| self.get(id))
    }

    pub fn by_native_mut(&mut self, native: NativeId) -> Option<&mut ClientWindow> {
        let id = self.lookup(native)?;
        self.get_mut(id)
    }

    /// Snapshot of live handles in creation order.
    pub fn ids(&self) -> Vec<WindowId> {
        self.order.clone()
    }

    /// Live windows in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (WindowId, &ClientWindow)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.get(*id).map(|w| (*id, w)))
    }

    /// Whether any live window is assigned to `slot`.
    pub fn has_occupant(&self, slot: SlotRef) -> bool {
        self.iter().any(|(_, w)| w.desktop == Some(slot))
    }

    /// First window assigned to `slot` whose type is `Normal`.
    pub fn first_normal_on(&self, slot: SlotRef) -> Option<&ClientWindow> {
        self.iter()
            .map(|(_, w)| w)
            .find(|w| w.desktop == Some(slot) && w.window_type == WindowType::Normal)
    }

    /// Follow the `transient_for` chain of `id` to its top-most window.
    ///
    /// A window without a parent is its own root.  Returns `None` when the
    /// chain reaches a parent that is no longer tracked, or loops.
    pub fn transient_root(&self, id: WindowId) -> Option<WindowId> {
        let mut current = id;
        for _ in 0..=self.order.len() {
            let window = self.get(current)?;
            match window.transient_for {
                None => return Some(current),
                Some(parent) if parent == window.native => return Some(current),
                Some(parent) => current = self.lookup(parent)?,
            }
        }
        None
    }

    /// Exchange slot links `a` and `b` on `screen`: every window assigned to
    /// one of them is re-pointed at the other.
    pub fn relink(&mut self, screen: ScreenId, a: usize, b: usize) {
        let slot_a = SlotRef { screen, slot: a };
        let slot_b = SlotRef { screen, slot: b };
        for id in &self.order {
            if let Entry::Occupied { window, .. } = &mut self.entries[id.index as usize] {
                if window.desktop == Some(slot_a) {
                    window.desktop = Some(slot_b);
                } else if window.desktop == Some(slot_b) {
                    window.desktop = Some(slot_a);
                }
            }
        }
    }

    //  Hints

    /// Resolve the window type and transient-for hint of `id`, once.
    ///
    /// Query failures degrade the type to [`WindowType::Unknown`], which
    /// makes the next call retry.  A transient window is promoted from
    /// `Normal` to `Dialog` and inherits its parent's screen and desktop
    /// when the parent is tracked and has a desktop.
    pub fn resolve_hints<D: DisplayConnection>(&mut self, id: WindowId, display: &mut D) {
        let Some(window) = self.get(id) else {
            return;
        };
        if window.window_type != WindowType::Unknown {
            return;
        }
        let native = window.native;

        let window_type = display.window_type(native).unwrap_or_else(|e| {
            debug!("window type of 0x{:08x} unavailable: {}", native, e);
            WindowType::Unknown
        });
        let transient_for = display
            .transient_for(native)
            .unwrap_or_else(|e| {
                debug!("transient-for of 0x{:08x} unavailable: {}", native, e);
                None
            })
            .filter(|parent| *parent != native);

        let inherited = transient_for
            .and_then(|parent| self.by_native(parent))
            .and_then(|parent| parent.desktop.map(|d| (parent.screen, d)));

        let Some(window) = self.get_mut(id) else {
            return;
        };
        window.window_type = window_type;
        window.transient_for = transient_for;

        if transient_for.is_some() {
            if window.window_type == WindowType::Normal {
                window.window_type = WindowType::Dialog;
            }
            if let Some((screen, desktop)) = inherited {
                window.screen = screen;
                window.desktop = Some(desktop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecorderDisplay;

    fn rect() -> Rect {
        Rect::new(0, 0, 100, 100)
    }

    #[test]
    fn create_is_idempotent() {
        let mut reg = WindowRegistry::new();
        let a = reg.create(0x10, rect(), false);
        let b = reg.create(0x10, Rect::new(5, 5, 1, 1), true);
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        // The second call must not overwrite the entry.
        assert!(!reg.get(a).unwrap().is_unmanaged());
        assert_eq!(reg.get(a).unwrap().position, rect());
    }

    #[test]
    fn override_redirect_sets_unmanaged() {
        let mut reg = WindowRegistry::new();
        let id = reg.create(0x11, rect(), true);
        assert!(reg.get(id).unwrap().is_unmanaged());
    }

    #[test]
    fn destroyed_ids_never_hit() {
        let mut reg = WindowRegistry::new();
        let ops: &[(bool, NativeId)] = &[
            (true, 1),
            (true, 2),
            (false, 1),
            (true, 3),
            (true, 1),
            (false, 2),
            (false, 1),
            (false, 9),
            (true, 4),
        ];
        let mut live = std::collections::HashSet::new();
        for (create, native) in ops {
            if *create {
                reg.create(*native, rect(), false);
                live.insert(*native);
            } else {
                reg.remove(*native);
                live.remove(native);
            }
            for n in 1..10 {
                assert_eq!(reg.lookup(n).is_some(), live.contains(&n), "id {}", n);
            }
        }
    }

    #[test]
    fn stale_handles_do_not_alias_reused_entries() {
        let mut reg = WindowRegistry::new();
        let old = reg.create(1, rect(), false);
        reg.remove(1);
        let new = reg.create(2, rect(), false);
        assert!(reg.get(old).is_none());
        assert_eq!(reg.get(new).unwrap().native, 2);
    }

    #[test]
    fn iteration_follows_creation_order() {
        let mut reg = WindowRegistry::new();
        reg.create(1, rect(), false);
        reg.create(2, rect(), false);
        reg.create(3, rect(), false);
        reg.remove(2);
        reg.create(4, rect(), false);
        let natives: Vec<NativeId> = reg.iter().map(|(_, w)| w.native).collect();
        assert_eq!(natives, vec![1, 3, 4]);
    }

    #[test]
    fn relink_swaps_both_directions() {
        let mut reg = WindowRegistry::new();
        let screen = ScreenId(0);
        let a = reg.create(1, rect(), false);
        let b = reg.create(2, rect(), false);
        let c = reg.create(3, rect(), false);
        reg.get_mut(a).unwrap().desktop = Some(SlotRef { screen, slot: 3 });
        reg.get_mut(b).unwrap().desktop = Some(SlotRef { screen, slot: 0 });
        reg.get_mut(c).unwrap().desktop = Some(SlotRef { screen, slot: 5 });

        reg.relink(screen, 3, 0);
        assert_eq!(reg.get(a).unwrap().desktop.unwrap().slot, 0);
        assert_eq!(reg.get(b).unwrap().desktop.unwrap().slot, 3);
        assert_eq!(reg.get(c).unwrap().desktop.unwrap().slot, 5);
    }

    #[test]
    fn transient_root_follows_chain() {
        let mut reg = WindowRegistry::new();
        let a = reg.create(1, rect(), false);
        let b = reg.create(2, rect(), false);
        let c = reg.create(3, rect(), false);
        reg.get_mut(b).unwrap().transient_for = Some(1);
        reg.get_mut(c).unwrap().transient_for = Some(2);
        assert_eq!(reg.transient_root(c), Some(a));
        assert_eq!(reg.transient_root(a), Some(a));

        reg.remove(1);
        assert_eq!(reg.transient_root(c), None);
    }

    #[test]
    fn transient_cycle_terminates() {
        let mut reg = WindowRegistry::new();
        let a = reg.create(1, rect(), false);
        let b = reg.create(2, rect(), false);
        reg.get_mut(a).unwrap().transient_for = Some(2);
        reg.get_mut(b).unwrap().transient_for = Some(1);
        assert_eq!(reg.transient_root(a), None);
    }

    #[test]
    fn resolve_hints_promotes_and_inherits() {
        let mut display = RecorderDisplay::new();
        let mut reg = WindowRegistry::new();
        let parent = reg.create(1, rect(), false);
        let desktop = SlotRef {
            screen: ScreenId(0),
            slot: 4,
        };
        {
            let p = reg.get_mut(parent).unwrap();
            p.window_type = WindowType::Normal;
            p.screen = Some(ScreenId(0));
            p.desktop = Some(desktop);
        }
        let child = reg.create(2, rect(), false);
        display.describe(2, WindowType::Normal, Some(1), None);

        reg.resolve_hints(child, &mut display);
        let c = reg.get(child).unwrap();
        assert_eq!(c.window_type, WindowType::Dialog);
        assert_eq!(c.transient_for, Some(1));
        assert_eq!(c.desktop, Some(desktop));
        assert_eq!(c.screen, Some(ScreenId(0)));
    }

    #[test]
    fn failed_hint_query_degrades_to_unknown() {
        let mut display = RecorderDisplay::new();
        let mut reg = WindowRegistry::new();
        // No description registered: the recorder answers BadWindow.
        let id = reg.create(7, rect(), false);
        reg.resolve_hints(id, &mut display);
        let w = reg.get(id).unwrap();
        assert_eq!(w.window_type, WindowType::Unknown);
        assert_eq!(w.transient_for, None);
    }

    #[test]
    fn resolved_hints_are_not_queried_again() {
        let mut display = RecorderDisplay::new();
        let mut reg = WindowRegistry::new();
        let id = reg.create(7, rect(), false);
        display.describe(7, WindowType::Dock, None, None);
        reg.resolve_hints(id, &mut display);
        display.describe(7, WindowType::Normal, None, None);
        reg.resolve_hints(id, &mut display);
        assert_eq!(reg.get(id).unwrap().window_type, WindowType::Dock);
    }
}
