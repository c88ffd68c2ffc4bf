//! Screens, their virtual-desktop slots, and the navigation history.
//!
//! Every [`Screen`] owns a fixed array of [`SLOT_COUNT`] slots.  A slot is
//! either showing the launcher menu ([`SlotMode::Menu`]) or hosting client
//! windows ([`SlotMode::Hosting`]).  Slots never move between screens; they
//! are mutated in place, exchanged by [`swap`], and reset when their last
//! window goes away.
//!
//! The slots are laid out as a 12 × 2 grid in the desktop list: `F1`..`F12`
//! address the first row, `Super+F1`..`Super+F12` the second.

use crate::config::LayoutConfig;
use crate::display::{PictureId, ScreenSurface, SwitcherView, Time};
use crate::geometry::Rect;
use crate::registry::{ScreenId, SlotRef, WindowId, WindowRegistry};
use log::debug;
use std::time::Instant;

/// Number of slots per screen.
pub const SLOT_COUNT: usize = 24;

/// Slots per row of the desktop list.
const SLOTS_PER_ROW: u32 = 12;

/// Longest query the menu accepts, in characters.
pub const MAX_QUERY_LEN: usize = 255;

/// What a slot is currently showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SlotMode {
    #[default]
    Menu,
    Hosting,
}

/// One virtual desktop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slot {
    pub mode: SlotMode,
    /// Mode to fall back to when the hosted content goes away.  Set to
    /// Menu for every active slot at startup; reset keeps the default.
    pub return_mode: SlotMode,
    /// Process launched from this slot's menu, used to place its first window.
    pub pid: Option<u32>,
    pub started_at: Time,
    pub thumbnail: Option<PictureId>,
    pub dirty: bool,
    /// When the menu of this slot should be redrawn next (clock updates).
    pub next_refresh: Option<Instant>,
}

impl Slot {
    pub fn is_menu(&self) -> bool {
        self.mode == SlotMode::Menu
    }

    /// Switch to hosting.  Returns `true` if the mode actually changed.
    pub fn host(&mut self) -> bool {
        if self.mode == SlotMode::Hosting {
            return false;
        }
        self.mode = SlotMode::Hosting;
        self.dirty = true;
        true
    }

    /// Return to defaults (Menu mode).  Hands back the thumbnail so the
    /// caller can free the server-side picture.
    pub fn reset(&mut self) -> Option<PictureId> {
        let thumbnail = self.thumbnail.take();
        *self = Slot {
            dirty: true,
            ..Slot::default()
        };
        thumbnail
    }
}

/// Bounded stack of recently active slot indices.
///
/// Never empty, never longer than [`SLOT_COUNT`], and never holds the same
/// index twice in a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    entries: Vec<usize>,
}

impl History {
    pub fn new(initial: usize) -> Self {
        Self {
            entries: vec![initial],
        }
    }

    pub fn entries(&self) -> &[usize] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self) -> usize {
        self.entries.last().copied().unwrap_or(0)
    }

    /// Clear the stack down to the single entry `slot`.
    pub fn push_reset(&mut self, slot: usize) {
        self.entries.clear();
        self.entries.push(slot);
    }

    /// Append `slot`, dropping the oldest entry on overflow.
    pub fn push(&mut self, slot: usize) {
        if self.entries.last() == Some(&slot) {
            return;
        }
        if self.entries.len() == SLOT_COUNT {
            self.entries.remove(0);
        }
        self.entries.push(slot);
    }

    /// Overwrite the top entry (used when the active slot moves by a swap).
    pub fn replace_top(&mut self, slot: usize) {
        if let Some(top) = self.entries.last_mut() {
            *top = slot;
        }
        self.entries.dedup();
    }

    /// Drop the top entry, keeping at least one.
    pub fn pop(&mut self) -> Option<usize> {
        if self.entries.len() > 1 {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Remove every occurrence of `slot` while more than one entry remains.
    pub fn remove_all(&mut self, slot: usize) {
        let mut j = 0;
        while self.entries.len() > 1 && j < self.entries.len() {
            if self.entries[j] == slot {
                self.entries.remove(j);
            } else {
                j += 1;
            }
        }
        self.entries.dedup();
    }
}

/// One physical output with its slots.
#[derive(Debug)]
pub struct Screen {
    pub id: ScreenId,
    pub area: Rect,
    pub surface: ScreenSurface,
    pub slots: Vec<Slot>,
    active: usize,
    pub history: History,
    /// The window manager's own surface on this screen, registered as an
    /// `Internal` window.
    pub background: Option<WindowId>,
    /// Text typed into the menu.
    pub query: String,
    /// The whole screen must be redrawn on the next paint.
    pub invalidated: bool,
    /// Bounding box of exposed regions, screen-relative.
    pub exposed: Option<Rect>,
}

impl Screen {
    pub fn new(id: ScreenId, area: Rect, surface: ScreenSurface) -> Self {
        Self {
            id,
            area,
            surface,
            slots: vec![Slot::default(); SLOT_COUNT],
            active: 0,
            history: History::new(0),
            background: None,
            query: String::new(),
            invalidated: true,
            exposed: None,
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn active_slot(&self) -> &Slot {
        &self.slots[self.active]
    }

    pub fn active_slot_mut(&mut self) -> &mut Slot {
        &mut self.slots[self.active]
    }

    /// Make `index` the active slot without touching the history or the
    /// mapped set.  The focus pass and history push are the caller's job.
    pub(crate) fn set_active_index(&mut self, index: usize) {
        self.active = index % SLOT_COUNT;
    }

    pub fn slot_ref(&self, index: usize) -> SlotRef {
        SlotRef {
            screen: self.id,
            slot: index,
        }
    }

    /// The slot a new window should go to.
    ///
    /// Reuses the active slot when it is showing the menu, else the first
    /// slot in Menu mode.  `None` when every slot hosts something.
    pub fn first_available_slot(&self) -> Option<usize> {
        if self.active_slot().is_menu() {
            return Some(self.active);
        }
        self.slots.iter().position(Slot::is_menu)
    }

    /// Slot reached by moving `delta` positions from the active one,
    /// wrapping around.
    pub fn step_target(&self, delta: isize) -> usize {
        (self.active as isize + delta).rem_euclid(SLOT_COUNT as isize) as usize
    }

    /// Request a full redraw.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Record an exposed region (screen-relative) for the next paint.
    pub fn expose(&mut self, region: Rect) {
        self.exposed = Some(match self.exposed {
            Some(prev) => prev.union(&region),
            None => region,
        });
    }

    pub fn switcher_view(&self) -> SwitcherView<'_> {
        SwitcherView {
            area: self.area.at_origin(),
            slots: &self.slots,
            active: self.active,
            query: &self.query,
        }
    }
}

/// Size of one slot thumbnail in the desktop list of a screen of `area`.
pub fn thumbnail_size(area: &Rect, layout: &LayoutConfig) -> (u32, u32) {
    let gaps = layout.thumbnail_margin * (SLOTS_PER_ROW + 1);
    let width = area.width.saturating_sub(gaps) / SLOTS_PER_ROW;
    let height = if area.width == 0 {
        0
    } else {
        (width as u64 * area.height as u64 / area.width as u64) as u32
    };
    (width.max(1), height.max(1))
}

/// Height of the desktop-list strip at the bottom of a screen; desktop
/// windows are kept out of it.
pub fn desktop_strip_height(area: &Rect, layout: &LayoutConfig) -> u32 {
    let (_, thumb_height) = thumbnail_size(area, layout);
    2 * thumb_height + 3 * layout.thumbnail_margin + layout.label_height
}

/// Exchange slots `a` and `b` of `screen`, including every window link.
///
/// Hosted content travels with the slot, so the mapped set is unaffected;
/// only the addresses change.
pub fn swap(screen: &mut Screen, registry: &mut WindowRegistry, a: usize, b: usize) {
    if a == b {
        return;
    }
    debug!("screen {}: swap slots {} and {}", screen.id.0, a, b);
    screen.slots.swap(a, b);
    registry.relink(screen.id, a, b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::PictureId;

    fn screen() -> Screen {
        Screen::new(
            ScreenId(0),
            Rect::new(0, 0, 1920, 1080),
            ScreenSurface {
                window: 0x100,
                front: PictureId(1),
                back: PictureId(2),
            },
        )
    }

    #[test]
    fn new_screen_starts_in_menu_at_slot_zero() {
        let s = screen();
        assert_eq!(s.slots.len(), SLOT_COUNT);
        assert!(s.slots.iter().all(Slot::is_menu));
        assert_eq!(s.active(), 0);
        assert_eq!(s.history.entries(), &[0]);
    }

    #[test]
    fn first_available_reuses_active_menu_slot() {
        let mut s = screen();
        s.set_active_index(5);
        assert_eq!(s.first_available_slot(), Some(5));
    }

    #[test]
    fn first_available_scans_when_active_hosts() {
        let mut s = screen();
        s.slots[0].host();
        s.slots[1].host();
        assert_eq!(s.first_available_slot(), Some(2));
    }

    #[test]
    fn first_available_none_when_saturated() {
        let mut s = screen();
        for slot in &mut s.slots {
            slot.host();
        }
        assert_eq!(s.first_available_slot(), None);
    }

    #[test]
    fn step_wraps_both_ways() {
        let mut s = screen();
        assert_eq!(s.step_target(-1), SLOT_COUNT - 1);
        assert_eq!(s.step_target(SLOT_COUNT as isize / 2), 12);
        s.set_active_index(20);
        assert_eq!(s.step_target(12), 8);
        assert_eq!(s.step_target(1), 21);
    }

    #[test]
    fn history_drops_oldest_on_overflow() {
        let mut h = History::new(0);
        for i in 1..(SLOT_COUNT + 5) {
            h.push(i % SLOT_COUNT);
        }
        assert_eq!(h.len(), SLOT_COUNT);
        assert_eq!(h.top(), (SLOT_COUNT + 4) % SLOT_COUNT);
    }

    #[test]
    fn history_never_repeats_adjacent_entries() {
        let mut h = History::new(2);
        h.push(2);
        h.push(3);
        h.push(3);
        h.push(2);
        assert_eq!(h.entries(), &[2, 3, 2]);
        h.remove_all(3);
        assert_eq!(h.entries(), &[2]);

        let mut h = History::new(1);
        h.push(4);
        h.replace_top(1);
        assert_eq!(h.entries(), &[1]);

        for w in h.entries().windows(2) {
            assert_ne!(w[0], w[1]);
        }
    }

    #[test]
    fn history_keeps_one_entry() {
        let mut h = History::new(7);
        assert_eq!(h.pop(), None);
        h.remove_all(7);
        assert_eq!(h.entries(), &[7]);
    }

    #[test]
    fn push_reset_clears_the_stack() {
        let mut h = History::new(0);
        h.push(1);
        h.push(2);
        h.push_reset(9);
        assert_eq!(h.entries(), &[9]);
    }

    #[test]
    fn reset_returns_thumbnail_and_enters_menu() {
        let mut slot = Slot::default();
        slot.host();
        slot.pid = Some(42);
        slot.thumbnail = Some(PictureId(77));
        assert_eq!(slot.reset(), Some(PictureId(77)));
        assert!(slot.is_menu());
        assert_eq!(slot.pid, None);
        assert!(slot.thumbnail.is_none());
    }

    #[test]
    fn host_fires_once() {
        let mut slot = Slot::default();
        assert!(slot.host());
        assert!(!slot.host());
    }

    #[test]
    fn swap_twice_restores_everything() {
        let mut s = screen();
        let mut reg = WindowRegistry::new();
        let w = reg.create(1, Rect::new(0, 0, 10, 10), false);
        reg.get_mut(w).unwrap().desktop = Some(s.slot_ref(3));
        s.slots[3].host();
        s.slots[3].pid = Some(99);
        s.slots[3].thumbnail = Some(PictureId(5));
        let before = s.slots.clone();

        swap(&mut s, &mut reg, 3, 0);
        assert_eq!(s.slots[0].pid, Some(99));
        assert!(s.slots[3].is_menu());
        assert_eq!(reg.get(w).unwrap().desktop, Some(s.slot_ref(0)));

        swap(&mut s, &mut reg, 3, 0);
        assert_eq!(s.slots, before);
        assert_eq!(reg.get(w).unwrap().desktop, Some(s.slot_ref(3)));
    }

    #[test]
    fn exposed_regions_coalesce() {
        let mut s = screen();
        s.expose(Rect::new(10, 10, 10, 10));
        s.expose(Rect::new(50, 0, 10, 5));
        assert_eq!(s.exposed, Some(Rect::new(10, 0, 50, 20)));
    }

    #[test]
    fn strip_height_accounts_for_two_rows() {
        let layout = LayoutConfig::default();
        let area = Rect::new(0, 0, 1920, 1080);
        let (w, h) = thumbnail_size(&area, &layout);
        assert_eq!(w, (1920 - 13 * layout.thumbnail_margin) / 12);
        assert_eq!(h, w * 1080 / 1920);
        assert_eq!(
            desktop_strip_height(&area, &layout),
            2 * h + 3 * layout.thumbnail_margin + layout.label_height
        );
    }
}
