//! Key events to session actions.
//!
//! [`Router`] tracks which modifiers are held and turns each key press into
//! at most one [`Action`].  Bindings are checked in a fixed order and the
//! first match wins:
//!
//! | Chord | Action |
//! |---|---|
//! | a configured media keycode | [`Action::RunNamed`] |
//! | `Super`+letter | [`Action::Launch`] with `hotkey.<letter>` |
//! | `Ctrl`+`F1`..`F12` / `Super`+`F1`..`F12` | [`Action::SelectSlot`] 0..12 / 12..24 |
//! | `Ctrl`+`Alt`+`Q` | [`Action::Quit`] |
//! | `Super`+`Alt`+arrow | [`Action::Step`] (±1 left/right, ±12 up/down) |
//! | `Super`+`Ctrl`+arrow | [`Action::Step`] with `swap` |
//! | `Super`+`1`..`9` | [`Action::FocusScreen`] |
//! | `Ctrl`+`Alt`+`Escape` | [`Action::Launch`] of `xkill` |
//! | `Alt`+`F4` | [`Action::CloseActive`] |
//! | anything else, on a menu slot | [`Action::Menu`] |
//!
//! While a step chord is held the desktop list is shown.

use crate::config::Config;
use crate::display::{Key, Modifiers, Time};
use crate::slots::SLOT_COUNT;
use log::debug;

/// What a key press asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a named command from the `commands/` directories.
    RunNamed(String),
    /// Run a shell command line from the active slot.
    Launch { command: String, time: Time },
    /// Activate a slot directly, resetting the history.
    SelectSlot { index: usize, time: Time },
    /// Move the active slot by `delta`, or swap it with the target.
    Step { delta: isize, swap: bool, time: Time },
    /// Make screen `index` current.
    FocusScreen { index: usize, time: Time },
    /// Politely close the active slot's window.
    CloseActive { time: Time },
    Menu(MenuEdit),
    Quit,
}

/// An edit of the menu query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEdit {
    Append(String),
    BackSpace,
    Clear,
    /// Launch the query.
    Submit { time: Time },
}

/// A decoded key press.
#[derive(Debug, Clone, Copy)]
pub struct KeyPress<'a> {
    pub keycode: u8,
    pub key: Key,
    pub modifiers: Modifiers,
    /// Text the key produces under the current keymap, possibly empty.
    pub text: &'a str,
    pub time: Time,
}

/// Modifier tracker and binding table.
#[derive(Debug, Default)]
pub struct Router {
    held: Modifiers,
    desktop_list: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modifiers currently held.
    pub fn modifiers(&self) -> Modifiers {
        self.held
    }

    /// Whether the desktop-list popup should be visible.
    pub fn desktop_list_visible(&self) -> bool {
        self.desktop_list
    }

    fn step_chord(&self) -> bool {
        self.held.contains(Modifiers::SUPER)
            && (self.held.contains(Modifiers::ALT) != self.held.contains(Modifiers::CONTROL))
    }

    /// Route a key press.  `menu` tells whether the current screen's
    /// active slot shows the menu.
    pub fn on_key_press(&mut self, press: &KeyPress<'_>, config: &Config, menu: bool) -> Option<Action> {
        self.held = press.modifiers | modifier_of(press.key);
        let ctrl = self.held.contains(Modifiers::CONTROL);
        let alt = self.held.contains(Modifiers::ALT);
        let sup = self.held.contains(Modifiers::SUPER);
        let time = press.time;

        if let Some(name) = config.media_keys.command_for(press.keycode) {
            return Some(Action::RunNamed(name.to_string()));
        }

        match press.key {
            Key::Char(c) if sup && c.is_ascii_lowercase() => {
                return config.hotkey(c).map(|command| Action::Launch {
                    command: command.to_string(),
                    time,
                });
            }
            Key::Function(n) if (sup != ctrl) && (1..=12).contains(&n) => {
                let mut index = (n - 1) as usize;
                if sup {
                    index += SLOT_COUNT / 2;
                }
                return Some(Action::SelectSlot { index, time });
            }
            Key::Char('q' | 'Q') if ctrl && alt => return Some(Action::Quit),
            _ => {}
        }

        if self.step_chord() {
            let half = (SLOT_COUNT / 2) as isize;
            let delta = match press.key {
                Key::Right => Some(1),
                Key::Left => Some(-1),
                Key::Down => Some(half),
                Key::Up => Some(-half),
                _ => None,
            };
            if !self.desktop_list {
                debug!("desktop list shown");
            }
            self.desktop_list = true;
            return delta.map(|delta| Action::Step {
                delta,
                swap: ctrl,
                time,
            });
        }

        match press.key {
            Key::Char(c @ '1'..='9') if sup => {
                return Some(Action::FocusScreen {
                    index: c as usize - '1' as usize,
                    time,
                });
            }
            Key::Escape if ctrl && alt => {
                return Some(Action::Launch {
                    command: "xkill".to_string(),
                    time,
                });
            }
            Key::Function(4) if alt => return Some(Action::CloseActive { time }),
            _ => {}
        }

        if !menu {
            return None;
        }
        let edit = match press.key {
            Key::Return => MenuEdit::Submit { time },
            Key::BackSpace => MenuEdit::BackSpace,
            Key::Escape => MenuEdit::Clear,
            _ if !press.text.is_empty() && !press.text.chars().any(char::is_control) => {
                MenuEdit::Append(press.text.to_string())
            }
            _ => return None,
        };
        Some(Action::Menu(edit))
    }

    /// Track a key release.  Returns `true` when the desktop list was hidden
    /// by it.
    pub fn on_key_release(&mut self, key: Key, modifiers: Modifiers) -> bool {
        self.held = modifiers - modifier_of(key);
        if self.desktop_list && !self.step_chord() {
            self.desktop_list = false;
            debug!("desktop list hidden");
            return true;
        }
        false
    }
}

/// The modifier a modifier key itself stands for.  Key events report the
/// state from before the event, so the key has to be folded in by hand.
fn modifier_of(key: Key) -> Modifiers {
    match key {
        Key::ControlL | Key::ControlR => Modifiers::CONTROL,
        Key::AltL | Key::AltR => Modifiers::ALT,
        Key::SuperL | Key::SuperR => Modifiers::SUPER,
        Key::ShiftL | Key::ShiftR => Modifiers::SHIFT,
        _ => Modifiers::empty(),
    }
}
