//! **slotwm**: a slot-based virtual-desktop window manager.
//!
//! Every screen owns a fixed row of desktop slots.  A slot either shows a
//! launcher menu or hosts exactly one application window; switching slots
//! swaps which window is mapped and focused.  A small damage-driven
//! compositor paints windows and the menu overlay into a per-screen
//! back-buffer.
//!
//! # Architecture
//!
//! The crate is organised around two collaborator traits:
//!
//! * [`display::DisplayConnection`]: abstracts the windowing system so the
//!   session state machine never talks to a server directly.
//! * [`launch::Launcher`]: abstracts process spawning and reaping.
//!
//! [`session::Session`] owns all window-manager state and reacts to
//! [`display::DisplayEvent`]s; [`event_loop::run`] drives it.  The only
//! display bundled here is the [`headless`] socket backend.

pub mod compositor;
pub mod config;
pub mod display;
pub mod event_loop;
pub mod focus;
pub mod geometry;
pub mod headless;
pub mod hotkeys;
pub mod launch;
pub mod registry;
pub mod session;
pub mod slots;
pub mod thumbnail;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;
