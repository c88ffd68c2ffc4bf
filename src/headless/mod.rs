//! A scriptable display backend driven over a Unix socket.
//!
//! [`HeadlessDisplay`](display::HeadlessDisplay) implements
//! [`DisplayConnection`](crate::display::DisplayConnection) without any
//! windowing system behind it.  External tools connect to the socket and
//! send newline-delimited JSON [`WireMessage`]s: display events to inject,
//! and window descriptions that answer the property queries the window
//! manager makes.  Messages travel to the event loop over a calloop
//! channel.  Every command the window manager issues is logged.
//!
//! # Wire format
//!
//! ```json
//! {"Describe":{"window":16,"window_type":"Normal","pid":4242}}
//! {"Event":{"SurfaceCreated":{"window":16,"geometry":{"x":0,"y":0,"width":640,"height":480},"override_redirect":false}}}
//! {"Event":{"MapRequest":{"window":16}}}
//! {"Event":{"KeyPress":{"keycode":71,"key":{"Function":5},"modifiers":"CONTROL"}}}
//! ```

pub mod display;
pub mod listener;

use crate::display::{DisplayEvent, NativeId};
use crate::registry::WindowType;
use serde::{Deserialize, Serialize};

/// One line on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Inject a display event.
    Event(DisplayEvent),
    /// Set the hints a window reports.
    Describe(WindowDescription),
}

/// Hints reported for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowDescription {
    pub window: NativeId,
    pub window_type: WindowType,
    #[serde(default)]
    pub transient_for: Option<NativeId>,
    #[serde(default)]
    pub pid: Option<u32>,
    /// `_NET_WM_ICON` cardinal array.
    #[serde(default)]
    pub icon: Vec<u32>,
}

/// Errors produced by the headless backend.
#[derive(Debug, thiserror::Error)]
pub enum HeadlessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
