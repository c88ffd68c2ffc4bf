//! The boundary between the window manager core and the windowing system.
//!
//! The core never talks to a display server directly.  Everything it needs
//! (the event stream, property queries, map/configure/focus commands and
//! the composite primitives) goes through [`DisplayConnection`], so the
//! state machine in [`Session`](crate::session::Session) can be driven by a
//! real server, the [`headless`](crate::headless) socket backend, or a test
//! double.

use crate::geometry::Rect;
use crate::registry::WindowType;
use crate::slots::Slot;
use crate::thumbnail::IconImage;
use bitflags::bitflags;
use calloop::channel::Channel;
use serde::{Deserialize, Serialize};
use std::os::unix::io::BorrowedFd;

/// Server-side identifier of a surface.
pub type NativeId = u32;

/// Server timestamp in milliseconds.
pub type Time = u32;

/// "Now", as understood by the server.
pub const CURRENT_TIME: Time = 0;

/// Handle to a server-side picture (a composite source or destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PictureId(pub u32);

/// Handle to a server-side damage tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DamageId(pub u32);

/// Composition handles of one window: created on map, released on unmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Composition {
    pub picture: PictureId,
    pub damage: DamageId,
}

/// One physical output reported by the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    pub area: Rect,
}

/// The window manager's own per-screen surface and its two pictures.
///
/// `back` is the off-screen buffer windows are composited into; `front`
/// is the picture that shows on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSurface {
    pub window: NativeId,
    pub front: PictureId,
    pub back: PictureId,
}

/// The subset of window attributes the core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAttributes {
    pub geometry: Rect,
    pub override_redirect: bool,
    pub viewable: bool,
}

/// Window properties the core reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// `_NET_WM_PID`
    NetWmPid,
    /// `_NET_WM_ICON`
    NetWmIcon,
}

bitflags! {
    /// Which fields of a configure request or command are meaningful.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ConfigureMask: u16 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const WIDTH = 1 << 2;
        const HEIGHT = 1 << 3;
        const BORDER_WIDTH = 1 << 4;
        const SIBLING = 1 << 5;
        const STACK_MODE = 1 << 6;
        const GEOMETRY = Self::X.bits() | Self::Y.bits() | Self::WIDTH.bits() | Self::HEIGHT.bits();
    }
}

bitflags! {
    /// Modifier state carried by key events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        const SUPER = 1 << 3;
    }
}

/// A decoded key symbol.
///
/// Decoding keycodes through the active keymap is the display's job; the
/// router only needs this closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// A printable character (letters, digits, punctuation).
    Char(char),
    /// `F1` ..= `F12`, stored 1-based.
    Function(u8),
    Left,
    Right,
    Up,
    Down,
    Escape,
    Return,
    BackSpace,
    Tab,
    ControlL,
    ControlR,
    AltL,
    AltR,
    SuperL,
    SuperR,
    ShiftL,
    ShiftR,
    /// Anything else, as a raw keysym.
    Other(u32),
}

/// Porter-Duff operation used when compositing a source picture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Blend {
    /// Replace the destination.
    Source,
    /// Blend over the destination with a constant opacity in `[0, 1]`.
    Over { opacity: f32 },
}

/// A single composite request.
///
/// Copies the `dst_area.width × dst_area.height` block at
/// `(src_x, src_y)` in `src` to `dst_area` in `dst`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Composite {
    pub src: PictureId,
    pub dst: PictureId,
    pub blend: Blend,
    pub src_x: i32,
    pub src_y: i32,
    pub dst_area: Rect,
}

/// Everything the menu and desktop-list renderers need to draw one screen.
#[derive(Debug, Clone, Copy)]
pub struct SwitcherView<'a> {
    /// Screen size; drawing happens in screen-relative coordinates.
    pub area: Rect,
    pub slots: &'a [Slot],
    pub active: usize,
    /// Text typed into the menu so far.
    pub query: &'a str,
}

/// Kind of an asynchronously reported protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolErrorKind {
    /// The request named a window that no longer exists.
    BadWindow,
    /// Any other failure; logged and otherwise ignored.
    Other,
}

/// Events delivered by the display, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisplayEvent {
    SurfaceCreated {
        window: NativeId,
        geometry: Rect,
        override_redirect: bool,
    },
    SurfaceDestroyed {
        window: NativeId,
    },
    /// A client asks for its window to be shown.
    MapRequest {
        window: NativeId,
    },
    SurfaceMapped {
        window: NativeId,
    },
    SurfaceUnmapped {
        window: NativeId,
    },
    ConfigureRequest {
        window: NativeId,
        geometry: Rect,
        mask: ConfigureMask,
    },
    ConfigureNotify {
        window: NativeId,
        geometry: Rect,
    },
    KeyPress {
        keycode: u8,
        key: Key,
        modifiers: Modifiers,
        #[serde(default)]
        text: String,
        #[serde(default)]
        time: Time,
    },
    KeyRelease {
        keycode: u8,
        key: Key,
        modifiers: Modifiers,
        #[serde(default)]
        time: Time,
    },
    PointerMotion {
        x: i32,
        y: i32,
    },
    ButtonPress {
        button: u8,
        x: i32,
        y: i32,
    },
    ButtonRelease {
        button: u8,
        x: i32,
        y: i32,
    },
    DamageNotify {
        window: NativeId,
    },
    Expose {
        window: NativeId,
        region: Rect,
    },
    ProtocolError {
        resource: NativeId,
        kind: ProtocolErrorKind,
    },
}

/// Errors returned by [`DisplayConnection`] calls.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// The window no longer exists on the server.
    #[error("bad window 0x{0:08x}")]
    BadWindow(NativeId),
    /// The window's visual has no picture format; it cannot be composited.
    #[error("no picture format for window 0x{0:08x}")]
    NoPictureFormat(NativeId),
    /// A server-side resource could not be allocated.
    #[error("resource exhausted: {0}")]
    Exhausted(String),
    /// The connection itself failed.
    #[error("display connection error: {0}")]
    Connection(String),
}

/// Abstraction over a display server connection.
///
/// Calls are assumed to be buffered and non-blocking; the only place the
/// core blocks is the event loop's dispatch.  A connection wakes it either
/// through a readable descriptor ([`readiness_fd`](Self::readiness_fd)) or
/// through a channel ([`take_feed`](Self::take_feed)) whose messages come
/// back in [`deliver`](Self::deliver).
pub trait DisplayConnection {
    /// Message type of a channel-fed connection.
    type Feed;

    //  Enumeration

    /// Physical outputs, in server order.  Never empty: a connection without
    /// multi-head information reports the whole root window as one output.
    fn outputs(&mut self) -> Result<Vec<OutputInfo>, DisplayError>;

    /// Create the window manager's own surface covering `area`, plus its
    /// front picture and off-screen back-buffer.
    fn create_screen_surface(&mut self, area: &Rect) -> Result<ScreenSurface, DisplayError>;

    /// Top-level windows that existed before the window manager started.
    fn existing_windows(&mut self) -> Result<Vec<NativeId>, DisplayError>;

    //  Event stream

    /// Descriptor that becomes readable when the server has sent events.
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    /// Channel feeding this connection.  Handed out once, to the event loop.
    fn take_feed(&mut self) -> Option<Channel<Self::Feed>> {
        None
    }

    /// Accept one message that arrived on the feed.
    fn deliver(&mut self, _message: Self::Feed) {}

    /// Whether events are already queued client-side.
    fn has_pending(&mut self) -> bool;

    /// Pop the next queued event without blocking.
    fn next_event(&mut self) -> Option<DisplayEvent>;

    //  Queries

    fn window_attributes(&mut self, window: NativeId) -> Result<WindowAttributes, DisplayError>;

    fn window_type(&mut self, window: NativeId) -> Result<WindowType, DisplayError>;

    fn transient_for(&mut self, window: NativeId) -> Result<Option<NativeId>, DisplayError>;

    /// First 32-bit value of `property`, or `None` when unset.
    fn integer_property(
        &mut self,
        window: NativeId,
        property: Property,
    ) -> Result<Option<u32>, DisplayError>;

    /// Full 32-bit array value of `property`; empty when unset.
    fn cardinal_array(
        &mut self,
        window: NativeId,
        property: Property,
    ) -> Result<Vec<u32>, DisplayError>;

    //  Commands

    /// Show and raise `window` at `at`.
    fn map_window(&mut self, window: NativeId, at: &Rect) -> Result<(), DisplayError>;

    /// Hide `window`.
    fn unmap_window(&mut self, window: NativeId) -> Result<(), DisplayError>;

    fn configure_window(
        &mut self,
        window: NativeId,
        geometry: &Rect,
        mask: ConfigureMask,
    ) -> Result<(), DisplayError>;

    fn set_input_focus(&mut self, window: NativeId, time: Time) -> Result<(), DisplayError>;

    /// Ask the client to close `window` (a delete-window protocol message).
    fn send_close_request(&mut self, window: NativeId, time: Time) -> Result<(), DisplayError>;

    /// Create a picture and a damage tracker for `window`.
    fn create_composition(&mut self, window: NativeId) -> Result<Composition, DisplayError>;

    fn destroy_composition(&mut self, composition: Composition) -> Result<(), DisplayError>;

    /// Acknowledge accumulated damage so the next change is reported again.
    fn subtract_damage(&mut self, damage: DamageId) -> Result<(), DisplayError>;

    fn composite(&mut self, op: &Composite) -> Result<(), DisplayError>;

    /// Upload `icon` centered in a `width × height` picture.
    fn create_thumbnail(
        &mut self,
        icon: &IconImage,
        width: u32,
        height: u32,
    ) -> Result<PictureId, DisplayError>;

    fn free_picture(&mut self, picture: PictureId) -> Result<(), DisplayError>;

    /// Draw the launcher menu of a screen into `target`.
    fn draw_menu(&mut self, target: PictureId, view: &SwitcherView<'_>) -> Result<(), DisplayError>;

    /// Draw the desktop-list popup into `target`.
    fn draw_desktop_list(
        &mut self,
        target: PictureId,
        view: &SwitcherView<'_>,
    ) -> Result<(), DisplayError>;

    /// Push buffered requests to the server.
    fn flush(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}
