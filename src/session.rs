//! The orchestrator that ties the registry, slots, focus and paint passes
//! to a display connection and a process launcher.
//!
//! [`Session`] owns every piece of mutable window-manager state and reacts
//! to [`DisplayEvent`]s by updating it and issuing calls on the
//! [`DisplayConnection`].  It is generic over both collaborators, so the
//! same state machine runs against the headless backend, a real server, or
//! the recording doubles in the tests.

use crate::compositor::{self, PaintReport, PaintScheduler};
use crate::config::Config;
use crate::display::{
    ConfigureMask, DisplayConnection, DisplayError, DisplayEvent, NativeId, ProtocolErrorKind,
    Property, Time, CURRENT_TIME,
};
use crate::focus;
use crate::geometry::{constrain, Rect};
use crate::hotkeys::{Action, KeyPress, MenuEdit, Router};
use crate::launch::{resolve_named_command, LaunchRequest, Launcher, SlotEnv, SYSTEM_COMMAND_DIR};
use crate::registry::{ScreenId, SlotRef, WindowFlags, WindowId, WindowRegistry, WindowType};
use crate::slots::{self, desktop_strip_height, thumbnail_size, Screen, MAX_QUERY_LEN, SLOT_COUNT};
use crate::thumbnail::select_icon;
use log::{debug, error, info, trace, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Possible errors from the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A window disappeared while it was being worked on.  The session
    /// recovers from this itself by forgetting the window.
    #[error("window 0x{0:08x} vanished")]
    Vanished(NativeId),
    /// The display connection returned an error.
    #[error("display error: {0}")]
    Display(String),
    /// Every slot of the screen hosts something; the window stays
    /// unassigned.
    #[error("no free slot on screen {screen}")]
    SlotsExhausted { screen: usize },
    #[error("launch error: {0}")]
    Launch(String),
    #[error("display reports no outputs")]
    NoOutputs,
}

impl From<DisplayError> for SessionError {
    fn from(e: DisplayError) -> Self {
        match e {
            DisplayError::BadWindow(native) => SessionError::Vanished(native),
            other => SessionError::Display(other.to_string()),
        }
    }
}

/// Window-manager state for one display connection.
pub struct Session<D: DisplayConnection, L: Launcher> {
    display: D,
    launcher: L,
    config: Config,
    /// Configuration directory; also holds per-slot shell state.
    state_dir: PathBuf,
    registry: WindowRegistry,
    screens: Vec<Screen>,
    current: ScreenId,
    router: Router,
    painter: PaintScheduler,
    quit: bool,
}

impl<D: DisplayConnection, L: Launcher> Session<D, L> {
    /// Take over the display.
    ///
    /// Creates one screen per output, runs the configured auto-launch
    /// commands, adopts windows that already exist and focuses the first
    /// screen.  Every slot starts in menu mode with slot 0 active.
    pub fn new(
        mut display: D,
        launcher: L,
        config: Config,
        state_dir: PathBuf,
    ) -> Result<Self, SessionError> {
        let outputs = display.outputs()?;
        if outputs.is_empty() {
            return Err(SessionError::NoOutputs);
        }

        let mut registry = WindowRegistry::new();
        let mut screens = Vec::with_capacity(outputs.len());
        for (i, output) in outputs.iter().enumerate() {
            let surface = display.create_screen_surface(&output.area)?;
            let mut screen = Screen::new(ScreenId(i), output.area, surface);
            let background = registry.create(surface.window, output.area, false);
            if let Some(w) = registry.get_mut(background) {
                w.window_type = WindowType::Internal;
                w.screen = Some(screen.id);
                w.flags |= WindowFlags::MAPPED;
            }
            screen.background = Some(background);
            info!(
                "screen {}: {} {}x{}+{}+{}",
                i, output.name, output.area.width, output.area.height, output.area.x, output.area.y
            );
            screens.push(screen);
        }

        let painter = painter_for(&config);
        let mut session = Self {
            display,
            launcher,
            config,
            state_dir,
            registry,
            screens,
            current: ScreenId(0),
            router: Router::new(),
            painter,
            quit: false,
        };

        session.auto_launch();
        for screen in &mut session.screens {
            let slot = screen.active_slot_mut();
            slot.mode = slots::SlotMode::Menu;
            slot.return_mode = slots::SlotMode::Menu;
        }
        session.adopt_existing()?;
        let result = session.refocus(session.current, CURRENT_TIME);
        session.recover(result)?;
        Ok(session)
    }

    //  Accessors

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.launcher
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    pub fn current_screen(&self) -> &Screen {
        &self.screens[self.current.0]
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the quit chord was pressed.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Swap in a reloaded configuration.
    pub fn set_config(&mut self, config: Config) {
        self.painter = painter_for(&config);
        self.config = config;
        for screen in &mut self.screens {
            screen.invalidate();
        }
        info!("configuration reloaded");
    }

    //  Event handling

    /// Process one display event.
    ///
    /// Windows that turn out to be gone along the way are forgotten as if
    /// a destroy notification had arrived; every other error is returned
    /// for the caller to log.
    pub fn handle(&mut self, event: DisplayEvent) -> Result<(), SessionError> {
        trace!("event {:?}", event);
        let result = self.dispatch(event);
        self.recover(result)
    }

    /// Carry out a router action directly.
    pub fn perform(&mut self, action: Action) -> Result<(), SessionError> {
        let result = self.apply(action);
        self.recover(result)
    }

    fn recover(&mut self, mut result: Result<(), SessionError>) -> Result<(), SessionError> {
        while let Err(SessionError::Vanished(native)) = result {
            warn!("window 0x{:08x} is gone, forgetting it", native);
            result = self.destroy_window(native);
        }
        result
    }

    fn dispatch(&mut self, event: DisplayEvent) -> Result<(), SessionError> {
        match event {
            DisplayEvent::SurfaceCreated {
                window,
                geometry,
                override_redirect,
            } => {
                self.registry.create(window, geometry, override_redirect);
                Ok(())
            }
            DisplayEvent::SurfaceDestroyed { window } => self.destroy_window(window),
            DisplayEvent::MapRequest { window } => self.map_request(window),
            DisplayEvent::SurfaceMapped { window } => self.surface_mapped(window),
            DisplayEvent::SurfaceUnmapped { window } => self.surface_unmapped(window),
            DisplayEvent::ConfigureRequest {
                window,
                geometry,
                mask,
            } => self.configure_request(window, geometry, mask),
            DisplayEvent::ConfigureNotify { window, geometry } => {
                if let Some(w) = self.registry.by_native_mut(window) {
                    w.position = geometry;
                }
                Ok(())
            }
            DisplayEvent::KeyPress {
                keycode,
                key,
                modifiers,
                text,
                time,
            } => {
                let menu = self.current_screen().active_slot().is_menu();
                let press = KeyPress {
                    keycode,
                    key,
                    modifiers,
                    text: &text,
                    time,
                };
                let action = self.router.on_key_press(&press, &self.config, menu);
                let result = match action {
                    Some(action) => self.apply(action),
                    None => Ok(()),
                };
                compositor::invalidate_menus(&mut self.screens);
                result
            }
            DisplayEvent::KeyRelease { key, modifiers, .. } => {
                if self.router.on_key_release(key, modifiers) {
                    self.screens[self.current.0].invalidate();
                }
                Ok(())
            }
            DisplayEvent::PointerMotion { .. }
            | DisplayEvent::ButtonPress { .. }
            | DisplayEvent::ButtonRelease { .. } => Ok(()),
            DisplayEvent::DamageNotify { window } => {
                let Some(w) = self.registry.by_native_mut(window) else {
                    return Ok(());
                };
                w.flags |= WindowFlags::DIRTY;
                if let Some(composition) = w.composition {
                    self.display.subtract_damage(composition.damage)?;
                }
                Ok(())
            }
            DisplayEvent::Expose { window, region } => {
                if let Some(screen) = self
                    .screens
                    .iter_mut()
                    .find(|s| s.surface.window == window)
                {
                    screen.expose(region);
                }
                Ok(())
            }
            DisplayEvent::ProtocolError { resource, kind } => match kind {
                ProtocolErrorKind::BadWindow => Err(SessionError::Vanished(resource)),
                ProtocolErrorKind::Other => {
                    warn!("protocol error on resource 0x{:08x}", resource);
                    Ok(())
                }
            },
        }
    }

    //  Window lifecycle

    /// Forget `native`.
    ///
    /// If it was a normal window whose slot is on top of the history, the
    /// previous slot is activated and the slot is dropped from the history.
    /// A slot left without windows returns to the menu; if it is active the
    /// screen is refocused and redrawn.
    pub fn destroy_window(&mut self, native: NativeId) -> Result<(), SessionError> {
        let Some(window) = self.registry.remove(native) else {
            return Ok(());
        };
        if let Some(composition) = window.composition {
            if let Err(e) = self.display.destroy_composition(composition) {
                debug!("releasing composition of 0x{:08x}: {}", native, e);
            }
        }

        let Some(desktop) = window.desktop else {
            return Ok(());
        };
        let sid = desktop.screen;

        if window.window_type == WindowType::Normal && self.screens[sid.0].history.len() > 1 {
            let history = &mut self.screens[sid.0].history;
            if history.top() == desktop.slot {
                history.pop();
                let previous = history.top();
                self.set_active(sid, previous, CURRENT_TIME)?;
            }
            self.screens[sid.0].history.remove_all(desktop.slot);
        }

        if !self.registry.has_occupant(desktop) {
            self.enter_menu_mode(desktop);
        }

        if self.screens[sid.0].active() == desktop.slot {
            self.refocus(sid, CURRENT_TIME)?;
            compositor::invalidate_menus(&mut self.screens);
        }
        Ok(())
    }

    fn enter_menu_mode(&mut self, desktop: SlotRef) {
        let slot = &mut self.screens[desktop.screen.0].slots[desktop.slot];
        if let Some(picture) = slot.reset() {
            if let Err(e) = self.display.free_picture(picture) {
                debug!("freeing thumbnail: {}", e);
            }
        }
        info!(
            "screen {}: slot {} back to menu",
            desktop.screen.0, desktop.slot
        );
    }

    /// Place a window that asks to be shown.
    fn map_request(&mut self, native: NativeId) -> Result<(), SessionError> {
        let Some(id) = self.registry.lookup(native) else {
            debug!("map request for unknown window 0x{:08x}", native);
            return Ok(());
        };
        self.registry.resolve_hints(id, &mut self.display);
        let Some(w) = self.registry.get(id) else {
            return Ok(());
        };
        if w.is_unmanaged() {
            return Ok(());
        }
        let window_type = w.window_type;
        let has_desktop = w.desktop.is_some();
        let origin = (w.target.x, w.target.y);

        let mut activate = None;
        match window_type {
            WindowType::Normal | WindowType::Dialog | WindowType::Unknown if !has_desktop => {
                if window_type == WindowType::Normal {
                    self.attach_by_pid(id, native)?;
                }
                let placed = self.registry.get(id).is_some_and(|w| w.desktop.is_some());
                if !placed {
                    let cur = self.current;
                    let screen = &self.screens[cur.0];
                    if window_type == WindowType::Dialog && !screen.active_slot().is_menu() {
                        let desktop = screen.slot_ref(screen.active());
                        self.assign(id, cur, Some(desktop));
                    } else {
                        activate = Some(self.allocate_slot(id, cur)?);
                    }
                }
            }
            WindowType::Desktop => {
                let taken = |s: ScreenId| {
                    self.registry.iter().any(|(other, w)| {
                        other != id && w.window_type == WindowType::Desktop && w.screen == Some(s)
                    })
                };
                let sid = self
                    .screens
                    .iter()
                    .map(|s| s.id)
                    .find(|s| !taken(*s))
                    .unwrap_or(ScreenId(0));
                self.assign(id, sid, None);
            }
            WindowType::Dock => {
                let sid = self
                    .screens
                    .iter()
                    .find(|s| s.area.contains_point(origin.0, origin.1))
                    .map_or(self.current, |s| s.id);
                self.assign(id, sid, None);
            }
            _ => {}
        }

        self.constrain_window(id)?;
        if window_type == WindowType::Normal {
            self.grab_thumbnail(id)?;
        }

        if let Some((sid, index)) = activate {
            if self.screens[sid.0].active() != index {
                return self.set_active(sid, index, CURRENT_TIME);
            }
        }

        let Some(w) = self.registry.get(id) else {
            return Ok(());
        };
        let Some(sid) = w.screen else {
            return Ok(());
        };
        let screen = &self.screens[sid.0];
        let visible = w.window_type == WindowType::Dock
            || w.desktop == Some(screen.slot_ref(screen.active()))
            || (w.window_type == WindowType::Desktop && screen.active_slot().is_menu());
        if visible {
            self.refocus(sid, CURRENT_TIME)?;
        }
        Ok(())
    }

    fn assign(&mut self, id: WindowId, screen: ScreenId, desktop: Option<SlotRef>) {
        if let Some(w) = self.registry.get_mut(id) {
            w.screen = Some(screen);
            w.desktop = desktop;
        }
    }

    /// Attach a window to the menu slot that launched its process, if any.
    fn attach_by_pid(&mut self, id: WindowId, native: NativeId) -> Result<(), SessionError> {
        let pid = match self.display.integer_property(native, Property::NetWmPid) {
            Ok(Some(pid)) => pid,
            Ok(None) => return Ok(()),
            Err(DisplayError::BadWindow(n)) => return Err(SessionError::Vanished(n)),
            Err(e) => {
                debug!("pid of 0x{:08x} unavailable: {}", native, e);
                return Ok(());
            }
        };
        let Some(session) = self.launcher.session_of(pid) else {
            return Ok(());
        };
        let found = self.screens.iter().find_map(|s| {
            s.slots
                .iter()
                .position(|slot| slot.pid == Some(session))
                .map(|i| s.slot_ref(i))
        });
        let Some(desktop) = found else {
            return Ok(());
        };

        let slot = &mut self.screens[desktop.screen.0].slots[desktop.slot];
        if !slot.is_menu() {
            debug!(
                "slot {} of pid {} already hosts a window, ignoring hint",
                desktop.slot, pid
            );
            return Ok(());
        }
        slot.host();
        self.assign(id, desktop.screen, Some(desktop));
        info!(
            "window 0x{:08x} (pid {}) joins screen {} slot {}",
            native, pid, desktop.screen.0, desktop.slot
        );
        compositor::invalidate_menus(&mut self.screens);
        Ok(())
    }

    /// Give a window a fresh slot on `sid`.  Returns the slot to activate.
    fn allocate_slot(
        &mut self,
        id: WindowId,
        sid: ScreenId,
    ) -> Result<(ScreenId, usize), SessionError> {
        let screen = &mut self.screens[sid.0];
        let Some(index) = screen.first_available_slot() else {
            error!("screen {}: all {} slots are in use", sid.0, SLOT_COUNT);
            return Err(SessionError::SlotsExhausted { screen: sid.0 });
        };
        let desktop = screen.slot_ref(index);
        let stale = screen.slots[index].reset();
        screen.slots[index].host();
        screen.history.push(index);
        if let Some(picture) = stale {
            if let Err(e) = self.display.free_picture(picture) {
                debug!("freeing thumbnail: {}", e);
            }
        }
        self.assign(id, sid, Some(desktop));
        debug!("screen {}: slot {} allocated", sid.0, index);
        Ok((sid, index))
    }

    /// Apply the geometry policy of the window's type, configuring it when
    /// the target changes.
    fn constrain_window(&mut self, id: WindowId) -> Result<(), SessionError> {
        let Some(w) = self.registry.get(id) else {
            return Ok(());
        };
        if w.is_unmanaged() {
            return Ok(());
        }
        let Some(sid) = w.screen else {
            return Ok(());
        };
        let area = self.screens[sid.0].area;
        let strip = desktop_strip_height(&area, &self.config.layout);
        let Some(target) = constrain(w.window_type, &area, strip, &w.target) else {
            return Ok(());
        };
        let native = w.native;
        if let Some(w) = self.registry.get_mut(id) {
            w.target = target;
        }
        self.display
            .configure_window(native, &target, ConfigureMask::GEOMETRY)?;
        Ok(())
    }

    /// Build the slot thumbnail from the window's icon, once per slot.
    fn grab_thumbnail(&mut self, id: WindowId) -> Result<(), SessionError> {
        let Some(w) = self.registry.get(id) else {
            return Ok(());
        };
        let Some(desktop) = w.desktop else {
            return Ok(());
        };
        let native = w.native;
        let screen = &self.screens[desktop.screen.0];
        if screen.slots[desktop.slot].thumbnail.is_some() {
            return Ok(());
        }
        let (width, height) = thumbnail_size(&screen.area, &self.config.layout);

        let data = match self.display.cardinal_array(native, Property::NetWmIcon) {
            Ok(data) => data,
            Err(DisplayError::BadWindow(n)) => return Err(SessionError::Vanished(n)),
            Err(e) => {
                debug!("icon of 0x{:08x} unavailable: {}", native, e);
                return Ok(());
            }
        };
        let Some(icon) = select_icon(&data, width, height) else {
            return Ok(());
        };
        match self.display.create_thumbnail(&icon, width, height) {
            Ok(picture) => {
                let slot = &mut self.screens[desktop.screen.0].slots[desktop.slot];
                slot.thumbnail = Some(picture);
                slot.dirty = true;
            }
            Err(e) => warn!("thumbnail for 0x{:08x} dropped: {}", native, e),
        }
        Ok(())
    }

    fn surface_mapped(&mut self, native: NativeId) -> Result<(), SessionError> {
        let Some(w) = self.registry.by_native_mut(native) else {
            return Ok(());
        };
        if w.window_type != WindowType::Internal && w.composition.is_none() {
            match self.display.create_composition(native) {
                Ok(composition) => w.composition = Some(composition),
                Err(DisplayError::BadWindow(n)) => return Err(SessionError::Vanished(n)),
                Err(e) => warn!("0x{:08x} will not be composited: {}", native, e),
            }
        }
        w.flags |= WindowFlags::MAPPED | WindowFlags::DIRTY;
        Ok(())
    }

    fn surface_unmapped(&mut self, native: NativeId) -> Result<(), SessionError> {
        let Some(w) = self.registry.by_native_mut(native) else {
            return Ok(());
        };
        if let Some(composition) = w.composition.take() {
            if let Err(e) = self.display.destroy_composition(composition) {
                debug!("releasing composition of 0x{:08x}: {}", native, e);
            }
        }
        if w.is_unmanaged() {
            w.flags.remove(WindowFlags::MAPPED);
        }
        let Some(desktop) = w.desktop else {
            return Ok(());
        };
        if self.screens[desktop.screen.0].active() == desktop.slot {
            self.refocus(desktop.screen, CURRENT_TIME)?;
        }
        Ok(())
    }

    fn configure_request(
        &mut self,
        native: NativeId,
        geometry: Rect,
        mask: ConfigureMask,
    ) -> Result<(), SessionError> {
        let Some(id) = self.registry.lookup(native) else {
            return Ok(());
        };
        self.registry.resolve_hints(id, &mut self.display);
        let Some(w) = self.registry.get(id) else {
            return Ok(());
        };

        let mut requested = w.target;
        if mask.contains(ConfigureMask::X) {
            requested.x = geometry.x;
        }
        if mask.contains(ConfigureMask::Y) {
            requested.y = geometry.y;
        }
        if mask.contains(ConfigureMask::WIDTH) {
            requested.width = geometry.width;
        }
        if mask.contains(ConfigureMask::HEIGHT) {
            requested.height = geometry.height;
        }

        if let (false, Some(sid)) = (w.is_unmanaged(), w.screen) {
            let area = self.screens[sid.0].area;
            let strip = desktop_strip_height(&area, &self.config.layout);
            if let Some(resolved) = constrain(w.window_type, &area, strip, &requested) {
                requested = resolved;
            }
        }

        if let Some(w) = self.registry.get_mut(id) {
            w.target = requested;
        }
        self.display
            .configure_window(native, &requested, mask | ConfigureMask::GEOMETRY)?;
        Ok(())
    }

    //  Slots and focus

    /// Make `index` the active slot of `sid`.
    ///
    /// No-op if it already is.  The new mapped set is shown before the old
    /// one is hidden, and `index` is pushed onto the history.
    pub fn set_active(&mut self, sid: ScreenId, index: usize, time: Time) -> Result<(), SessionError> {
        let index = index % SLOT_COUNT;
        if self.screens[sid.0].active() == index {
            return Ok(());
        }
        let plan = focus::plan(&self.registry, &self.screens[sid.0], index);
        let focus_time = (sid == self.current).then_some(time);
        let mut vanished = focus::realize(
            &mut self.display,
            &mut self.registry,
            &self.screens[sid.0],
            &plan,
            focus_time,
        )?;

        let screen = &mut self.screens[sid.0];
        screen.set_active_index(index);
        screen.history.push(index);
        screen.invalidate();

        let stale = focus::unmap_stale(&mut self.display, &mut self.registry, &self.screens[sid.0])?;
        vanished.0.extend(stale.0);
        info!("screen {}: slot {} active", sid.0, index);
        self.forget(vanished)
    }

    /// Re-derive the mapped set of the active slot of `sid`.
    pub fn refocus(&mut self, sid: ScreenId, time: Time) -> Result<(), SessionError> {
        let screen = &self.screens[sid.0];
        let plan = focus::plan(&self.registry, screen, screen.active());
        let focus_time = (sid == self.current).then_some(time);
        let mut vanished =
            focus::realize(&mut self.display, &mut self.registry, screen, &plan, focus_time)?;
        let stale = focus::unmap_stale(&mut self.display, &mut self.registry, &self.screens[sid.0])?;
        vanished.0.extend(stale.0);
        self.screens[sid.0].invalidate();
        self.forget(vanished)
    }

    fn forget(&mut self, vanished: focus::Vanished) -> Result<(), SessionError> {
        for native in vanished.0 {
            self.destroy_window(native)?;
        }
        Ok(())
    }

    /// Activate a slot of the current screen directly, resetting its history.
    pub fn select_slot(&mut self, index: usize, time: Time) -> Result<(), SessionError> {
        if index >= SLOT_COUNT {
            return Ok(());
        }
        let sid = self.current;
        if self.screens[sid.0].active() == index {
            return Ok(());
        }
        self.screens[sid.0].history.push_reset(index);
        self.set_active(sid, index, time)
    }

    /// Exchange slots `a` and `b` of `sid`.  If one of them is active, the
    /// active index follows its content.
    pub fn swap_slots(&mut self, sid: ScreenId, a: usize, b: usize) {
        let screen = &mut self.screens[sid.0];
        let active = screen.active();
        slots::swap(screen, &mut self.registry, a, b);
        let follow = if active == a {
            Some(b)
        } else if active == b {
            Some(a)
        } else {
            None
        };
        if let Some(index) = follow {
            screen.history.replace_top(index);
            screen.set_active_index(index);
        }
        screen.invalidate();
    }

    fn step(&mut self, delta: isize, swap: bool, time: Time) -> Result<(), SessionError> {
        let sid = self.current;
        let screen = &self.screens[sid.0];
        let target = screen.step_target(delta);
        if swap {
            let active = screen.active();
            self.swap_slots(sid, target, active);
            Ok(())
        } else {
            self.set_active(sid, target, time)
        }
    }

    //  Actions

    fn apply(&mut self, action: Action) -> Result<(), SessionError> {
        debug!("action {:?}", action);
        match action {
            Action::RunNamed(name) => self.run_named(&name),
            Action::Launch { command, time } => {
                let sid = self.current;
                let slot = self.screens[sid.0].active();
                self.launch_into(sid, slot, &command, time).map(|_| ())
            }
            Action::SelectSlot { index, time } => self.select_slot(index, time),
            Action::Step { delta, swap, time } => self.step(delta, swap, time),
            Action::FocusScreen { index, time } => {
                if index >= self.screens.len() {
                    debug!("no screen {}", index);
                    return Ok(());
                }
                self.current = ScreenId(index);
                self.refocus(self.current, time)
            }
            Action::CloseActive { time } => {
                let screen = self.current_screen();
                if screen.active_slot().is_menu() {
                    return Ok(());
                }
                let primary = focus::primary_window(&self.registry, screen, screen.active())
                    .and_then(|id| self.registry.get(id))
                    .map(|w| w.native);
                if let Some(native) = primary {
                    info!("asking 0x{:08x} to close", native);
                    self.display.send_close_request(native, time)?;
                }
                Ok(())
            }
            Action::Menu(edit) => self.edit_menu(edit),
            Action::Quit => {
                info!("quit requested");
                self.quit = true;
                Ok(())
            }
        }
    }

    fn edit_menu(&mut self, edit: MenuEdit) -> Result<(), SessionError> {
        let sid = self.current;
        let screen = &mut self.screens[sid.0];
        match edit {
            MenuEdit::Append(text) => {
                let room = MAX_QUERY_LEN.saturating_sub(screen.query.chars().count());
                screen.query.extend(text.chars().take(room));
            }
            MenuEdit::BackSpace => {
                screen.query.pop();
            }
            MenuEdit::Clear => screen.query.clear(),
            MenuEdit::Submit { time } => {
                let command = std::mem::take(&mut screen.query);
                if command.trim().is_empty() {
                    return Ok(());
                }
                let slot = screen.active();
                self.launch_into(sid, slot, &command, time)?;
            }
        }
        Ok(())
    }

    /// Run `command` on behalf of slot `slot` of `sid`.  A slot still
    /// showing the menu remembers the process so its first window lands
    /// there.
    pub fn launch_into(
        &mut self,
        sid: ScreenId,
        slot: usize,
        command: &str,
        time: Time,
    ) -> Result<u32, SessionError> {
        let request = LaunchRequest::shell(
            command,
            SlotEnv {
                startup_id: time,
                slot,
                state_dir: self.state_dir.clone(),
            },
        );
        let pid = self
            .launcher
            .launch(&request)
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let target = &mut self.screens[sid.0].slots[slot];
        if target.is_menu() {
            target.pid = Some(pid);
            target.started_at = time;
        }
        Ok(pid)
    }

    fn run_named(&mut self, name: &str) -> Result<(), SessionError> {
        let dirs = [
            self.state_dir.join("commands"),
            PathBuf::from(SYSTEM_COMMAND_DIR),
        ];
        let Some(path) = resolve_named_command(&dirs, name) else {
            debug!("no command named {:?}", name);
            return Ok(());
        };
        self.launcher
            .launch(&LaunchRequest::program(path, None))
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        Ok(())
    }

    //  Startup

    fn auto_launch(&mut self) {
        for s in 0..self.screens.len() {
            for slot in 0..SLOT_COUNT {
                let Some(command) = self.config.auto_launch(s, slot).map(str::to_owned) else {
                    continue;
                };
                if let Err(e) = self.launch_into(ScreenId(s), slot, &command, CURRENT_TIME) {
                    error!("auto-launch of {:?} failed: {}", command, e);
                }
            }
        }
    }

    fn adopt_existing(&mut self) -> Result<(), SessionError> {
        for native in self.display.existing_windows()? {
            if self.registry.lookup(native).is_some() {
                continue;
            }
            let attrs = match self.display.window_attributes(native) {
                Ok(attrs) => attrs,
                Err(e) => {
                    debug!("skipping 0x{:08x}: {}", native, e);
                    continue;
                }
            };
            self.registry
                .create(native, attrs.geometry, attrs.override_redirect);
            if !attrs.viewable {
                continue;
            }
            let result = if attrs.override_redirect {
                self.surface_mapped(native)
            } else {
                self.map_request(native)
            };
            match self.recover(result) {
                Ok(()) => {}
                Err(e @ SessionError::Display(_)) => return Err(e),
                Err(e) => error!("adopting 0x{:08x}: {}", native, e),
            }
        }
        Ok(())
    }

    //  Loop integration

    /// Repaint what changed.
    pub fn paint(&mut self, now: Instant) -> Result<PaintReport, SessionError> {
        let desktop_list = self
            .router
            .desktop_list_visible()
            .then_some(self.current);
        self.painter
            .paint(
                &mut self.display,
                &mut self.registry,
                &mut self.screens,
                desktop_list,
                now,
            )
            .map_err(|e| SessionError::Display(e.to_string()))
    }

    /// Earliest pending menu redraw.
    pub fn next_deadline(&self) -> Option<Instant> {
        compositor::next_deadline(&self.screens)
    }

    /// Invalidate menus whose redraw deadline passed.
    pub fn tick(&mut self, now: Instant) {
        if compositor::expire_deadlines(&mut self.screens, now) {
            trace!("menu refresh due");
        }
    }

    /// The readiness wait timed out: redraw menus (clock).
    pub fn on_idle(&mut self) {
        compositor::invalidate_menus(&mut self.screens);
    }

    /// Collect exited children.
    pub fn reap(&mut self) {
        for exit in self.launcher.reap() {
            match (exit.code, exit.signal) {
                (Some(0), _) => debug!("pid {} exited", exit.pid),
                (Some(code), _) => info!("pid {} exited with status {}", exit.pid, code),
                (None, Some(signal)) => info!("pid {} killed by signal {}", exit.pid, signal),
                (None, None) => debug!("pid {} exited", exit.pid),
            }
        }
    }
}

fn painter_for(config: &Config) -> PaintScheduler {
    PaintScheduler::new(
        config.compositor.osd_opacity,
        Duration::from_millis(config.compositor.menu_refresh_ms),
    )
}

//  Tests
