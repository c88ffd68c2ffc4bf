//! [`DisplayConnection`] implementation with no windowing system behind it.
//!
//! Windows exist only as far as the socket client announced them through
//! `SurfaceCreated` events.  Map, unmap and configure commands answer with
//! the notification a real server would send, so the session sees its own
//! requests take effect.  Everything else is logged and acknowledged.

use super::listener::SocketListener;
use super::{HeadlessError, WindowDescription, WireMessage};
use crate::display::{
    Composite, Composition, ConfigureMask, DamageId, DisplayConnection, DisplayError,
    DisplayEvent, NativeId, OutputInfo, PictureId, Property, ScreenSurface, SwitcherView, Time,
    WindowAttributes,
};
use crate::geometry::Rect;
use crate::registry::WindowType;
use crate::thumbnail::IconImage;
use calloop::channel::{self, Channel};
use log::{debug, error, info, trace};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

/// Native ids handed out for the window manager's own surfaces.
const SURFACE_ID_BASE: NativeId = 0x0040_0000;

/// Output used when none is configured.
const DEFAULT_OUTPUT: Rect = Rect {
    x: 0,
    y: 0,
    width: 1920,
    height: 1080,
};

#[derive(Debug)]
struct Surface {
    geometry: Rect,
    override_redirect: bool,
    mapped: bool,
    description: Option<WindowDescription>,
}

/// A display fed from a channel of [`WireMessage`]s.
pub struct HeadlessDisplay {
    outputs: Vec<OutputInfo>,
    feed: Option<Channel<WireMessage>>,
    queue: VecDeque<DisplayEvent>,
    /// Known windows, ordered by id.
    windows: BTreeMap<NativeId, Surface>,
    next_surface: NativeId,
    next_resource: u32,
}

impl HeadlessDisplay {
    /// Listen on `path` and build a display reporting `outputs`.
    ///
    /// The listener runs on its own thread for the lifetime of the process.
    pub fn spawn(path: impl AsRef<Path>, outputs: Vec<Rect>) -> Result<Self, HeadlessError> {
        let (tx, feed) = channel::channel();
        let path = path.as_ref().to_path_buf();
        std::thread::Builder::new()
            .name("headless-listener".into())
            .spawn(move || {
                let mut listener = SocketListener::new(&path);
                if let Err(e) = listener.run(tx) {
                    error!("headless listener error: {}", e);
                }
            })?;
        Ok(Self::new(outputs, Some(feed)))
    }

    /// Build a display reporting `outputs`, optionally fed by `feed`.
    pub fn new(outputs: Vec<Rect>, feed: Option<Channel<WireMessage>>) -> Self {
        let areas = if outputs.is_empty() {
            vec![DEFAULT_OUTPUT]
        } else {
            outputs
        };
        Self {
            outputs: areas
                .into_iter()
                .enumerate()
                .map(|(i, area)| OutputInfo {
                    name: format!("HEADLESS-{}", i + 1),
                    area,
                })
                .collect(),
            feed,
            queue: VecDeque::new(),
            windows: BTreeMap::new(),
            next_surface: SURFACE_ID_BASE,
            next_resource: 1,
        }
    }

    /// Mirror injected events in the window table.
    fn track(&mut self, event: &DisplayEvent) {
        match event {
            DisplayEvent::SurfaceCreated {
                window,
                geometry,
                override_redirect,
            } => {
                let surface = self.windows.entry(*window).or_insert(Surface {
                    geometry: *geometry,
                    override_redirect: *override_redirect,
                    mapped: false,
                    description: None,
                });
                surface.geometry = *geometry;
                surface.override_redirect = *override_redirect;
            }
            DisplayEvent::SurfaceDestroyed { window } => {
                self.windows.remove(window);
            }
            DisplayEvent::SurfaceMapped { window } => {
                if let Some(s) = self.windows.get_mut(window) {
                    s.mapped = true;
                }
            }
            DisplayEvent::SurfaceUnmapped { window } => {
                if let Some(s) = self.windows.get_mut(window) {
                    s.mapped = false;
                }
            }
            DisplayEvent::ConfigureNotify { window, geometry } => {
                if let Some(s) = self.windows.get_mut(window) {
                    s.geometry = *geometry;
                }
            }
            _ => {}
        }
    }

    fn surface(&self, window: NativeId) -> Result<&Surface, DisplayError> {
        self.windows
            .get(&window)
            .ok_or(DisplayError::BadWindow(window))
    }

    fn surface_mut(&mut self, window: NativeId) -> Result<&mut Surface, DisplayError> {
        self.windows
            .get_mut(&window)
            .ok_or(DisplayError::BadWindow(window))
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_resource;
        self.next_resource = self.next_resource.wrapping_add(1);
        id
    }
}

impl DisplayConnection for HeadlessDisplay {
    type Feed = WireMessage;

    fn outputs(&mut self) -> Result<Vec<OutputInfo>, DisplayError> {
        Ok(self.outputs.clone())
    }

    fn create_screen_surface(&mut self, area: &Rect) -> Result<ScreenSurface, DisplayError> {
        let window = self.next_surface;
        self.next_surface += 1;
        self.windows.insert(
            window,
            Surface {
                geometry: *area,
                override_redirect: true,
                mapped: false,
                description: None,
            },
        );
        let front = PictureId(self.allocate());
        let back = PictureId(self.allocate());
        info!("screen surface 0x{:08x} covers {:?}", window, area);
        Ok(ScreenSurface {
            window,
            front,
            back,
        })
    }

    fn existing_windows(&mut self) -> Result<Vec<NativeId>, DisplayError> {
        Ok(self
            .windows
            .keys()
            .copied()
            .filter(|w| *w < SURFACE_ID_BASE || *w >= self.next_surface)
            .collect())
    }

    fn take_feed(&mut self) -> Option<Channel<WireMessage>> {
        self.feed.take()
    }

    /// Descriptions are stored; events update the window table and queue up.
    fn deliver(&mut self, message: WireMessage) {
        match message {
            WireMessage::Describe(description) => {
                let window = description.window;
                let surface = self.windows.entry(window).or_insert(Surface {
                    geometry: Rect::default(),
                    override_redirect: false,
                    mapped: false,
                    description: None,
                });
                surface.description = Some(description);
                debug!("described 0x{:08x}", window);
            }
            WireMessage::Event(event) => {
                self.track(&event);
                self.queue.push_back(event);
            }
        }
    }

    fn has_pending(&mut self) -> bool {
        !self.queue.is_empty()
    }

    fn next_event(&mut self) -> Option<DisplayEvent> {
        self.queue.pop_front()
    }

    fn window_attributes(&mut self, window: NativeId) -> Result<WindowAttributes, DisplayError> {
        let s = self.surface(window)?;
        Ok(WindowAttributes {
            geometry: s.geometry,
            override_redirect: s.override_redirect,
            viewable: s.mapped,
        })
    }

    fn window_type(&mut self, window: NativeId) -> Result<WindowType, DisplayError> {
        let s = self.surface(window)?;
        Ok(s.description
            .as_ref()
            .map_or(WindowType::Normal, |d| d.window_type))
    }

    fn transient_for(&mut self, window: NativeId) -> Result<Option<NativeId>, DisplayError> {
        let s = self.surface(window)?;
        Ok(s.description.as_ref().and_then(|d| d.transient_for))
    }

    fn integer_property(
        &mut self,
        window: NativeId,
        property: Property,
    ) -> Result<Option<u32>, DisplayError> {
        let s = self.surface(window)?;
        let Some(d) = &s.description else {
            return Ok(None);
        };
        Ok(match property {
            Property::NetWmPid => d.pid,
            Property::NetWmIcon => d.icon.first().copied(),
        })
    }

    fn cardinal_array(
        &mut self,
        window: NativeId,
        property: Property,
    ) -> Result<Vec<u32>, DisplayError> {
        let s = self.surface(window)?;
        let Some(d) = &s.description else {
            return Ok(Vec::new());
        };
        Ok(match property {
            Property::NetWmIcon => d.icon.clone(),
            Property::NetWmPid => d.pid.into_iter().collect(),
        })
    }

    fn map_window(&mut self, window: NativeId, at: &Rect) -> Result<(), DisplayError> {
        let s = self.surface_mut(window)?;
        if s.mapped {
            return Ok(());
        }
        s.mapped = true;
        s.geometry = *at;
        info!("map 0x{:08x} at {:?}", window, at);
        self.queue.push_back(DisplayEvent::SurfaceMapped { window });
        Ok(())
    }

    fn unmap_window(&mut self, window: NativeId) -> Result<(), DisplayError> {
        let s = self.surface_mut(window)?;
        if !s.mapped {
            return Ok(());
        }
        s.mapped = false;
        info!("unmap 0x{:08x}", window);
        self.queue.push_back(DisplayEvent::SurfaceUnmapped { window });
        Ok(())
    }

    fn configure_window(
        &mut self,
        window: NativeId,
        geometry: &Rect,
        mask: ConfigureMask,
    ) -> Result<(), DisplayError> {
        let s = self.surface_mut(window)?;
        let mut next = s.geometry;
        if mask.contains(ConfigureMask::X) {
            next.x = geometry.x;
        }
        if mask.contains(ConfigureMask::Y) {
            next.y = geometry.y;
        }
        if mask.contains(ConfigureMask::WIDTH) {
            next.width = geometry.width;
        }
        if mask.contains(ConfigureMask::HEIGHT) {
            next.height = geometry.height;
        }
        s.geometry = next;
        debug!("configure 0x{:08x} to {:?}", window, next);
        self.queue.push_back(DisplayEvent::ConfigureNotify {
            window,
            geometry: next,
        });
        Ok(())
    }

    fn set_input_focus(&mut self, window: NativeId, time: Time) -> Result<(), DisplayError> {
        self.surface(window)?;
        info!("focus 0x{:08x} (time {})", window, time);
        Ok(())
    }

    fn send_close_request(&mut self, window: NativeId, time: Time) -> Result<(), DisplayError> {
        self.surface(window)?;
        info!("close request to 0x{:08x} (time {})", window, time);
        Ok(())
    }

    fn create_composition(&mut self, window: NativeId) -> Result<Composition, DisplayError> {
        self.surface(window)?;
        let picture = PictureId(self.allocate());
        let damage = DamageId(self.allocate());
        Ok(Composition { picture, damage })
    }

    fn destroy_composition(&mut self, composition: Composition) -> Result<(), DisplayError> {
        trace!("release {:?}", composition);
        Ok(())
    }

    fn subtract_damage(&mut self, damage: DamageId) -> Result<(), DisplayError> {
        trace!("subtract {:?}", damage);
        Ok(())
    }

    fn composite(&mut self, op: &Composite) -> Result<(), DisplayError> {
        trace!("composite {:?}", op);
        Ok(())
    }

    fn create_thumbnail(
        &mut self,
        icon: &IconImage,
        width: u32,
        height: u32,
    ) -> Result<PictureId, DisplayError> {
        let (x, y) = icon.centered_in(width, height);
        let picture = PictureId(self.allocate());
        debug!(
            "thumbnail {:?}: {}x{} icon at {},{} in {}x{}",
            picture, icon.width, icon.height, x, y, width, height
        );
        Ok(picture)
    }

    fn free_picture(&mut self, picture: PictureId) -> Result<(), DisplayError> {
        trace!("free {:?}", picture);
        Ok(())
    }

    fn draw_menu(&mut self, target: PictureId, view: &SwitcherView<'_>) -> Result<(), DisplayError> {
        debug!(
            "menu into {:?}: slot {} query {:?}",
            target, view.active, view.query
        );
        Ok(())
    }

    fn draw_desktop_list(
        &mut self,
        target: PictureId,
        view: &SwitcherView<'_>,
    ) -> Result<(), DisplayError> {
        let hosting = view.slots.iter().filter(|s| !s.is_menu()).count();
        debug!(
            "desktop list into {:?}: slot {} active, {} hosting",
            target, view.active, hosting
        );
        Ok(())
    }
}

//  Tests
