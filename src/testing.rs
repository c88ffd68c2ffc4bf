//! Recording doubles for the collaborator traits.
//!
//! [`RecorderDisplay`] answers queries from descriptions registered by the
//! test and logs every command; [`RecorderLauncher`] hands out fake pids.

use crate::display::{
    Composite, Composition, ConfigureMask, DamageId, DisplayConnection, DisplayError,
    DisplayEvent, NativeId, OutputInfo, PictureId, Property, ScreenSurface, SwitcherView, Time,
    WindowAttributes,
};
use crate::geometry::Rect;
use crate::launch::{Exit, LaunchError, LaunchRequest, Launcher};
use crate::registry::WindowType;
use crate::thumbnail::IconImage;
use calloop::channel::{self, Channel, Sender};
use std::collections::{HashMap, HashSet, VecDeque};

/// One command issued through [`DisplayConnection`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    Map(NativeId, Rect),
    Unmap(NativeId),
    Configure(NativeId, Rect, ConfigureMask),
    Focus(NativeId, Time),
    Close(NativeId, Time),
    CreateComposition(NativeId),
    DestroyComposition(Composition),
    SubtractDamage(DamageId),
    Composite(Composite),
    CreateThumbnail { width: u32, height: u32 },
    FreePicture(PictureId),
    DrawMenu(PictureId),
    DrawDesktopList(PictureId),
    Flush,
}

#[derive(Debug, Clone)]
struct Description {
    window_type: WindowType,
    transient_for: Option<NativeId>,
    pid: Option<u32>,
    icon: Vec<u32>,
}

/// A [`DisplayConnection`] that records commands instead of sending them.
#[derive(Debug)]
pub struct RecorderDisplay {
    pub log: Vec<Cmd>,
    pub events: VecDeque<DisplayEvent>,
    pub outputs: Vec<OutputInfo>,
    /// Pre-existing windows with their attributes, in stacking order.
    pub existing: Vec<(NativeId, WindowAttributes)>,
    /// Windows that answer every request with `BadWindow`.
    pub gone: HashSet<NativeId>,
    pub fail_flush: bool,
    feed: Option<Channel<DisplayEvent>>,
    descriptions: HashMap<NativeId, Description>,
    next_resource: u32,
}

impl RecorderDisplay {
    /// One 1920×1080 output, no windows.
    pub fn new() -> Self {
        Self::with_outputs(vec![Rect::new(0, 0, 1920, 1080)])
    }

    pub fn with_outputs(areas: Vec<Rect>) -> Self {
        Self {
            log: Vec::new(),
            events: VecDeque::new(),
            outputs: areas
                .into_iter()
                .enumerate()
                .map(|(i, area)| OutputInfo {
                    name: format!("OUT-{}", i),
                    area,
                })
                .collect(),
            existing: Vec::new(),
            gone: HashSet::new(),
            fail_flush: false,
            feed: None,
            descriptions: HashMap::new(),
            next_resource: 1,
        }
    }

    /// Sender whose events reach the event loop through the feed.
    pub fn feed(&mut self) -> Sender<DisplayEvent> {
        let (tx, rx) = channel::channel();
        self.feed = Some(rx);
        tx
    }

    /// Register the hints `native` reports.  Replaces any earlier description.
    pub fn describe(
        &mut self,
        native: NativeId,
        window_type: WindowType,
        transient_for: Option<NativeId>,
        pid: Option<u32>,
    ) {
        let icon = self
            .descriptions
            .get(&native)
            .map(|d| d.icon.clone())
            .unwrap_or_default();
        self.descriptions.insert(
            native,
            Description {
                window_type,
                transient_for,
                pid,
                icon,
            },
        );
    }

    pub fn set_icon(&mut self, native: NativeId, data: Vec<u32>) {
        if let Some(d) = self.descriptions.get_mut(&native) {
            d.icon = data;
        }
    }

    pub fn push_event(&mut self, event: DisplayEvent) {
        self.events.push_back(event);
    }

    /// Drain the command log.
    pub fn take_log(&mut self) -> Vec<Cmd> {
        std::mem::take(&mut self.log)
    }

    /// Windows mapped since the log was last drained, in order.
    pub fn maps(&self) -> Vec<NativeId> {
        self.log
            .iter()
            .filter_map(|c| match c {
                Cmd::Map(w, _) => Some(*w),
                _ => None,
            })
            .collect()
    }

    pub fn unmaps(&self) -> Vec<NativeId> {
        self.log
            .iter()
            .filter_map(|c| match c {
                Cmd::Unmap(w) => Some(*w),
                _ => None,
            })
            .collect()
    }

    /// Most recent focus target.
    pub fn last_focus(&self) -> Option<NativeId> {
        self.log.iter().rev().find_map(|c| match c {
            Cmd::Focus(w, _) => Some(*w),
            _ => None,
        })
    }

    pub fn composites(&self) -> Vec<Composite> {
        self.log
            .iter()
            .filter_map(|c| match c {
                Cmd::Composite(op) => Some(*op),
                _ => None,
            })
            .collect()
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_resource;
        self.next_resource += 1;
        id
    }

    fn check(&self, window: NativeId) -> Result<(), DisplayError> {
        if self.gone.contains(&window) {
            Err(DisplayError::BadWindow(window))
        } else {
            Ok(())
        }
    }

    fn description(&self, window: NativeId) -> Result<&Description, DisplayError> {
        self.check(window)?;
        self.descriptions
            .get(&window)
            .ok_or(DisplayError::BadWindow(window))
    }
}

impl DisplayConnection for RecorderDisplay {
    type Feed = DisplayEvent;

    fn outputs(&mut self) -> Result<Vec<OutputInfo>, DisplayError> {
        Ok(self.outputs.clone())
    }

    fn create_screen_surface(&mut self, _area: &Rect) -> Result<ScreenSurface, DisplayError> {
        let window = 0x1000 + self.allocate();
        let front = PictureId(self.allocate());
        let back = PictureId(self.allocate());
        Ok(ScreenSurface {
            window,
            front,
            back,
        })
    }

    fn existing_windows(&mut self) -> Result<Vec<NativeId>, DisplayError> {
        Ok(self.existing.iter().map(|(w, _)| *w).collect())
    }

    fn take_feed(&mut self) -> Option<Channel<DisplayEvent>> {
        self.feed.take()
    }

    fn deliver(&mut self, event: DisplayEvent) {
        self.events.push_back(event);
    }

    fn has_pending(&mut self) -> bool {
        !self.events.is_empty()
    }

    fn next_event(&mut self) -> Option<DisplayEvent> {
        self.events.pop_front()
    }

    fn window_attributes(&mut self, window: NativeId) -> Result<WindowAttributes, DisplayError> {
        self.check(window)?;
        self.existing
            .iter()
            .find(|(w, _)| *w == window)
            .map(|(_, a)| *a)
            .ok_or(DisplayError::BadWindow(window))
    }

    fn window_type(&mut self, window: NativeId) -> Result<WindowType, DisplayError> {
        Ok(self.description(window)?.window_type)
    }

    fn transient_for(&mut self, window: NativeId) -> Result<Option<NativeId>, DisplayError> {
        Ok(self.description(window)?.transient_for)
    }

    fn integer_property(
        &mut self,
        window: NativeId,
        property: Property,
    ) -> Result<Option<u32>, DisplayError> {
        let d = self.description(window)?;
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
        let d = self.description(window)?;
        Ok(match property {
            Property::NetWmIcon => d.icon.clone(),
            Property::NetWmPid => d.pid.into_iter().collect(),
        })
    }

    fn map_window(&mut self, window: NativeId, at: &Rect) -> Result<(), DisplayError> {
        self.check(window)?;
        self.log.push(Cmd::Map(window, *at));
        Ok(())
    }

    fn unmap_window(&mut self, window: NativeId) -> Result<(), DisplayError> {
        self.check(window)?;
        self.log.push(Cmd::Unmap(window));
        Ok(())
    }

    fn configure_window(
        &mut self,
        window: NativeId,
        geometry: &Rect,
        mask: ConfigureMask,
    ) -> Result<(), DisplayError> {
        self.check(window)?;
        self.log.push(Cmd::Configure(window, *geometry, mask));
        Ok(())
    }

    fn set_input_focus(&mut self, window: NativeId, time: Time) -> Result<(), DisplayError> {
        self.check(window)?;
        self.log.push(Cmd::Focus(window, time));
        Ok(())
    }

    fn send_close_request(&mut self, window: NativeId, time: Time) -> Result<(), DisplayError> {
        self.check(window)?;
        self.log.push(Cmd::Close(window, time));
        Ok(())
    }

    fn create_composition(&mut self, window: NativeId) -> Result<Composition, DisplayError> {
        self.check(window)?;
        self.log.push(Cmd::CreateComposition(window));
        let picture = PictureId(self.allocate());
        let damage = DamageId(self.allocate());
        Ok(Composition { picture, damage })
    }

    fn destroy_composition(&mut self, composition: Composition) -> Result<(), DisplayError> {
        self.log.push(Cmd::DestroyComposition(composition));
        Ok(())
    }

    fn subtract_damage(&mut self, damage: DamageId) -> Result<(), DisplayError> {
        self.log.push(Cmd::SubtractDamage(damage));
        Ok(())
    }

    fn composite(&mut self, op: &Composite) -> Result<(), DisplayError> {
        self.log.push(Cmd::Composite(*op));
        Ok(())
    }

    fn create_thumbnail(
        &mut self,
        _icon: &IconImage,
        width: u32,
        height: u32,
    ) -> Result<PictureId, DisplayError> {
        self.log.push(Cmd::CreateThumbnail { width, height });
        Ok(PictureId(self.allocate()))
    }

    fn free_picture(&mut self, picture: PictureId) -> Result<(), DisplayError> {
        self.log.push(Cmd::FreePicture(picture));
        Ok(())
    }

    fn draw_menu(&mut self, target: PictureId, _view: &SwitcherView<'_>) -> Result<(), DisplayError> {
        self.log.push(Cmd::DrawMenu(target));
        Ok(())
    }

    fn draw_desktop_list(
        &mut self,
        target: PictureId,
        _view: &SwitcherView<'_>,
    ) -> Result<(), DisplayError> {
        self.log.push(Cmd::DrawDesktopList(target));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        if self.fail_flush {
            return Err(DisplayError::Connection("flush failed".into()));
        }
        self.log.push(Cmd::Flush);
        Ok(())
    }
}

/// A [`Launcher`] that never starts anything.
#[derive(Debug)]
pub struct RecorderLauncher {
    pub launched: Vec<LaunchRequest>,
    /// Process → session mapping answered by `session_of`.
    pub sessions: HashMap<u32, u32>,
    /// Exits handed out by the next `reap`.
    pub pending_exits: Vec<Exit>,
    pub fail: bool,
    next_pid: u32,
}

impl RecorderLauncher {
    pub fn new() -> Self {
        Self {
            launched: Vec::new(),
            sessions: HashMap::new(),
            pending_exits: Vec::new(),
            fail: false,
            next_pid: 1000,
        }
    }

    /// Pretend `pid` runs in the session led by `leader`.
    pub fn join_session(&mut self, pid: u32, leader: u32) {
        self.sessions.insert(pid, leader);
    }
}

impl Launcher for RecorderLauncher {
    fn launch(&mut self, request: &LaunchRequest) -> Result<u32, LaunchError> {
        if self.fail {
            return Err(LaunchError::Spawn {
                command: format!("{:?}", request.kind),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        self.launched.push(request.clone());
        if request.env.is_some() {
            self.sessions.insert(pid, pid);
        }
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<Exit> {
        std::mem::take(&mut self.pending_exits)
    }

    fn session_of(&self, pid: u32) -> Option<u32> {
        self.sessions.get(&pid).copied()
    }
}
