//! Display Module
//!
//! The display session: one X connection, its atoms and extensions, the
//! helper windows the window manager owns, the manager selection, and the
//! id registry. This is the top-level object of the display core; it is
//! created once by [`Display::open`] and consumed by [`Display::close`].

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};
use x11rb::protocol::Event;
use x11rb::protocol::xinput;
use x11rb::protocol::xproto::{
    AtomEnum, EventMask, FocusInEvent, NotifyDetail, NotifyMode, PropMode, Visualid, Window,
};

use crate::wm::atoms::Atoms;
use crate::wm::error::{DisplayError, XError};
use crate::wm::error_trap::ErrorTrap;
use crate::wm::events::{EventQueue, event_name, event_time};
use crate::wm::extensions::{ExtensionKind, Extensions};
use crate::wm::focus::{FocusArbiter, FocusChange, Freshness};
use crate::wm::hints::HintPublisher;
use crate::wm::registry::{ResourceOwner, Xid, XidRegistry};
use crate::wm::selection::{
    self, ManagerSelection, SelectionClaim, cm_selection_name, wm_selection_name,
};
use crate::wm::server::{EventAndSeq, HelperKind, RustServer, ScreenSetup, SequenceNumber, XServer};
use crate::wm::time::Timestamp;

/// Name stored on the guard window
const GUARD_WINDOW_NAME: &str = "area guard window";

/// Options a session is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayOptions {
    /// X display to connect to, `$DISPLAY` if unset
    pub name: Option<String>,
    /// Replace a running window manager
    pub replace: bool,
    /// Check every request as it is sent
    pub synchronous: bool,
    /// Published as `_NET_WM_NAME` on the leader window
    pub wm_name: String,
    /// Give up waiting for a previous manager to exit after this long
    pub selection_wait_timeout: Option<Duration>,
    /// Give up waiting for a timestamp round trip after this long
    pub timestamp_wait_timeout: Option<Duration>,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            name: None,
            replace: false,
            synchronous: false,
            wm_name: "area".to_string(),
            selection_wait_timeout: None,
            timestamp_wait_timeout: None,
        }
    }
}

/// SYNC alarm event handed to the alarm filter
pub struct AlarmNotification {
    pub alarm: Xid,
    pub timestamp: Timestamp,
    /// Window object the alarm was registered for
    pub owner: Option<Rc<dyn ResourceOwner>>,
}

/// Consumes SYNC alarm events; returns `true` if the event was handled
pub type AlarmFilter = Box<dyn FnMut(&AlarmNotification) -> bool>;

/// What [`Display::handle_event`] did with an event
#[derive(Debug)]
pub enum Dispatch {
    /// Fully processed by the display core
    Handled,
    /// Left for the window manager
    Unhandled(Event),
    /// Another window manager took our selection; the session must close
    ManagerReplaced,
}

/// Top-level display session
pub struct Display<S: XServer> {
    server: S,
    /// `host:display.screen`
    name: String,
    screen_number: usize,
    screen: ScreenSetup,

    atoms: Atoms,
    extensions: Extensions,
    events: EventQueue,
    registry: XidRegistry,
    focus: FocusArbiter,

    /// Timestamp of the leader window setup
    timestamp: Timestamp,
    leader_window: Window,
    no_focus_window: Window,
    guard_window: Option<Window>,
    composite_overlay_window: Option<Window>,

    wm_selection: ManagerSelection,
    cm_selection: Option<ManagerSelection>,
    selection_wait_timeout: Option<Duration>,

    alarm_filter: Option<AlarmFilter>,
}

/// Canonical screen name: the display string with its screen part
/// replaced by `number`
pub fn screen_name(display: &str, number: usize) -> String {
    let base = match display.rfind(':') {
        Some(colon) => match display[colon..].find('.') {
            Some(dot) => &display[..colon + dot],
            None => display,
        },
        None => display,
    };
    format!("{}.{}", base, number)
}

impl Display<RustServer> {
    /// Connect to the X server named in `options` and open its default
    /// screen
    pub fn connect(options: &DisplayOptions) -> Result<Self, DisplayError> {
        let (server, screen_number) =
            RustServer::connect(options.name.as_deref(), options.synchronous)?;
        Self::open(server, screen_number, options)
    }
}

/// Server resources acquired so far, released again if opening fails
#[derive(Default)]
struct Acquired {
    windows: Vec<Window>,
    selection: Option<ManagerSelection>,
}

impl Acquired {
    fn rollback<S: XServer + ?Sized>(self, server: &S, timestamp: Timestamp) {
        if let Some(selection) = &self.selection {
            if let Err(e) = selection::release_selection(server, selection, timestamp) {
                debug!("Could not release {} during rollback: {}", selection.name, e);
            }
        }
        for window in self.windows.into_iter().rev() {
            ErrorTrap::run(server, "destroy helper window", |s| s.destroy_window(window));
        }
        if let Err(e) = server.flush() {
            debug!("Flush during rollback failed: {}", e);
        }
    }
}

impl<S: XServer> Display<S> {
    /// Open a session on `screen_number`
    ///
    /// Either every startup step succeeds, or the resources acquired so far
    /// are released and the first failure is returned.
    pub fn open(
        server: S,
        screen_number: usize,
        options: &DisplayOptions,
    ) -> Result<Self, DisplayError> {
        let name = screen_name(server.display_name(), screen_number);
        info!("Opening display '{}'", name);

        let Some(screen) = server.screen(screen_number) else {
            return Err(DisplayError::InvalidScreen {
                number: screen_number,
                name: server.display_name().to_owned(),
            });
        };

        let atoms = Atoms::intern(&server)?;
        let extensions = Extensions::probe(&server)?;

        let mut acquired = Acquired::default();
        let mut events = EventQueue::new();
        match Self::setup(
            &server,
            &mut events,
            &atoms,
            &extensions,
            &screen,
            screen_number,
            options,
            &mut acquired,
        ) {
            Ok(parts) => {
                info!(
                    "Added screen {} ('{}') root 0x{:x}",
                    screen_number, name, screen.root
                );
                let focus = FocusArbiter::new(
                    &atoms,
                    parts.pinging_window,
                    parts.timestamp,
                    options.timestamp_wait_timeout,
                );
                Ok(Self {
                    server,
                    name,
                    screen_number,
                    screen,
                    atoms,
                    extensions,
                    events,
                    registry: XidRegistry::new(),
                    focus,
                    timestamp: parts.timestamp,
                    leader_window: parts.leader_window,
                    no_focus_window: parts.no_focus_window,
                    guard_window: None,
                    composite_overlay_window: parts.composite_overlay_window,
                    wm_selection: parts.wm_selection,
                    cm_selection: None,
                    selection_wait_timeout: options.selection_wait_timeout,
                    alarm_filter: None,
                })
            }
            Err(e) => {
                warn!("Failed to open display '{}': {}", name, e);
                acquired.rollback(&server, x11rb::CURRENT_TIME);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setup(
        server: &S,
        events: &mut EventQueue,
        atoms: &Atoms,
        extensions: &Extensions,
        screen: &ScreenSetup,
        screen_number: usize,
        options: &DisplayOptions,
        acquired: &mut Acquired,
    ) -> Result<SetupParts, DisplayError> {
        let root = screen.root;

        // The leader window's first PropertyNotify gives us a timestamp
        let leader_window = server.create_window(
            root,
            HelperKind::Offscreen {
                event_mask: EventMask::PROPERTY_CHANGE,
            },
        )?;
        acquired.windows.push(leader_window);

        server.change_property(
            PropMode::REPLACE,
            leader_window,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            8,
            options.wm_name.as_bytes(),
        )?;
        server.change_property(
            PropMode::REPLACE,
            leader_window,
            atoms._AREA_VERSION,
            atoms.UTF8_STRING,
            8,
            env!("CARGO_PKG_VERSION").as_bytes(),
        )?;
        server.change_property32(
            PropMode::REPLACE,
            leader_window,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW.into(),
            &[leader_window],
        )?;

        let notify = events.wait_for(server, options.timestamp_wait_timeout, |event| {
            matches!(event, Event::PropertyNotify(e) if e.window == leader_window)
        })?;
        let timestamp = match notify {
            Some((Event::PropertyNotify(e), _)) => e.time,
            _ => {
                return Err(DisplayError::WaitTimeout {
                    what: "the leader window timestamp",
                });
            }
        };
        debug!("Startup timestamp {}", timestamp);

        // PropertyNotify on the leader window is not relied on after this
        server.select_input(leader_window, EventMask::NO_EVENT)?;

        let pinging_window = server.create_window(
            root,
            HelperKind::Offscreen {
                event_mask: EventMask::PROPERTY_CHANGE,
            },
        )?;
        acquired.windows.push(pinging_window);

        let wm_name = wm_selection_name(screen_number);
        let wm_atom = intern_one(server, &wm_name)?;
        let wm_selection = selection::take_selection(
            server,
            events,
            atoms.MANAGER,
            SelectionClaim {
                root,
                selection: wm_atom,
                name: &wm_name,
                timestamp,
                replace: options.replace,
            },
            options.selection_wait_timeout,
        )?;
        acquired.selection = Some(wm_selection.clone());

        let root_mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::STRUCTURE_NOTIFY
            | EventMask::COLOR_MAP_CHANGE
            | EventMask::PROPERTY_CHANGE;
        if let Err(e) = ErrorTrap::check(server, |s| s.select_input(root, root_mask)) {
            // Only one client may select SubstructureRedirect on the root
            debug!("Selecting root window events failed: {}", e);
            return Err(DisplayError::AlreadyManaged {
                name: server.display_name().to_owned(),
            });
        }

        let mut xi_mask = xinput::XIEventMask::ENTER
            | xinput::XIEventMask::LEAVE
            | xinput::XIEventMask::FOCUS_IN
            | xinput::XIEventMask::FOCUS_OUT;
        if extensions.has_xinput_23() {
            xi_mask = xi_mask | xinput::XIEventMask::BARRIER_HIT | xinput::XIEventMask::BARRIER_LEAVE;
        }
        server.xi_select_events(root, u32::from(xi_mask))?;
        server.select_cursor_input(root, true)?;

        // Holds the focus when no client window does
        let no_focus_window = server.create_window(
            root,
            HelperKind::Offscreen {
                event_mask: EventMask::FOCUS_CHANGE | EventMask::KEY_PRESS | EventMask::KEY_RELEASE,
            },
        )?;
        acquired.windows.push(no_focus_window);
        server.map_window(no_focus_window)?;

        let composite_overlay_window = if extensions.has(ExtensionKind::Composite) {
            Some(server.get_overlay_window(root)?)
        } else {
            None
        };

        let hints = HintPublisher::new(server, atoms, root);
        hints.publish_icon_size();
        hints.publish_supported();
        hints.set_wm_check_hint(leader_window);
        hints.publish_desktop_viewport();
        hints.publish_desktop_geometry(screen.width.into(), screen.height.into());

        server.flush()?;

        Ok(SetupParts {
            timestamp,
            leader_window,
            pinging_window,
            no_focus_window,
            composite_overlay_window,
            wm_selection,
        })
    }

    /// Tear the session down, releasing server resources in reverse order
    /// of acquisition
    ///
    /// Window objects should have unregistered their ids before this.
    pub fn close(mut self, timestamp: Timestamp) -> Result<(), XError> {
        info!("Closing display '{}'", self.name);
        let root = self.screen.root;

        self.hints().unset_wm_check_hint();

        if !self.registry.is_empty() {
            warn!(
                "{} resources still registered while closing the display",
                self.registry.len()
            );
        }
        self.alarm_filter = None;

        if let Some(overlay) = self.composite_overlay_window.take() {
            ErrorTrap::run(&self.server, "release the overlay window", |s| {
                s.release_overlay_window(overlay)
            });
        }

        for window in [self.guard_window.take(), Some(self.no_focus_window)]
            .into_iter()
            .flatten()
        {
            ErrorTrap::run(&self.server, "destroy helper window", |s| {
                s.destroy_window(window)
            });
        }

        let deselected = ErrorTrap::check(&self.server, |s| {
            s.select_input(root, EventMask::NO_EVENT)?;
            s.xi_select_events(root, 0)?;
            s.select_cursor_input(root, false)
        });
        if deselected.is_err() {
            warn!(
                "Could not release screen {} on display \"{}\"",
                self.screen_number,
                self.server.display_name()
            );
        }

        for selection in self.cm_selection.iter().chain(std::iter::once(&self.wm_selection)) {
            if let Err(e) = selection::release_selection(&self.server, selection, timestamp) {
                debug!("Could not release {}: {}", selection.name, e);
            }
        }

        for window in [self.focus.pinging_window(), self.leader_window] {
            ErrorTrap::run(&self.server, "destroy helper window", |s| {
                s.destroy_window(window)
            });
        }

        self.server.flush()
    }

    /// Claim `_NET_WM_CM_S<n>`, replacing any running compositing manager
    pub fn set_cm_selection(&mut self) -> Result<(), DisplayError> {
        let timestamp = self.get_current_time_roundtrip()?;
        let name = cm_selection_name(self.screen_number);
        let selection = self.take_selection(&name, timestamp, true)?;
        self.cm_selection = Some(selection);
        Ok(())
    }

    /// Claim a manager selection on this screen's root window
    pub fn take_selection(
        &mut self,
        name: &str,
        timestamp: Timestamp,
        replace: bool,
    ) -> Result<ManagerSelection, DisplayError> {
        let atom = intern_one(&self.server, name)?;
        selection::take_selection(
            &self.server,
            &mut self.events,
            self.atoms.MANAGER,
            SelectionClaim {
                root: self.screen.root,
                selection: atom,
                name,
                timestamp,
                replace,
            },
            self.selection_wait_timeout,
        )
    }

    /// Issue a harmless request so the next request gets a fresh serial
    pub fn increment_event_serial(&self) -> Result<(), XError> {
        self.server
            .delete_property(self.leader_window, self.atoms._MOTIF_WM_HINTS)
    }

    /// Create the guard window if it does not exist yet
    ///
    /// The guard window covers the whole screen below all client windows so
    /// that clicks outside of any client reach us.
    pub fn ensure_guard_window(&mut self) -> Result<Window, XError> {
        if let Some(window) = self.guard_window {
            return Ok(window);
        }

        let window = self.server.create_window(
            self.screen.root,
            HelperKind::InputOnly {
                x: 0,
                y: 0,
                width: self.screen.width,
                height: self.screen.height,
            },
        )?;
        self.server.change_property(
            PropMode::REPLACE,
            window,
            self.atoms.WM_NAME,
            self.atoms.STRING,
            8,
            GUARD_WINDOW_NAME.as_bytes(),
        )?;
        self.server.map_window(window)?;
        debug!("Created guard window 0x{:x}", window);

        self.guard_window = Some(window);
        Ok(window)
    }

    /// Monitor layout changed: republish the desktop size and resize the
    /// guard window to fill the screen again
    pub fn on_monitors_changed(&mut self, width: u16, height: u16) {
        self.screen.width = width;
        self.screen.height = height;
        self.hints()
            .publish_desktop_geometry(width.into(), height.into());

        if let Some(guard) = self.guard_window {
            ErrorTrap::run(&self.server, "resize the guard window", |s| {
                s.configure_window(guard, 0, 0, width.into(), height.into())
            });
        }
    }

    /// Install or clear the SYNC alarm filter
    ///
    /// # Panics
    /// If a filter is installed while another one is active.
    pub fn set_alarm_filter(&mut self, filter: Option<AlarmFilter>) {
        assert!(
            filter.is_none() || self.alarm_filter.is_none(),
            "an alarm filter is already installed"
        );
        self.alarm_filter = filter;
    }

    /// Route a SYNC alarm to the installed filter
    pub(crate) fn filter_alarm(&mut self, alarm: Xid, timestamp: Timestamp) -> bool {
        let notification = AlarmNotification {
            alarm,
            timestamp,
            owner: self.registry.lookup_sync_alarm(alarm),
        };
        match self.alarm_filter.as_mut() {
            Some(filter) => filter(&notification),
            None => false,
        }
    }

    /// Next event for the main loop, without blocking
    pub fn next_event(&mut self) -> Result<Option<EventAndSeq>, XError> {
        self.events.next_event(&self.server)
    }

    /// First-pass handling of an event
    ///
    /// The event time becomes the session's current time until
    /// [`Display::end_event`] is called.
    pub fn handle_event(&mut self, event: Event, serial: SequenceNumber) -> Dispatch {
        if let Some(time) = event_time(&event) {
            self.focus.set_current_time(time);
        }

        match event {
            Event::Error(e) => {
                warn!(
                    "X error {:?} from request {} (major {}, minor {}) on 0x{:x}",
                    e.error_kind, e.sequence, e.major_opcode, e.minor_opcode, e.bad_value
                );
                Dispatch::Handled
            }
            Event::SyncAlarmNotify(e) if self.extensions.has(ExtensionKind::Sync) => {
                if self.filter_alarm(e.alarm, e.timestamp) {
                    Dispatch::Handled
                } else {
                    Dispatch::Unhandled(Event::SyncAlarmNotify(e))
                }
            }
            Event::SelectionClear(e)
                if e.owner == self.wm_selection.owner && e.selection == self.wm_selection.atom =>
            {
                info!("Lost {} to another window manager", self.wm_selection.name);
                Dispatch::ManagerReplaced
            }
            Event::SelectionClear(e)
                if self
                    .cm_selection
                    .as_ref()
                    .is_some_and(|s| e.owner == s.owner && e.selection == s.atom) =>
            {
                info!("Lost the compositing manager selection");
                if let Some(lost) = self.cm_selection.take() {
                    ErrorTrap::run(&self.server, "destroy selection window", |s| {
                        s.destroy_window(lost.owner)
                    });
                }
                Dispatch::Handled
            }
            Event::FocusIn(e) => {
                self.note_focus_in(&e, serial);
                Dispatch::Unhandled(Event::FocusIn(e))
            }
            Event::XinputFocusIn(e) => {
                self.note_xi_focus_in(&e, serial);
                Dispatch::Unhandled(Event::XinputFocusIn(e))
            }
            other => {
                debug!("Passing on {} (serial {})", event_name(&other), serial);
                Dispatch::Unhandled(other)
            }
        }
    }

    fn note_focus_in(&mut self, event: &FocusInEvent, serial: SequenceNumber) {
        // Focus moving between a window and its children is not a change
        if event.detail == NotifyDetail::INFERIOR
            || event.detail == NotifyDetail::POINTER
            || event.mode == NotifyMode::GRAB
            || event.mode == NotifyMode::UNGRAB
        {
            return;
        }
        if self.focus.note_server_focus(event.event, serial) == FocusChange::External {
            debug!("Focus moved to 0x{:x} by another client", event.event);
        }
    }

    fn note_xi_focus_in(&mut self, event: &xinput::FocusInEvent, serial: SequenceNumber) {
        if event.detail == xinput::NotifyDetail::INFERIOR
            || event.detail == xinput::NotifyDetail::POINTER
            || event.mode == xinput::NotifyMode::GRAB
            || event.mode == xinput::NotifyMode::UNGRAB
        {
            return;
        }
        if self.focus.note_server_focus(event.event, serial) == FocusChange::External {
            debug!("Focus moved to 0x{:x} by another client (XI2)", event.event);
        }
    }

    /// Done with the current event
    pub fn end_event(&mut self) {
        self.focus.clear_current_time();
    }

    pub fn get_current_time_roundtrip(&mut self) -> Result<Timestamp, DisplayError> {
        self.focus
            .get_current_time_roundtrip(&self.server, &mut self.events)
    }

    pub fn timestamp_too_old(&mut self, timestamp: Timestamp) -> Result<Freshness, DisplayError> {
        self.focus
            .timestamp_too_old(&self.server, &mut self.events, timestamp)
    }

    pub fn request_focus_change(
        &mut self,
        xwindow: Window,
        timestamp: Timestamp,
    ) -> Result<bool, DisplayError> {
        self.focus
            .request_focus_change(&self.server, &mut self.events, xwindow, timestamp)
    }

    pub fn focus_the_no_focus_window(&mut self, timestamp: Timestamp) -> Result<bool, DisplayError> {
        let window = self.no_focus_window;
        self.request_focus_change(window, timestamp)
    }

    pub fn is_no_focus_window(&self, xwindow: Window) -> bool {
        xwindow == self.no_focus_window
    }

    pub fn register_window(&mut self, xid: Xid, owner: &Rc<dyn ResourceOwner>) {
        self.registry.register_window(xid, owner);
    }

    pub fn unregister_window(&mut self, xid: Xid) {
        self.registry.unregister(xid);
    }

    pub fn lookup_window(&self, xid: Xid) -> Option<Rc<dyn ResourceOwner>> {
        self.registry.lookup_window(xid)
    }

    pub fn register_sync_alarm(&mut self, xid: Xid, owner: &Rc<dyn ResourceOwner>) {
        self.registry.register_sync_alarm(xid, owner);
    }

    pub fn unregister_sync_alarm(&mut self, xid: Xid) {
        self.registry.unregister(xid);
    }

    pub fn lookup_sync_alarm(&self, xid: Xid) -> Option<Rc<dyn ResourceOwner>> {
        self.registry.lookup_sync_alarm(xid)
    }

    pub fn has_extension(&self, kind: ExtensionKind) -> bool {
        self.extensions.has(kind)
    }

    pub fn extension_event_base(&self, kind: ExtensionKind) -> u8 {
        self.extensions.event_base(kind)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn hints(&self) -> HintPublisher<'_, S> {
        HintPublisher::new(&self.server, &self.atoms, self.screen.root)
    }

    pub fn focus(&self) -> &FocusArbiter {
        &self.focus
    }

    pub fn focus_mut(&mut self) -> &mut FocusArbiter {
        &mut self.focus
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn screen_number(&self) -> usize {
        self.screen_number
    }

    pub fn xroot(&self) -> Window {
        self.screen.root
    }

    pub fn default_depth(&self) -> u8 {
        self.screen.root_depth
    }

    pub fn default_visual(&self) -> Visualid {
        self.screen.root_visual
    }

    /// Timestamp obtained while opening the session
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn leader_window(&self) -> Window {
        self.leader_window
    }

    pub fn no_focus_window(&self) -> Window {
        self.no_focus_window
    }

    pub fn composite_overlay_window(&self) -> Option<Window> {
        self.composite_overlay_window
    }

    pub fn wm_selection(&self) -> &ManagerSelection {
        &self.wm_selection
    }

    pub fn cm_selection(&self) -> Option<&ManagerSelection> {
        self.cm_selection.as_ref()
    }
}

/// Resources created by [`Display::setup`]
struct SetupParts {
    timestamp: Timestamp,
    leader_window: Window,
    pinging_window: Window,
    no_focus_window: Window,
    composite_overlay_window: Option<Window>,
    wm_selection: ManagerSelection,
}

fn intern_one<S: XServer + ?Sized>(server: &S, name: &str) -> Result<u32, XError> {
    server
        .intern_atoms(&[name])?
        .first()
        .copied()
        .ok_or(XError::Rejected {
            request: "InternAtom",
            resource: 0,
        })
}
