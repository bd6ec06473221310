//! In-memory X server for unit tests
//!
//! Implements [`XServer`] with just enough server behaviour for the display
//! core: windows with event masks, properties, selections, extensions,
//! serials, a clock, and the PropertyNotify/DestroyNotify events those
//! generate. Every request is logged so tests can assert on order.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use x11rb::protocol::Event;
use x11rb::protocol::sync;
use x11rb::protocol::xinput;
use x11rb::protocol::xproto::*;

use crate::wm::error::XError;
use crate::wm::extensions::ExtensionKind;
use crate::wm::server::{
    EventAndSeq, ExtensionCodes, HelperKind, PropertyValue, ScreenSetup, SequenceNumber, XServer,
};

const ROOT: Window = 0x100;
const OVERLAY: Window = 0x3f_ffff;
const FOREIGN_OWNER: Window = 0x0dea_d000;

/// A request as seen by the fake server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    InternAtoms { count: usize },
    QueryExtension { name: &'static str },
    QueryExtensionVersion { name: &'static str },
    SetSyncPriority { priority: i32 },
    GetSelectionOwner { selection: Atom },
    SetSelectionOwner { owner: Window, selection: Atom, time: u32 },
    CreateWindow { window: Window, parent: Window, kind: HelperKind },
    ConfigureWindow { window: Window, width: u32, height: u32 },
    MapWindow { window: Window },
    DestroyWindow { window: Window },
    SelectInput { window: Window, mask: EventMask, trapped: bool },
    ChangeProperty { window: Window, property: Atom, mode: PropMode, len: usize, trapped: bool },
    GetProperty { window: Window, property: Atom },
    DeleteProperty { window: Window, property: Atom },
    SendClientMessage { destination: Window, message_type: Atom, data: [u32; 5] },
    GrabServer,
    UngrabServer,
    SetInputFocus { window: Window, time: u32 },
    XiSelectEvents { window: Window, mask: u32 },
    SelectCursorInput { window: Window, enabled: bool },
    GetOverlayWindow { window: Window },
    ReleaseOverlayWindow { window: Window },
    Sync,
    WaitForEvent,
}

/// How a pre-existing selection owner reacts to being replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldOwner {
    /// Destroys its selection window once the selection is taken
    Exits,
    /// Never goes away
    Stays,
}

#[derive(Debug, Clone)]
struct FakeWindow {
    event_mask: EventMask,
    mapped: bool,
    width: u32,
    height: u32,
}

struct State {
    requests: Vec<Request>,
    serial: SequenceNumber,
    clock: u32,
    trap_depth: u32,
    disconnected: bool,

    atoms: HashMap<String, Atom>,
    next_atom: Atom,
    windows: HashMap<Window, FakeWindow>,
    next_window: Window,
    properties: HashMap<(Window, Atom), PropertyValue>,
    selections: HashMap<Atom, Window>,
    old_owners: HashMap<Window, OldOwner>,
    stolen_selections: HashSet<Atom>,

    extensions: HashMap<ExtensionKind, ExtensionCodes>,
    versions: HashMap<ExtensionKind, Option<(u32, u32)>>,

    failing: HashSet<Window>,
    redirect_taken: bool,
    queue: VecDeque<EventAndSeq>,
}

impl State {
    fn new() -> Self {
        let mut windows = HashMap::new();
        windows.insert(
            ROOT,
            FakeWindow {
                event_mask: EventMask::NO_EVENT,
                mapped: true,
                width: 1920,
                height: 1080,
            },
        );

        let atoms = [
            ("PRIMARY", 1),
            ("ATOM", 4),
            ("CARDINAL", 6),
            ("STRING", 31),
            ("WINDOW", 33),
            ("WM_ICON_SIZE", 38),
            ("WM_NAME", 39),
        ]
        .into_iter()
        .map(|(name, atom)| (name.to_string(), atom))
        .collect();

        let mut extensions = HashMap::new();
        let mut versions = HashMap::new();
        for (i, kind) in ExtensionKind::ALL.into_iter().enumerate() {
            let i = i as u8;
            extensions.insert(
                kind,
                ExtensionCodes {
                    major_opcode: 128 + i,
                    first_event: 64 + i * 4,
                    first_error: 150 + i * 8,
                },
            );
            let version = match kind {
                ExtensionKind::Sync => (3, 1),
                ExtensionKind::Shape => (1, 1),
                ExtensionKind::Composite => (0, 4),
                ExtensionKind::Damage => (1, 1),
                ExtensionKind::XFixes => (5, 0),
                ExtensionKind::XInput => (2, 3),
            };
            versions.insert(kind, Some(version));
        }

        Self {
            requests: Vec::new(),
            serial: 1,
            clock: 100,
            trap_depth: 0,
            disconnected: false,
            atoms,
            next_atom: 300,
            windows,
            next_window: 0x20_0001,
            properties: HashMap::new(),
            selections: HashMap::new(),
            old_owners: HashMap::new(),
            stolen_selections: HashSet::new(),
            extensions,
            versions,
            failing: HashSet::new(),
            redirect_taken: false,
            queue: VecDeque::new(),
        }
    }

    /// Log a request and give it the next serial
    fn record(&mut self, request: Request) -> Result<SequenceNumber, XError> {
        if self.disconnected {
            return Err(XError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection to the fake server was closed",
            )));
        }
        self.requests.push(request);
        let serial = self.serial;
        self.serial += 1;
        Ok(serial)
    }

    fn check_window(&self, request: &'static str, window: Window) -> Result<(), XError> {
        if self.failing.contains(&window) || !self.windows.contains_key(&window) {
            return Err(XError::Rejected {
                request,
                resource: window,
            });
        }
        Ok(())
    }

    fn tick(&mut self) -> u32 {
        let time = self.clock;
        self.clock = self.clock.wrapping_add(1);
        time
    }

    fn intern(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.atoms.get(name) {
            return *atom;
        }
        let atom = self.next_atom;
        self.next_atom += 1;
        self.atoms.insert(name.to_string(), atom);
        atom
    }

    fn selects(&self, window: Window, mask: EventMask) -> bool {
        self.windows
            .get(&window)
            .is_some_and(|w| w.event_mask.contains(mask))
    }

    fn destroy(&mut self, window: Window, serial: SequenceNumber) {
        let notify = self.selects(window, EventMask::STRUCTURE_NOTIFY);
        self.windows.remove(&window);
        self.properties.retain(|(w, _), _| *w != window);
        self.selections.retain(|_, owner| *owner != window);
        if notify {
            self.queue.push_back((destroy_notify(window), serial));
        }
    }
}

/// Scriptable in-memory X server; clones share state
#[derive(Clone)]
pub struct FakeServer {
    name: String,
    state: Rc<RefCell<State>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            name: ":0".to_string(),
            state: Rc::new(RefCell::new(State::new())),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.borrow().requests.clone()
    }

    /// Atom for `name`, interning it if needed
    pub fn atom(&self, name: &str) -> Atom {
        self.state.borrow_mut().intern(name)
    }

    /// Make every later request fail as if the connection broke
    pub fn disconnect(&self) {
        self.state.borrow_mut().disconnected = true;
    }

    pub fn remove_extension(&self, kind: ExtensionKind) {
        self.state.borrow_mut().extensions.remove(&kind);
    }

    /// Extension is present but its version negotiation fails
    pub fn refuse_version(&self, kind: ExtensionKind) {
        self.state.borrow_mut().versions.insert(kind, None);
    }

    pub fn set_extension_version(&self, kind: ExtensionKind, version: (u32, u32)) {
        self.state.borrow_mut().versions.insert(kind, Some(version));
    }

    /// Every request naming `window` is rejected
    pub fn fail_requests_on(&self, window: Window) {
        self.state.borrow_mut().failing.insert(window);
    }

    /// Another client already selected SubstructureRedirect on the root
    pub fn take_substructure_redirect(&self) {
        self.state.borrow_mut().redirect_taken = true;
    }

    /// Another client owns `selection`; returns its window
    pub fn seed_selection_owner(&self, selection: Atom, behaviour: OldOwner) -> Window {
        let mut state = self.state.borrow_mut();
        let window = state.next_window;
        state.next_window += 1;
        state.windows.insert(
            window,
            FakeWindow {
                event_mask: EventMask::NO_EVENT,
                mapped: false,
                width: 1,
                height: 1,
            },
        );
        state.selections.insert(selection, window);
        state.old_owners.insert(window, behaviour);
        window
    }

    /// A competing client grabs `selection` right after our claim
    pub fn steal_selection_after_claim(&self, selection: Atom) {
        self.state.borrow_mut().stolen_selections.insert(selection);
    }

    pub fn selection_owner(&self, selection: Atom) -> Window {
        self.state
            .borrow()
            .selections
            .get(&selection)
            .copied()
            .unwrap_or(x11rb::NONE)
    }

    pub fn window_exists(&self, window: Window) -> bool {
        self.state.borrow().windows.contains_key(&window)
    }

    pub fn window_count(&self) -> usize {
        self.state.borrow().windows.len()
    }

    pub fn is_mapped(&self, window: Window) -> bool {
        self.state
            .borrow()
            .windows
            .get(&window)
            .is_some_and(|w| w.mapped)
    }

    pub fn window_size(&self, window: Window) -> Option<(u32, u32)> {
        self.state
            .borrow()
            .windows
            .get(&window)
            .map(|w| (w.width, w.height))
    }

    /// Event mask this client selected on `window`
    pub fn event_mask(&self, window: Window) -> EventMask {
        self.state
            .borrow()
            .windows
            .get(&window)
            .map(|w| w.event_mask)
            .unwrap_or(EventMask::NO_EVENT)
    }

    pub fn property_bytes(&self, window: Window, property: Atom) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .properties
            .get(&(window, property))
            .map(|p| p.value.clone())
    }

    pub fn property32(&self, window: Window, property: Atom) -> Option<Vec<u32>> {
        self.property_bytes(window, property).map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
    }

    /// Set the server clock
    pub fn set_time(&self, time: u32) {
        self.state.borrow_mut().clock = time;
    }

    /// Serial the next request will get
    pub fn next_serial(&self) -> SequenceNumber {
        self.state.borrow().serial
    }

    pub fn push_event(&self, event: Event) {
        let mut state = self.state.borrow_mut();
        let serial = state.serial.saturating_sub(1);
        state.queue.push_back((event, serial));
    }
}

impl XServer for FakeServer {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn screen(&self, number: usize) -> Option<ScreenSetup> {
        (number == 0).then_some(ScreenSetup {
            root: ROOT,
            width: 1920,
            height: 1080,
            root_depth: 24,
            root_visual: 0x21,
        })
    }

    fn intern_atoms(&self, names: &[&str]) -> Result<Vec<Atom>, XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::InternAtoms { count: names.len() })?;
        Ok(names.iter().map(|name| state.intern(name)).collect())
    }

    fn query_extension(&self, kind: ExtensionKind) -> Result<Option<ExtensionCodes>, XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::QueryExtension { name: kind.name() })?;
        Ok(state.extensions.get(&kind).copied())
    }

    fn query_extension_version(&self, kind: ExtensionKind) -> Result<Option<(u32, u32)>, XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::QueryExtensionVersion { name: kind.name() })?;
        Ok(state.versions.get(&kind).copied().flatten())
    }

    fn set_sync_priority(&self, priority: i32) -> Result<(), XError> {
        self.state
            .borrow_mut()
            .record(Request::SetSyncPriority { priority })?;
        Ok(())
    }

    fn get_selection_owner(&self, selection: Atom) -> Result<Window, XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::GetSelectionOwner { selection })?;
        Ok(state
            .selections
            .get(&selection)
            .copied()
            .unwrap_or(x11rb::NONE))
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: u32) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        let serial = state.record(Request::SetSelectionOwner {
            owner,
            selection,
            time,
        })?;
        if owner != x11rb::NONE {
            state.check_window("SetSelectionOwner", owner)?;
        }

        let previous = state.selections.get(&selection).copied();
        if owner == x11rb::NONE {
            state.selections.remove(&selection);
        } else {
            state.selections.insert(selection, owner);
        }

        if let Some(previous) = previous.filter(|p| *p != owner) {
            if state.old_owners.get(&previous) == Some(&OldOwner::Exits) {
                state.destroy(previous, serial);
            }
        }
        if owner != x11rb::NONE && state.stolen_selections.remove(&selection) {
            state.selections.insert(selection, FOREIGN_OWNER);
        }
        Ok(())
    }

    fn create_window(&self, parent: Window, kind: HelperKind) -> Result<Window, XError> {
        let mut state = self.state.borrow_mut();
        let window = state.next_window;
        state.record(Request::CreateWindow {
            window,
            parent,
            kind,
        })?;
        state.check_window("CreateWindow", parent)?;
        state.next_window += 1;

        let (event_mask, width, height) = match kind {
            HelperKind::Offscreen { event_mask } => (event_mask, 1, 1),
            HelperKind::InputOnly { width, height, .. } => {
                (EventMask::NO_EVENT, width.into(), height.into())
            }
        };
        state.windows.insert(
            window,
            FakeWindow {
                event_mask,
                mapped: false,
                width,
                height,
            },
        );
        Ok(window)
    }

    fn configure_window(
        &self,
        window: Window,
        _x: i32,
        _y: i32,
        width: u32,
        height: u32,
    ) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::ConfigureWindow {
            window,
            width,
            height,
        })?;
        state.check_window("ConfigureWindow", window)?;
        if let Some(w) = state.windows.get_mut(&window) {
            w.width = width;
            w.height = height;
        }
        Ok(())
    }

    fn map_window(&self, window: Window) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::MapWindow { window })?;
        state.check_window("MapWindow", window)?;
        if let Some(w) = state.windows.get_mut(&window) {
            w.mapped = true;
        }
        Ok(())
    }

    fn destroy_window(&self, window: Window) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        let serial = state.record(Request::DestroyWindow { window })?;
        state.check_window("DestroyWindow", window)?;
        state.destroy(window, serial);
        Ok(())
    }

    fn select_input(&self, window: Window, event_mask: EventMask) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        let trapped = state.trap_depth > 0;
        state.record(Request::SelectInput {
            window,
            mask: event_mask,
            trapped,
        })?;
        state.check_window("ChangeWindowAttributes", window)?;
        if window == ROOT
            && state.redirect_taken
            && event_mask.contains(EventMask::SUBSTRUCTURE_REDIRECT)
        {
            return Err(XError::Rejected {
                request: "ChangeWindowAttributes",
                resource: window,
            });
        }
        if let Some(w) = state.windows.get_mut(&window) {
            w.event_mask = event_mask;
        }
        Ok(())
    }

    fn change_property(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        let trapped = state.trap_depth > 0;
        let serial = state.record(Request::ChangeProperty {
            window,
            property,
            mode,
            len: data.len(),
            trapped,
        })?;
        state.check_window("ChangeProperty", window)?;

        let entry = state
            .properties
            .entry((window, property))
            .or_insert_with(|| PropertyValue {
                type_,
                format,
                value: Vec::new(),
            });
        if mode == PropMode::REPLACE {
            entry.type_ = type_;
            entry.format = format;
            entry.value = data.to_vec();
        } else if mode == PropMode::APPEND {
            entry.value.extend_from_slice(data);
        } else {
            let mut value = data.to_vec();
            value.extend_from_slice(&entry.value);
            entry.value = value;
        }

        if state.selects(window, EventMask::PROPERTY_CHANGE) {
            let time = state.tick();
            state
                .queue
                .push_back((property_notify(window, property, time), serial));
        }
        Ok(())
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        _type: Atom,
        _long_length: u32,
    ) -> Result<Option<PropertyValue>, XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::GetProperty { window, property })?;
        state.check_window("GetProperty", window)?;
        Ok(state.properties.get(&(window, property)).cloned())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::DeleteProperty { window, property })?;
        state.check_window("DeleteProperty", window)?;
        state.properties.remove(&(window, property));
        Ok(())
    }

    fn send_client_message(
        &self,
        destination: Window,
        _event_mask: EventMask,
        event: ClientMessageEvent,
    ) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::SendClientMessage {
            destination,
            message_type: event.type_,
            data: event.data.as_data32(),
        })?;
        state.check_window("SendEvent", destination)
    }

    fn grab_server(&self) -> Result<(), XError> {
        self.state.borrow_mut().record(Request::GrabServer)?;
        Ok(())
    }

    fn ungrab_server(&self) -> Result<(), XError> {
        self.state.borrow_mut().record(Request::UngrabServer)?;
        Ok(())
    }

    fn set_input_focus(
        &self,
        window: Window,
        _revert_to: InputFocus,
        time: u32,
    ) -> Result<SequenceNumber, XError> {
        let mut state = self.state.borrow_mut();
        let serial = state.record(Request::SetInputFocus { window, time })?;
        if state.failing.contains(&window) {
            return Err(XError::Rejected {
                request: "SetInputFocus",
                resource: window,
            });
        }
        Ok(serial)
    }

    fn xi_select_events(&self, window: Window, mask: u32) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::XiSelectEvents { window, mask })?;
        state.check_window("XISelectEvents", window)
    }

    fn select_cursor_input(&self, window: Window, enabled: bool) -> Result<(), XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::SelectCursorInput { window, enabled })?;
        state.check_window("XFixesSelectCursorInput", window)
    }

    fn get_overlay_window(&self, window: Window) -> Result<Window, XError> {
        let mut state = self.state.borrow_mut();
        state.record(Request::GetOverlayWindow { window })?;
        state.check_window("CompositeGetOverlayWindow", window)?;
        Ok(OVERLAY)
    }

    fn release_overlay_window(&self, window: Window) -> Result<(), XError> {
        self.state
            .borrow_mut()
            .record(Request::ReleaseOverlayWindow { window })?;
        Ok(())
    }

    fn flush(&self) -> Result<(), XError> {
        Ok(())
    }

    fn sync(&self) -> Result<(), XError> {
        self.state.borrow_mut().record(Request::Sync)?;
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<EventAndSeq>, XError> {
        Ok(self.state.borrow_mut().queue.pop_front())
    }

    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<Option<EventAndSeq>, XError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(Request::WaitForEvent);
        match state.queue.pop_front() {
            Some(event) => Ok(Some(event)),
            None if timeout.is_some() => Ok(None),
            // Nothing can arrive later, a real server would block forever
            None => Err(XError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "fake server has no more events",
            ))),
        }
    }

    fn push_error_trap(&self) {
        self.state.borrow_mut().trap_depth += 1;
    }

    fn pop_error_trap(&self) {
        let mut state = self.state.borrow_mut();
        state.trap_depth = state.trap_depth.saturating_sub(1);
    }

    fn error_trap_depth(&self) -> u32 {
        self.state.borrow().trap_depth
    }
}

pub fn property_notify(window: Window, atom: Atom, time: u32) -> Event {
    Event::PropertyNotify(PropertyNotifyEvent {
        response_type: PROPERTY_NOTIFY_EVENT,
        sequence: 0,
        window,
        atom,
        time,
        state: Property::NEW_VALUE,
    })
}

pub fn destroy_notify(window: Window) -> Event {
    Event::DestroyNotify(DestroyNotifyEvent {
        response_type: DESTROY_NOTIFY_EVENT,
        sequence: 0,
        event: window,
        window,
    })
}

pub fn selection_clear(owner: Window, selection: Atom, time: u32) -> Event {
    Event::SelectionClear(SelectionClearEvent {
        response_type: SELECTION_CLEAR_EVENT,
        sequence: 0,
        time,
        owner,
        selection,
    })
}

pub fn alarm_notify(alarm: u32, time: u32) -> Event {
    Event::SyncAlarmNotify(sync::AlarmNotifyEvent {
        response_type: sync::ALARM_NOTIFY_EVENT,
        kind: 0,
        sequence: 0,
        alarm,
        counter_value: sync::Int64 { hi: 0, lo: 0 },
        alarm_value: sync::Int64 { hi: 0, lo: 0 },
        timestamp: time,
        state: sync::ALARMSTATE::ACTIVE,
    })
}

/// XI2 FocusIn on `window` from the virtual core keyboard
pub fn xi_focus_in(window: Window, time: u32) -> Event {
    Event::XinputFocusIn(xinput::FocusInEvent {
        response_type: GE_GENERIC_EVENT,
        extension: 128 + ExtensionKind::XInput as u8,
        sequence: 0,
        length: 0,
        event_type: xinput::FOCUS_IN_EVENT,
        deviceid: 3,
        time,
        sourceid: 3,
        mode: xinput::NotifyMode::NORMAL,
        detail: xinput::NotifyDetail::NONLINEAR,
        root: ROOT,
        event: window,
        child: x11rb::NONE,
        root_x: 0,
        root_y: 0,
        event_x: 0,
        event_y: 0,
        same_screen: true,
        focus: true,
        mods: xinput::ModifierInfo {
            base: 0,
            latched: 0,
            locked: 0,
            effective: 0,
        },
        group: xinput::GroupInfo {
            base: 0,
            latched: 0,
            locked: 0,
            effective: 0,
        },
        buttons: Vec::new(),
    })
}
