//! X Server Module
//!
//! The protocol seam of the display core. Every request the core issues goes
//! through [`XServer`], so the session logic can run against a real
//! connection ([`RustServer`]) or an in-memory double in tests.

use std::cell::Cell;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::cookie::VoidCookie;
use x11rb::errors::ReplyError;
use x11rb::protocol::Event;
use x11rb::protocol::composite::ConnectionExt as _;
use x11rb::protocol::damage::ConnectionExt as _;
use x11rb::protocol::shape::ConnectionExt as _;
use x11rb::protocol::sync::ConnectionExt as _;
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xinput::{self, ConnectionExt as _};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::wm::error::{DisplayError, XError};
use crate::wm::extensions::ExtensionKind;

/// Full (64-bit) request sequence number
pub type SequenceNumber = u64;

/// An event together with the sequence number of the last request the server
/// had processed when it was generated
pub type EventAndSeq = (Event, SequenceNumber);

/// XI2 "all master devices" pseudo device id
pub const XI_ALL_MASTER_DEVICES: u16 = 1;

/// Screen data from the connection setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSetup {
    pub root: Window,
    pub width: u16,
    pub height: u16,
    pub root_depth: u8,
    pub root_visual: Visualid,
}

/// QueryExtension reply for a present extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionCodes {
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
}

/// A property value as returned by GetProperty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub type_: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

/// Helper windows the core creates for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    /// 1x1 override-redirect window at (-100, -100)
    Offscreen { event_mask: EventMask },
    /// Override-redirect InputOnly window covering the given area
    InputOnly {
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    },
}

/// Requests the display core issues against the X server
///
/// Void requests return `Ok(())` as soon as they are queued unless the
/// implementation checks them (synchronous mode or an active error trap).
pub trait XServer {
    /// Display name as the user gave it (or `$DISPLAY`)
    fn display_name(&self) -> &str;

    /// Setup data for a screen, `None` if the screen does not exist
    fn screen(&self, number: usize) -> Option<ScreenSetup>;

    /// Intern all names in one pipelined batch
    fn intern_atoms(&self, names: &[&str]) -> Result<Vec<Atom>, XError>;

    fn query_extension(&self, kind: ExtensionKind) -> Result<Option<ExtensionCodes>, XError>;

    /// Negotiate the extension version; `None` if negotiation failed
    fn query_extension_version(&self, kind: ExtensionKind) -> Result<Option<(u32, u32)>, XError>;

    fn set_sync_priority(&self, priority: i32) -> Result<(), XError>;

    fn get_selection_owner(&self, selection: Atom) -> Result<Window, XError>;

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: u32) -> Result<(), XError>;

    fn create_window(&self, parent: Window, kind: HelperKind) -> Result<Window, XError>;

    fn configure_window(
        &self,
        window: Window,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<(), XError>;

    fn map_window(&self, window: Window) -> Result<(), XError>;

    fn destroy_window(&self, window: Window) -> Result<(), XError>;

    /// Replace the event mask this client selects on `window`
    fn select_input(&self, window: Window, event_mask: EventMask) -> Result<(), XError>;

    fn change_property(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError>;

    fn change_property32(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), XError> {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        self.change_property(mode, window, property, type_, 32, &bytes)
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_length: u32,
    ) -> Result<Option<PropertyValue>, XError>;

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError>;

    fn send_client_message(
        &self,
        destination: Window,
        event_mask: EventMask,
        event: ClientMessageEvent,
    ) -> Result<(), XError>;

    fn grab_server(&self) -> Result<(), XError>;

    fn ungrab_server(&self) -> Result<(), XError>;

    /// Returns the sequence number of the SetInputFocus request
    fn set_input_focus(
        &self,
        window: Window,
        revert_to: InputFocus,
        time: u32,
    ) -> Result<SequenceNumber, XError>;

    /// Select XI2 events for all master devices
    fn xi_select_events(&self, window: Window, mask: u32) -> Result<(), XError>;

    /// Select or deselect XFixes DisplayCursorNotify on `window`
    fn select_cursor_input(&self, window: Window, enabled: bool) -> Result<(), XError>;

    fn get_overlay_window(&self, window: Window) -> Result<Window, XError>;

    fn release_overlay_window(&self, window: Window) -> Result<(), XError>;

    fn flush(&self) -> Result<(), XError>;

    /// Round trip: returns once the server processed everything sent so far
    fn sync(&self) -> Result<(), XError>;

    fn poll_for_event(&self) -> Result<Option<EventAndSeq>, XError>;

    /// Block for the next event; `None` means the timeout elapsed first
    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<Option<EventAndSeq>, XError>;

    fn push_error_trap(&self);

    fn pop_error_trap(&self);

    fn error_trap_depth(&self) -> u32;
}

/// [`XServer`] backed by an x11rb [`RustConnection`]
pub struct RustServer {
    conn: Arc<RustConnection>,
    name: String,
    synchronous: bool,
    trap_depth: Cell<u32>,
}

impl RustServer {
    /// Connect to the X server
    ///
    /// Returns the server and the default screen number from the display
    /// string.
    pub fn connect(name: Option<&str>, synchronous: bool) -> Result<(Self, usize), DisplayError> {
        let display_name = name
            .map(str::to_owned)
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_default();
        info!("Opening display '{}'", display_name);

        let (conn, screen_num) =
            RustConnection::connect(name).map_err(|source| DisplayError::Connect {
                name: display_name.clone(),
                source,
            })?;

        if synchronous {
            info!("Running in synchronous mode, every request is checked");
        }

        Ok((
            Self {
                conn: Arc::new(conn),
                name: display_name,
                synchronous,
                trap_depth: Cell::new(0),
            },
            screen_num,
        ))
    }

    /// Shared handle to the underlying connection
    pub fn connection(&self) -> &Arc<RustConnection> {
        &self.conn
    }

    fn void(&self, cookie: VoidCookie<'_, RustConnection>) -> Result<(), XError> {
        if self.synchronous || self.trap_depth.get() > 0 {
            cookie.check()?;
        }
        // Otherwise a failure arrives later as an error event
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> Result<(), XError> {
        let fd = self.conn.stream().as_raw_fd();
        let mut poll = mio::Poll::new()?;
        let mut events = mio::Events::with_capacity(1);
        poll.registry().register(
            &mut mio::unix::SourceFd(&fd),
            mio::Token(0),
            mio::Interest::READABLE,
        )?;
        poll.poll(&mut events, Some(timeout))?;
        Ok(())
    }
}

/// Map a version reply to `None` when the server refused the query
fn negotiated<R>(
    reply: Result<R, ReplyError>,
    version: impl FnOnce(R) -> (u32, u32),
) -> Result<Option<(u32, u32)>, XError> {
    match reply {
        Ok(reply) => Ok(Some(version(reply))),
        Err(ReplyError::X11Error(e)) => {
            debug!("Extension version query failed: {:?}", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl XServer for RustServer {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn screen(&self, number: usize) -> Option<ScreenSetup> {
        self.conn.setup().roots.get(number).map(|screen| ScreenSetup {
            root: screen.root,
            width: screen.width_in_pixels,
            height: screen.height_in_pixels,
            root_depth: screen.root_depth,
            root_visual: screen.root_visual,
        })
    }

    fn intern_atoms(&self, names: &[&str]) -> Result<Vec<Atom>, XError> {
        let conn = self.conn.as_ref();
        // Send every request before waiting for the first reply
        let cookies = names
            .iter()
            .map(|name| conn.intern_atom(false, name.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut atoms = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            atoms.push(cookie.reply()?.atom);
        }
        Ok(atoms)
    }

    fn query_extension(&self, kind: ExtensionKind) -> Result<Option<ExtensionCodes>, XError> {
        let reply = self
            .conn
            .as_ref()
            .query_extension(kind.name().as_bytes())?
            .reply()?;
        if !reply.present {
            return Ok(None);
        }
        Ok(Some(ExtensionCodes {
            major_opcode: reply.major_opcode,
            first_event: reply.first_event,
            first_error: reply.first_error,
        }))
    }

    fn query_extension_version(&self, kind: ExtensionKind) -> Result<Option<(u32, u32)>, XError> {
        let conn = self.conn.as_ref();
        match kind {
            ExtensionKind::Sync => negotiated(conn.sync_initialize(3, 1)?.reply(), |r| {
                (r.major_version.into(), r.minor_version.into())
            }),
            ExtensionKind::Shape => negotiated(conn.shape_query_version()?.reply(), |r| {
                (r.major_version.into(), r.minor_version.into())
            }),
            ExtensionKind::Composite => {
                negotiated(conn.composite_query_version(0, 4)?.reply(), |r| {
                    (r.major_version, r.minor_version)
                })
            }
            ExtensionKind::Damage => negotiated(conn.damage_query_version(1, 1)?.reply(), |r| {
                (r.major_version, r.minor_version)
            }),
            ExtensionKind::XFixes => negotiated(conn.xfixes_query_version(5, 0)?.reply(), |r| {
                (r.major_version, r.minor_version)
            }),
            ExtensionKind::XInput => {
                negotiated(conn.xinput_xi_query_version(2, 3)?.reply(), |r| {
                    (r.major_version.into(), r.minor_version.into())
                })
            }
        }
    }

    fn set_sync_priority(&self, priority: i32) -> Result<(), XError> {
        self.void(self.conn.as_ref().sync_set_priority(x11rb::NONE, priority)?)
    }

    fn get_selection_owner(&self, selection: Atom) -> Result<Window, XError> {
        Ok(self
            .conn
            .as_ref()
            .get_selection_owner(selection)?
            .reply()?
            .owner)
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: u32) -> Result<(), XError> {
        self.void(
            self.conn
                .as_ref()
                .set_selection_owner(owner, selection, time)?,
        )
    }

    fn create_window(&self, parent: Window, kind: HelperKind) -> Result<Window, XError> {
        let conn = self.conn.as_ref();
        let window = conn.generate_id()?;
        let cookie = match kind {
            HelperKind::Offscreen { event_mask } => conn.create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                window,
                parent,
                -100,
                -100,
                1,
                1,
                0,
                WindowClass::COPY_FROM_PARENT,
                x11rb::COPY_FROM_PARENT,
                &CreateWindowAux::new()
                    .override_redirect(1)
                    .event_mask(event_mask),
            )?,
            HelperKind::InputOnly {
                x,
                y,
                width,
                height,
            } => conn.create_window(
                0,
                window,
                parent,
                x,
                y,
                width,
                height,
                0,
                WindowClass::INPUT_ONLY,
                x11rb::COPY_FROM_PARENT,
                &CreateWindowAux::new()
                    .override_redirect(1)
                    .event_mask(EventMask::NO_EVENT),
            )?,
        };
        self.void(cookie)?;
        Ok(window)
    }

    fn configure_window(
        &self,
        window: Window,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<(), XError> {
        self.void(self.conn.as_ref().configure_window(
            window,
            &ConfigureWindowAux::new()
                .x(x)
                .y(y)
                .width(width)
                .height(height),
        )?)
    }

    fn map_window(&self, window: Window) -> Result<(), XError> {
        self.void(self.conn.as_ref().map_window(window)?)
    }

    fn destroy_window(&self, window: Window) -> Result<(), XError> {
        self.void(self.conn.as_ref().destroy_window(window)?)
    }

    fn select_input(&self, window: Window, event_mask: EventMask) -> Result<(), XError> {
        self.void(self.conn.as_ref().change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(event_mask),
        )?)
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
        let unit = usize::from(format / 8).max(1);
        let data_len = (data.len() / unit) as u32;
        self.void(
            self.conn
                .as_ref()
                .change_property(mode, window, property, type_, format, data_len, data)?,
        )
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_length: u32,
    ) -> Result<Option<PropertyValue>, XError> {
        let reply = self
            .conn
            .as_ref()
            .get_property(false, window, property, type_, 0, long_length)?
            .reply()?;
        if reply.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some(PropertyValue {
            type_: reply.type_,
            format: reply.format,
            value: reply.value,
        }))
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError> {
        self.void(self.conn.as_ref().delete_property(window, property)?)
    }

    fn send_client_message(
        &self,
        destination: Window,
        event_mask: EventMask,
        event: ClientMessageEvent,
    ) -> Result<(), XError> {
        self.void(
            self.conn
                .as_ref()
                .send_event(false, destination, event_mask, event)?,
        )
    }

    fn grab_server(&self) -> Result<(), XError> {
        self.void(self.conn.as_ref().grab_server()?)
    }

    fn ungrab_server(&self) -> Result<(), XError> {
        self.void(self.conn.as_ref().ungrab_server()?)
    }

    fn set_input_focus(
        &self,
        window: Window,
        revert_to: InputFocus,
        time: u32,
    ) -> Result<SequenceNumber, XError> {
        let cookie = self.conn.as_ref().set_input_focus(revert_to, window, time)?;
        let serial = cookie.sequence_number();
        self.void(cookie)?;
        Ok(serial)
    }

    fn xi_select_events(&self, window: Window, mask: u32) -> Result<(), XError> {
        let masks = [xinput::EventMask {
            deviceid: XI_ALL_MASTER_DEVICES,
            mask: vec![mask.into()],
        }];
        self.void(self.conn.as_ref().xinput_xi_select_events(window, &masks)?)
    }

    fn select_cursor_input(&self, window: Window, enabled: bool) -> Result<(), XError> {
        let mask = if enabled {
            xfixes::CursorNotifyMask::DISPLAY_CURSOR
        } else {
            xfixes::CursorNotifyMask::from(0u8)
        };
        self.void(self.conn.as_ref().xfixes_select_cursor_input(window, mask)?)
    }

    fn get_overlay_window(&self, window: Window) -> Result<Window, XError> {
        Ok(self
            .conn
            .as_ref()
            .composite_get_overlay_window(window)?
            .reply()?
            .overlay_win)
    }

    fn release_overlay_window(&self, window: Window) -> Result<(), XError> {
        self.void(self.conn.as_ref().composite_release_overlay_window(window)?)
    }

    fn flush(&self) -> Result<(), XError> {
        self.conn.as_ref().flush()?;
        Ok(())
    }

    fn sync(&self) -> Result<(), XError> {
        self.conn.as_ref().get_input_focus()?.reply()?;
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<EventAndSeq>, XError> {
        Ok(self.conn.as_ref().poll_for_event_with_sequence()?)
    }

    fn wait_for_event(&self, timeout: Option<Duration>) -> Result<Option<EventAndSeq>, XError> {
        let conn = self.conn.as_ref();
        conn.flush()?;

        let Some(timeout) = timeout else {
            return Ok(Some(conn.wait_for_event_with_sequence()?));
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = conn.poll_for_event_with_sequence()? {
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.wait_readable(deadline - now)?;
        }
    }

    fn push_error_trap(&self) {
        self.trap_depth.set(self.trap_depth.get() + 1);
    }

    fn pop_error_trap(&self) {
        let depth = self.trap_depth.get();
        debug_assert!(depth > 0, "error trap popped without push");
        self.trap_depth.set(depth.saturating_sub(1));
    }

    fn error_trap_depth(&self) -> u32 {
        self.trap_depth.get()
    }
}
