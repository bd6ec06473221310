//! Focus Module
//!
//! Timestamp acquisition and focus-change arbitration.
//!
//! Focus requests are stamped with the serial of the SetInputFocus request.
//! The request is followed by a marker property write inside a server grab,
//! so the two serials are adjacent and no other client's request can land in
//! between. A later FocusIn carrying one of those serials was caused by us.

use std::time::Duration;

use tracing::{debug, warn};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{Atom, InputFocus, PropMode, Window};

use crate::wm::atoms::Atoms;
use crate::wm::error::DisplayError;
use crate::wm::error_trap::ErrorTrap;
use crate::wm::events::EventQueue;
use crate::wm::server::{SequenceNumber, XServer};
use crate::wm::time::{CURRENT_TIME, Timestamp, is_before};

/// Outcome of [`FocusArbiter::timestamp_too_old`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Usable, possibly corrected, timestamp
    Fresh(Timestamp),
    TooOld,
}

impl Freshness {
    pub fn is_too_old(self) -> bool {
        self == Freshness::TooOld
    }
}

/// Who caused a focus change the server reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    /// Generated before our pending request was processed
    Stale,
    /// Result of our own focus request
    Requested,
    /// Some other client moved the focus
    External,
}

/// Callback armed by the focus policy to raise a window after a delay
struct Autoraise {
    window: Window,
    callback: Box<dyn FnOnce(Window)>,
}

/// Timestamp and focus bookkeeping of a display session
pub struct FocusArbiter {
    /// Window that receives timestamp pings and focus markers
    pinging_window: Window,
    ping_atom: Atom,
    focus_set_atom: Atom,
    string_atom: Atom,
    wait_timeout: Option<Duration>,

    last_focus_time: Timestamp,
    last_user_time: Timestamp,
    /// Time of the event being dispatched, if any
    current_time: Timestamp,

    focus_window: Window,
    focus_serial: SequenceNumber,
    server_focus_window: Window,
    server_focus_serial: SequenceNumber,
    pending_request: Option<SequenceNumber>,

    autoraise: Option<Autoraise>,
}

impl FocusArbiter {
    pub fn new(
        atoms: &Atoms,
        pinging_window: Window,
        startup_time: Timestamp,
        wait_timeout: Option<Duration>,
    ) -> Self {
        Self {
            pinging_window,
            ping_atom: atoms._AREA_TIMESTAMP_PING,
            focus_set_atom: atoms._AREA_FOCUS_SET,
            string_atom: atoms.STRING,
            wait_timeout,
            last_focus_time: startup_time,
            last_user_time: CURRENT_TIME,
            current_time: CURRENT_TIME,
            focus_window: x11rb::NONE,
            focus_serial: 0,
            server_focus_window: x11rb::NONE,
            server_focus_serial: 0,
            pending_request: None,
            autoraise: None,
        }
    }

    pub fn pinging_window(&self) -> Window {
        self.pinging_window
    }

    pub fn last_focus_time(&self) -> Timestamp {
        self.last_focus_time
    }

    pub fn last_user_time(&self) -> Timestamp {
        self.last_user_time
    }

    /// Record the time of the latest user interaction
    pub fn note_user_time(&mut self, time: Timestamp) {
        if time != CURRENT_TIME {
            self.last_user_time = time;
        }
    }

    /// Cached time of the event being dispatched, `CURRENT_TIME` outside
    /// dispatch
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn set_current_time(&mut self, time: Timestamp) {
        self.current_time = time;
    }

    pub fn clear_current_time(&mut self) {
        self.current_time = CURRENT_TIME;
    }

    /// A valid server timestamp, doing a round trip if no event time is
    /// cached
    pub fn get_current_time_roundtrip<S: XServer + ?Sized>(
        &mut self,
        server: &S,
        events: &mut EventQueue,
    ) -> Result<Timestamp, DisplayError> {
        let mut timestamp = self.current_time;

        if timestamp == CURRENT_TIME {
            server.change_property(
                PropMode::APPEND,
                self.pinging_window,
                self.ping_atom,
                self.string_atom,
                8,
                &[],
            )?;

            let (window, atom) = (self.pinging_window, self.ping_atom);
            let reply = events.wait_for(server, self.wait_timeout, |event| {
                matches!(event, Event::PropertyNotify(e) if e.window == window && e.atom == atom)
            })?;
            timestamp = match reply {
                Some((Event::PropertyNotify(e), _)) => e.time,
                _ => {
                    return Err(DisplayError::WaitTimeout {
                        what: "a timestamp from the X server",
                    });
                }
            };
            debug!("Timestamp round trip returned {}", timestamp);
        }

        self.sanity_check_timestamps(timestamp);
        Ok(timestamp)
    }

    /// Reset recorded times that claim to be later than the server's clock
    fn sanity_check_timestamps(&mut self, timestamp: Timestamp) {
        if is_before(timestamp, self.last_focus_time) {
            warn!(
                "last_focus_time ({}) is greater than comparison timestamp ({}); \
                 a client probably sent a bogus timestamp, resetting it",
                self.last_focus_time, timestamp
            );
            self.last_focus_time = timestamp;
        }
        if is_before(timestamp, self.last_user_time) {
            warn!(
                "last_user_time ({}) is greater than comparison timestamp ({}); \
                 a client probably sent a bogus timestamp, resetting it",
                self.last_user_time, timestamp
            );
            self.last_user_time = timestamp;
        }
    }

    /// Decide whether `timestamp` may still be used for a focus change
    ///
    /// `CURRENT_TIME` is replaced by a fresh server time. A time before the
    /// last focus change is clamped to it, unless it is also before the
    /// last user interaction.
    pub fn timestamp_too_old<S: XServer + ?Sized>(
        &mut self,
        server: &S,
        events: &mut EventQueue,
        timestamp: Timestamp,
    ) -> Result<Freshness, DisplayError> {
        if timestamp == CURRENT_TIME {
            let now = self.get_current_time_roundtrip(server, events)?;
            return Ok(Freshness::Fresh(now));
        }

        if is_before(timestamp, self.last_focus_time) {
            if is_before(timestamp, self.last_user_time) {
                return Ok(Freshness::TooOld);
            }
            return Ok(Freshness::Fresh(self.last_focus_time));
        }

        Ok(Freshness::Fresh(timestamp))
    }

    /// Move the input focus to `xwindow`
    ///
    /// Returns `false` when the request was dropped for an outdated
    /// timestamp. Server-side failures (the window vanished) are ignored.
    pub fn request_focus_change<S: XServer + ?Sized>(
        &mut self,
        server: &S,
        events: &mut EventQueue,
        xwindow: Window,
        timestamp: Timestamp,
    ) -> Result<bool, DisplayError> {
        let timestamp = match self.timestamp_too_old(server, events, timestamp)? {
            Freshness::Fresh(timestamp) => timestamp,
            Freshness::TooOld => {
                debug!(
                    "Ignoring focus request for 0x{:x} with old timestamp {}",
                    xwindow, timestamp
                );
                return Ok(false);
            }
        };

        let (pinging_window, marker, string) =
            (self.pinging_window, self.focus_set_atom, self.string_atom);
        let serial = ErrorTrap::run(server, "change the input focus", |s| {
            s.grab_server()?;
            let serial = s.set_input_focus(xwindow, InputFocus::POINTER_ROOT, timestamp);
            let marked = serial.and_then(|serial| {
                s.change_property(PropMode::APPEND, pinging_window, marker, string, 8, &[])?;
                Ok(serial)
            });
            // Never leave the server grabbed
            s.ungrab_server()?;
            s.flush()?;
            marked
        });

        match serial {
            Some(serial) => self.update_focus_window(xwindow, serial, true),
            None => debug!("Focus request for 0x{:x} failed", xwindow),
        }
        self.last_focus_time = timestamp;

        if self.autoraise.as_ref().is_some_and(|a| a.window != xwindow) {
            self.remove_autoraise_callback();
        }

        Ok(true)
    }

    /// Record a focus change we requested (`focused_by_us`) or learned about
    pub fn update_focus_window(
        &mut self,
        xwindow: Window,
        serial: SequenceNumber,
        focused_by_us: bool,
    ) {
        self.focus_window = xwindow;
        self.focus_serial = serial;
        if focused_by_us {
            self.pending_request = Some(serial);
        }
        debug!(
            "Focus window 0x{:x} (serial {}, by us: {})",
            xwindow, serial, focused_by_us
        );
    }

    /// Classify a focus change reported by the server
    pub fn note_server_focus(&mut self, xwindow: Window, serial: SequenceNumber) -> FocusChange {
        let change = match self.pending_request {
            Some(pending) if serial < pending => FocusChange::Stale,
            Some(pending) if serial == pending || serial == pending + 1 => {
                FocusChange::Requested
            }
            _ => FocusChange::External,
        };

        if change != FocusChange::Stale {
            self.pending_request = None;
            self.server_focus_window = xwindow;
            self.server_focus_serial = serial;
            if change == FocusChange::External {
                self.update_focus_window(xwindow, serial, false);
            }
        }

        debug!(
            "Server focus 0x{:x} at serial {} classified as {:?}",
            xwindow, serial, change
        );
        change
    }

    pub fn focus_window(&self) -> Window {
        self.focus_window
    }

    pub fn focus_serial(&self) -> SequenceNumber {
        self.focus_serial
    }

    pub fn server_focus_window(&self) -> Window {
        self.server_focus_window
    }

    pub fn server_focus_serial(&self) -> SequenceNumber {
        self.server_focus_serial
    }

    /// Serial of a focus request not yet confirmed by the server
    pub fn pending_request(&self) -> Option<SequenceNumber> {
        self.pending_request
    }

    /// Arm an auto-raise of `window`, replacing any armed one
    pub fn arm_autoraise(&mut self, window: Window, callback: impl FnOnce(Window) + 'static) {
        self.autoraise = Some(Autoraise {
            window,
            callback: Box::new(callback),
        });
    }

    pub fn autoraise_window(&self) -> Option<Window> {
        self.autoraise.as_ref().map(|a| a.window)
    }

    pub fn remove_autoraise_callback(&mut self) {
        if let Some(autoraise) = self.autoraise.take() {
            debug!("Cancelled auto-raise of 0x{:x}", autoraise.window);
        }
    }

    /// Run the armed auto-raise, if any
    pub fn fire_autoraise(&mut self) {
        if let Some(Autoraise { window, callback }) = self.autoraise.take() {
            callback(window);
        }
    }
}
