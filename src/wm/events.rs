//! Events Module
//!
//! Event intake for the display core. Blocking waits for one specific event
//! (a PropertyNotify carrying a fresh timestamp, the DestroyNotify of a
//! previous window manager) set every other event aside so the main loop
//! still sees it, in arrival order, afterwards.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;
use x11rb::protocol::Event;

use crate::wm::error::XError;
use crate::wm::server::{EventAndSeq, XServer};

/// Events set aside by filtered waits
#[derive(Debug, Default)]
pub struct EventQueue {
    deferred: VecDeque<EventAndSeq>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty()
    }

    /// Next event for the main loop: deferred events first, then whatever
    /// the server already delivered. Never blocks.
    pub fn next_event<S: XServer + ?Sized>(
        &mut self,
        server: &S,
    ) -> Result<Option<EventAndSeq>, XError> {
        if let Some(event) = self.deferred.pop_front() {
            return Ok(Some(event));
        }
        server.poll_for_event()
    }

    /// Block until an event matching `predicate` arrives
    ///
    /// Already deferred events are searched first. Non-matching events read
    /// from the server are deferred. With `timeout` set, `Ok(None)` means the
    /// deadline passed without a match; without one the wait is unbounded.
    pub fn wait_for<S, P>(
        &mut self,
        server: &S,
        timeout: Option<Duration>,
        mut predicate: P,
    ) -> Result<Option<EventAndSeq>, XError>
    where
        S: XServer + ?Sized,
        P: FnMut(&Event) -> bool,
    {
        if let Some(index) = self.deferred.iter().position(|(e, _)| predicate(e)) {
            return Ok(self.deferred.remove(index));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let Some((event, serial)) = server.wait_for_event(remaining)? else {
                return Ok(None);
            };

            if predicate(&event) {
                return Ok(Some((event, serial)));
            }

            debug!("Deferring {} while waiting", event_name(&event));
            self.deferred.push_back((event, serial));
        }
    }
}

/// Short description of an event for logs
pub fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Error(_) => "Error",
        Event::PropertyNotify(_) => "PropertyNotify",
        Event::DestroyNotify(_) => "DestroyNotify",
        Event::SelectionClear(_) => "SelectionClear",
        Event::ClientMessage(_) => "ClientMessage",
        Event::MapRequest(_) => "MapRequest",
        Event::ConfigureRequest(_) => "ConfigureRequest",
        Event::ConfigureNotify(_) => "ConfigureNotify",
        Event::FocusIn(_) => "FocusIn",
        Event::FocusOut(_) => "FocusOut",
        Event::KeyPress(_) => "KeyPress",
        Event::KeyRelease(_) => "KeyRelease",
        Event::SyncAlarmNotify(_) => "SyncAlarmNotify",
        _ => "other",
    }
}

/// Server timestamp carried by an event, if any
pub fn event_time(event: &Event) -> Option<u32> {
    let time = match event {
        Event::KeyPress(e) => e.time,
        Event::KeyRelease(e) => e.time,
        Event::ButtonPress(e) => e.time,
        Event::ButtonRelease(e) => e.time,
        Event::MotionNotify(e) => e.time,
        Event::EnterNotify(e) => e.time,
        Event::LeaveNotify(e) => e.time,
        Event::PropertyNotify(e) => e.time,
        Event::SelectionClear(e) => e.time,
        Event::SelectionRequest(e) => e.time,
        Event::SelectionNotify(e) => e.time,
        Event::SyncAlarmNotify(e) => e.timestamp,
        Event::XinputEnter(e) => e.time,
        Event::XinputLeave(e) => e.time,
        Event::XinputFocusIn(e) => e.time,
        Event::XinputFocusOut(e) => e.time,
        _ => return None,
    };
    Some(time)
}
