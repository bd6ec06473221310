//! Selection Module
//!
//! ICCCM manager selections (`WM_S<n>`, `_NET_WM_CM_S<n>`): claim the
//! selection, announce the new manager on the root window and wait for a
//! previous owner to exit.

use std::time::Duration;

use tracing::{debug, info, warn};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{Atom, ClientMessageEvent, EventMask, Window};

use crate::wm::error::{DisplayError, XError};
use crate::wm::error_trap::ErrorTrap;
use crate::wm::events::EventQueue;
use crate::wm::server::{HelperKind, XServer};
use crate::wm::time::Timestamp;

/// `WM_S<screen>`
pub fn wm_selection_name(screen: usize) -> String {
    format!("WM_S{}", screen)
}

/// `_NET_WM_CM_S<screen>`
pub fn cm_selection_name(screen: usize) -> String {
    format!("_NET_WM_CM_S{}", screen)
}

/// A selection this session owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSelection {
    pub name: String,
    pub atom: Atom,
    /// Helper window that owns the selection
    pub owner: Window,
    /// Timestamp the selection was acquired with
    pub timestamp: Timestamp,
}

/// Parameters of one selection claim
#[derive(Debug, Clone, Copy)]
pub struct SelectionClaim<'a> {
    pub root: Window,
    pub selection: Atom,
    pub name: &'a str,
    pub timestamp: Timestamp,
    /// Take over from an existing owner instead of failing
    pub replace: bool,
}

/// Claim a manager selection
///
/// Without `replace`, an existing owner fails the claim before anything is
/// changed on the server. With `replace`, the previous owner is watched for
/// destruction and the claim blocks until it is gone (or `wait_timeout`
/// elapses, when set).
pub fn take_selection<S: XServer + ?Sized>(
    server: &S,
    events: &mut EventQueue,
    manager_atom: Atom,
    claim: SelectionClaim<'_>,
    wait_timeout: Option<Duration>,
) -> Result<ManagerSelection, DisplayError> {
    let mut current_owner = server.get_selection_owner(claim.selection)?;

    if current_owner != x11rb::NONE {
        if !claim.replace {
            return Err(DisplayError::AlreadyManaged {
                name: server.display_name().to_owned(),
            });
        }

        // Watch for the old owner going away
        let watched = ErrorTrap::check(server, |s| {
            s.select_input(current_owner, EventMask::STRUCTURE_NOTIFY)
        });
        if let Err(e) = watched {
            debug!(
                "Old owner 0x{:x} of {} is already gone: {}",
                current_owner, claim.name, e
            );
            current_owner = x11rb::NONE;
        }
    }

    let new_owner = server.create_window(
        claim.root,
        HelperKind::Offscreen {
            event_mask: EventMask::NO_EVENT,
        },
    )?;
    let taken = ManagerSelection {
        name: claim.name.to_owned(),
        atom: claim.selection,
        owner: new_owner,
        timestamp: claim.timestamp,
    };

    // Whatever happens after this point, never leave the owner window behind
    let result = claim_and_announce(
        server,
        events,
        manager_atom,
        &claim,
        &taken,
        current_owner,
        wait_timeout,
    );
    if let Err(e) = result {
        if let Err(cleanup) = release_selection(server, &taken, claim.timestamp) {
            debug!(
                "Could not clean up after failed claim of {}: {}",
                claim.name, cleanup
            );
        }
        return Err(e);
    }

    info!("Acquired selection {} with window 0x{:x}", claim.name, new_owner);
    Ok(taken)
}

fn claim_and_announce<S: XServer + ?Sized>(
    server: &S,
    events: &mut EventQueue,
    manager_atom: Atom,
    claim: &SelectionClaim<'_>,
    taken: &ManagerSelection,
    old_owner: Window,
    wait_timeout: Option<Duration>,
) -> Result<(), DisplayError> {
    server.set_selection_owner(taken.owner, claim.selection, claim.timestamp)?;

    if server.get_selection_owner(claim.selection)? != taken.owner {
        warn!("Could not acquire selection: {}", claim.name);
        return Err(DisplayError::SelectionLost {
            selection: claim.name.to_owned(),
        });
    }

    // Announce ourselves as the new manager
    let announcement = ClientMessageEvent::new(
        32,
        claim.root,
        manager_atom,
        [claim.timestamp, claim.selection, 0, 0, 0],
    );
    server.send_client_message(claim.root, EventMask::STRUCTURE_NOTIFY, announcement)?;

    if old_owner != x11rb::NONE {
        info!("Waiting for old window manager to exit");
        let exited = events.wait_for(server, wait_timeout, |event| {
            matches!(event, Event::DestroyNotify(e) if e.window == old_owner)
        })?;
        if exited.is_none() {
            return Err(DisplayError::WaitTimeout {
                what: "the previous manager to exit",
            });
        }
    }

    Ok(())
}

/// Give up a selection and destroy its owner window
///
/// A selection already taken over by another manager is left alone.
pub fn release_selection<S: XServer + ?Sized>(
    server: &S,
    selection: &ManagerSelection,
    timestamp: Timestamp,
) -> Result<(), XError> {
    debug!("Releasing selection {}", selection.name);
    ErrorTrap::check(server, |s| {
        if s.get_selection_owner(selection.atom)? == selection.owner {
            s.set_selection_owner(x11rb::NONE, selection.atom, timestamp)?;
        }
        s.destroy_window(selection.owner)
    })
}
