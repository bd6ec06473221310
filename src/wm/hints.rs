//! Hints Module
//!
//! Publishes window manager state as EWMH/ICCCM properties on the root
//! window. Every write is best effort: it runs inside an error trap and a
//! failure is only logged, so a hint can never abort the caller (e.g. while
//! the session is shutting down).

use tracing::debug;
use x11rb::protocol::xproto::{AtomEnum, PropMode, Window};

use crate::shared::Geometry;
use crate::wm::atoms::Atoms;
use crate::wm::error_trap::ErrorTrap;
use crate::wm::server::XServer;

/// Legacy `WM_ICON_SIZE`: min 32x32, max 32x32, no increments
const LEGACY_ICON_SIZE: [u32; 6] = [32, 32, 32, 32, 0, 0];

/// Upper bound for `_NET_DESKTOP_NAMES`, in 32-bit units
const DESKTOP_NAMES_MAX_LEN: u32 = 1024;

/// Writes hints to the root window of one screen
pub struct HintPublisher<'a, S: XServer + ?Sized> {
    server: &'a S,
    atoms: &'a Atoms,
    root: Window,
}

impl<'a, S: XServer + ?Sized> HintPublisher<'a, S> {
    pub fn new(server: &'a S, atoms: &'a Atoms, root: Window) -> Self {
        Self {
            server,
            atoms,
            root,
        }
    }

    fn set_cardinals(&self, what: &str, property: u32, data: &[u32]) {
        ErrorTrap::run(self.server, what, |s| {
            s.change_property32(
                PropMode::REPLACE,
                self.root,
                property,
                AtomEnum::CARDINAL.into(),
                data,
            )
        });
    }

    /// `_NET_SUPPORTED`
    pub fn publish_supported(&self) {
        let supported = self.atoms.supported();
        debug!("Advertising {} supported hints", supported.len());
        ErrorTrap::run(self.server, "set _NET_SUPPORTED", |s| {
            s.change_property32(
                PropMode::REPLACE,
                self.root,
                self.atoms._NET_SUPPORTED,
                AtomEnum::ATOM.into(),
                &supported,
            )
        });
    }

    /// `WM_ICON_SIZE`
    pub fn publish_icon_size(&self) {
        self.set_cardinals(
            "set WM_ICON_SIZE",
            self.atoms.WM_ICON_SIZE,
            &LEGACY_ICON_SIZE,
        );
    }

    /// `_NET_DESKTOP_GEOMETRY`
    pub fn publish_desktop_geometry(&self, width: u32, height: u32) {
        debug!("Setting _NET_DESKTOP_GEOMETRY to {}x{}", width, height);
        self.set_cardinals(
            "set _NET_DESKTOP_GEOMETRY",
            self.atoms._NET_DESKTOP_GEOMETRY,
            &[width, height],
        );
    }

    /// `_NET_DESKTOP_VIEWPORT`; viewports are not supported so it is always
    /// the origin
    pub fn publish_desktop_viewport(&self) {
        self.set_cardinals(
            "set _NET_DESKTOP_VIEWPORT",
            self.atoms._NET_DESKTOP_VIEWPORT,
            &[0, 0],
        );
    }

    /// `_NET_NUMBER_OF_DESKTOPS`
    pub fn publish_number_of_desktops(&self, count: u32) {
        debug!("Setting _NET_NUMBER_OF_DESKTOPS to {}", count);
        self.set_cardinals(
            "set _NET_NUMBER_OF_DESKTOPS",
            self.atoms._NET_NUMBER_OF_DESKTOPS,
            &[count],
        );
    }

    /// `_NET_CURRENT_DESKTOP`
    pub fn publish_current_desktop(&self, index: u32) {
        debug!("Setting _NET_CURRENT_DESKTOP to {}", index);
        self.set_cardinals(
            "set _NET_CURRENT_DESKTOP",
            self.atoms._NET_CURRENT_DESKTOP,
            &[index],
        );
    }

    /// `_NET_WORKAREA`, one rectangle per workspace
    pub fn publish_work_areas(&self, areas: &[Geometry]) {
        let data: Vec<u32> = areas.iter().flat_map(Geometry::to_cardinals).collect();
        self.set_cardinals("set _NET_WORKAREA", self.atoms._NET_WORKAREA, &data);
    }

    /// `_NET_SHOWING_DESKTOP`
    pub fn publish_showing_desktop(&self, showing: bool) {
        self.set_cardinals(
            "set _NET_SHOWING_DESKTOP",
            self.atoms._NET_SHOWING_DESKTOP,
            &[u32::from(showing)],
        );
    }

    /// Point `_NET_SUPPORTING_WM_CHECK` at the leader window
    pub fn set_wm_check_hint(&self, leader: Window) {
        ErrorTrap::run(self.server, "set _NET_SUPPORTING_WM_CHECK", |s| {
            s.change_property32(
                PropMode::REPLACE,
                self.root,
                self.atoms._NET_SUPPORTING_WM_CHECK,
                AtomEnum::WINDOW.into(),
                &[leader],
            )
        });
    }

    pub fn unset_wm_check_hint(&self) {
        ErrorTrap::run(self.server, "delete _NET_SUPPORTING_WM_CHECK", |s| {
            s.delete_property(self.root, self.atoms._NET_SUPPORTING_WM_CHECK)
        });
    }

    /// Workspace names from `_NET_DESKTOP_NAMES`, empty if unset or invalid
    pub fn workspace_names(&self) -> Vec<String> {
        let value = ErrorTrap::run(self.server, "read _NET_DESKTOP_NAMES", |s| {
            s.get_property(
                self.root,
                self.atoms._NET_DESKTOP_NAMES,
                self.atoms.UTF8_STRING,
                DESKTOP_NAMES_MAX_LEN,
            )
        })
        .flatten();

        let Some(value) = value else {
            debug!("Failed to get workspace names from root window");
            return Vec::new();
        };
        if value.type_ != self.atoms.UTF8_STRING || value.format != 8 {
            debug!("_NET_DESKTOP_NAMES has the wrong type or format");
            return Vec::new();
        }

        parse_utf8_list(&value.value)
    }
}

/// Split a NUL-separated UTF-8 list; a trailing NUL does not start a new
/// entry and invalid entries become empty names
fn parse_utf8_list(bytes: &[u8]) -> Vec<String> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    bytes
        .split(|b| *b == 0)
        .map(|name| match std::str::from_utf8(name) {
            Ok(name) => name.to_owned(),
            Err(_) => {
                debug!("Ignoring invalid UTF-8 in workspace name");
                String::new()
            }
        })
        .collect()
}
