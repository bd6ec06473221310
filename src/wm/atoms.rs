//! Atom table
//!
//! Every atom the display core and its collaborators use, interned in one
//! pipelined batch at startup and read-only afterwards.

use tracing::debug;
use x11rb::protocol::xproto::Atom;

use crate::wm::error::XError;
use crate::wm::server::XServer;

/// Declares the `Atoms` struct. Names in the `ewmh` group are advertised in
/// `_NET_SUPPORTED`.
///
/// `x11rb::atom_manager!` is not used because it interns through a live
/// connection; `Atoms` goes through [`XServer`] so the in-memory test server works too.
macro_rules! atom_table {
    (
        other: { $($other:ident),* $(,)? }
        ewmh: { $($ewmh:ident),* $(,)? }
    ) => {
        /// Holds all interned ICCCM/EWMH/private atoms
        #[allow(non_snake_case)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct Atoms {
            $(pub $other: Atom,)*
            $(pub $ewmh: Atom,)*
        }

        impl Atoms {
            /// Atom names in interning order
            pub const NAMES: &'static [&'static str] = &[
                $(stringify!($other),)*
                $(stringify!($ewmh),)*
            ];

            fn from_interned(atoms: &[Atom]) -> Self {
                let mut iter = atoms.iter().copied();
                Self {
                    $($other: iter.next().unwrap_or(x11rb::NONE),)*
                    $($ewmh: iter.next().unwrap_or(x11rb::NONE),)*
                }
            }

            fn ewmh(&self) -> Vec<Atom> {
                vec![$(self.$ewmh),*]
            }
        }
    };
}

atom_table! {
    other: {
        // Core/ICCCM
        ATOM,
        CARDINAL,
        WINDOW,
        STRING,
        UTF8_STRING,
        MANAGER,
        TARGETS,
        MULTIPLE,
        TIMESTAMP,
        VERSION,
        ATOM_PAIR,
        CLIPBOARD,
        WM_NAME,
        WM_CLASS,
        WM_PROTOCOLS,
        WM_TAKE_FOCUS,
        WM_DELETE_WINDOW,
        WM_STATE,
        WM_CHANGE_STATE,
        WM_HINTS,
        WM_NORMAL_HINTS,
        WM_SIZE_HINTS,
        WM_TRANSIENT_FOR,
        WM_CLIENT_LEADER,
        WM_CLIENT_MACHINE,
        WM_WINDOW_ROLE,
        WM_COLORMAP_WINDOWS,
        WM_ICON_SIZE,
        SM_CLIENT_ID,
        // Motif / KDE / GTK
        _MOTIF_WM_HINTS,
        _KWM_WIN_ICON,
        _GTK_THEME_VARIANT,
        _GTK_HIDE_TITLEBAR_WHEN_MAXIMIZED,
        _GTK_APPLICATION_ID,
        _GTK_UNIQUE_BUS_NAME,
        _GTK_APPLICATION_OBJECT_PATH,
        _GTK_WINDOW_OBJECT_PATH,
        _GTK_APP_MENU_OBJECT_PATH,
        _GTK_MENUBAR_OBJECT_PATH,
        _GTK_FRAME_EXTENTS,
        _GTK_SHOW_WINDOW_MENU,
        _GTK_EDGE_CONSTRAINTS,
        // XEMBED / backgrounds
        _XEMBED,
        _XEMBED_INFO,
        _XROOTPMAP_ID,
        _XSETROOT_ID,
        // Sync / frame timing
        _NET_WM_SYNC_REQUEST_COUNTER,
        _NET_WM_FRAME_DRAWN,
        _NET_WM_FRAME_TIMINGS,
        _NET_WM_OPAQUE_REGION,
        _NET_WM_WINDOW_OPACITY,
        // Startup notification
        _NET_STARTUP_INFO,
        _NET_STARTUP_INFO_BEGIN,
        // Private
        _AREA_TIMESTAMP_PING,
        _AREA_FOCUS_SET,
        _AREA_SENTINEL,
        _AREA_VERSION,
        _AREA_HINTS,
    }
    ewmh: {
        _NET_SUPPORTED,
        _NET_SUPPORTING_WM_CHECK,
        _NET_CLIENT_LIST,
        _NET_CLIENT_LIST_STACKING,
        _NET_NUMBER_OF_DESKTOPS,
        _NET_DESKTOP_GEOMETRY,
        _NET_DESKTOP_VIEWPORT,
        _NET_CURRENT_DESKTOP,
        _NET_DESKTOP_NAMES,
        _NET_DESKTOP_LAYOUT,
        _NET_ACTIVE_WINDOW,
        _NET_WORKAREA,
        _NET_SHOWING_DESKTOP,
        _NET_CLOSE_WINDOW,
        _NET_MOVERESIZE_WINDOW,
        _NET_WM_MOVERESIZE,
        _NET_RESTACK_WINDOW,
        _NET_REQUEST_FRAME_EXTENTS,
        _NET_WM_NAME,
        _NET_WM_VISIBLE_NAME,
        _NET_WM_ICON_NAME,
        _NET_WM_VISIBLE_ICON_NAME,
        _NET_WM_DESKTOP,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_WINDOW_TYPE_TOOLBAR,
        _NET_WM_WINDOW_TYPE_MENU,
        _NET_WM_WINDOW_TYPE_UTILITY,
        _NET_WM_WINDOW_TYPE_SPLASH,
        _NET_WM_WINDOW_TYPE_DIALOG,
        _NET_WM_WINDOW_TYPE_DROPDOWN_MENU,
        _NET_WM_WINDOW_TYPE_POPUP_MENU,
        _NET_WM_WINDOW_TYPE_TOOLTIP,
        _NET_WM_WINDOW_TYPE_NOTIFICATION,
        _NET_WM_WINDOW_TYPE_COMBO,
        _NET_WM_WINDOW_TYPE_DND,
        _NET_WM_WINDOW_TYPE_NORMAL,
        _NET_WM_STATE,
        _NET_WM_STATE_MODAL,
        _NET_WM_STATE_STICKY,
        _NET_WM_STATE_MAXIMIZED_VERT,
        _NET_WM_STATE_MAXIMIZED_HORZ,
        _NET_WM_STATE_SHADED,
        _NET_WM_STATE_SKIP_TASKBAR,
        _NET_WM_STATE_SKIP_PAGER,
        _NET_WM_STATE_HIDDEN,
        _NET_WM_STATE_FULLSCREEN,
        _NET_WM_STATE_ABOVE,
        _NET_WM_STATE_BELOW,
        _NET_WM_STATE_DEMANDS_ATTENTION,
        _NET_WM_STATE_FOCUSED,
        _NET_WM_ALLOWED_ACTIONS,
        _NET_WM_ACTION_MOVE,
        _NET_WM_ACTION_RESIZE,
        _NET_WM_ACTION_MINIMIZE,
        _NET_WM_ACTION_SHADE,
        _NET_WM_ACTION_STICK,
        _NET_WM_ACTION_MAXIMIZE_HORZ,
        _NET_WM_ACTION_MAXIMIZE_VERT,
        _NET_WM_ACTION_FULLSCREEN,
        _NET_WM_ACTION_CHANGE_DESKTOP,
        _NET_WM_ACTION_CLOSE,
        _NET_WM_ACTION_ABOVE,
        _NET_WM_ACTION_BELOW,
        _NET_WM_STRUT,
        _NET_WM_STRUT_PARTIAL,
        _NET_WM_ICON_GEOMETRY,
        _NET_WM_ICON,
        _NET_WM_PID,
        _NET_WM_PING,
        _NET_WM_SYNC_REQUEST,
        _NET_WM_USER_TIME,
        _NET_WM_USER_TIME_WINDOW,
        _NET_WM_FULL_PLACEMENT,
        _NET_WM_FULLSCREEN_MONITORS,
        _NET_WM_BYPASS_COMPOSITOR,
        _NET_FRAME_EXTENTS,
        _NET_STARTUP_ID,
    }
}

impl Atoms {
    /// Intern all atoms in one batch
    pub fn intern<S: XServer + ?Sized>(server: &S) -> Result<Self, XError> {
        debug!("Creating {} atoms", Self::NAMES.len());
        let interned = server.intern_atoms(Self::NAMES)?;
        if interned.len() != Self::NAMES.len() {
            return Err(XError::Rejected {
                request: "InternAtoms",
                resource: interned.len() as u32,
            });
        }
        Ok(Self::from_interned(&interned))
    }

    /// Atoms advertised in `_NET_SUPPORTED`
    pub fn supported(&self) -> Vec<Atom> {
        let mut supported = self.ewmh();
        supported.push(self._GTK_FRAME_EXTENTS);
        supported.push(self._GTK_SHOW_WINDOW_MENU);
        supported
    }
}
