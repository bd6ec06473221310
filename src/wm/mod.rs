//! Window Manager Module
//!
//! The X11 display core of the window manager: the server connection and
//! its atoms and extensions, the manager selection, timestamps and focus,
//! root window hints, and the session that ties them together.

pub mod atoms;
pub mod display;
pub mod error;
pub mod error_trap;
pub mod events;
pub mod extensions;
pub mod focus;
pub mod hints;
pub mod registry;
pub mod selection;
pub mod server;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub use atoms::Atoms;
pub use display::{Dispatch, Display, DisplayOptions};
pub use error::{DisplayError, XError};
