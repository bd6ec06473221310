//! Area display core
//!
//! Owns the X11 connection of the Area window manager: it interns atoms,
//! probes extensions, negotiates the `WM_S<n>` manager selection, arbitrates
//! timestamps and input focus, and publishes EWMH hints on the root window.

pub mod config;
pub mod shared;
pub mod wm;
pub mod x11_async;

pub use wm::{Dispatch, Display, DisplayError, DisplayOptions};
