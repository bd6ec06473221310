//! Error Trap Module
//!
//! Scoped suppression of X errors. While a trap is alive the server checks
//! each request immediately, so a failure is reported to the trapping code
//! instead of arriving later as an error event.

use tracing::debug;

use crate::wm::error::XError;
use crate::wm::server::XServer;

/// Pushes an error trap on creation and pops it on drop
pub struct ErrorTrap<'a, S: XServer + ?Sized> {
    server: &'a S,
}

impl<'a, S: XServer + ?Sized> ErrorTrap<'a, S> {
    pub fn new(server: &'a S) -> Self {
        server.push_error_trap();
        Self { server }
    }

    /// Run `f` inside a trap, logging and discarding any failure
    pub fn run<T>(
        server: &'a S,
        what: &str,
        f: impl FnOnce(&S) -> Result<T, XError>,
    ) -> Option<T> {
        match Self::check(server, f) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Ignoring X error while trying to {}: {}", what, e);
                None
            }
        }
    }

    /// Run `f` inside a trap and hand its failure back to the caller
    pub fn check<T>(server: &'a S, f: impl FnOnce(&S) -> Result<T, XError>) -> Result<T, XError> {
        let trap = Self::new(server);
        f(trap.server)
    }
}

impl<S: XServer + ?Sized> Drop for ErrorTrap<'_, S> {
    fn drop(&mut self) {
        self.server.pop_error_trap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::testing::FakeServer;
    use x11rb::protocol::xproto::EventMask;

    #[test]
    fn test_trap_is_scoped() {
        let server = FakeServer::new();
        {
            let _outer = ErrorTrap::new(&server);
            assert_eq!(server.error_trap_depth(), 1);
            {
                let _inner = ErrorTrap::new(&server);
                assert_eq!(server.error_trap_depth(), 2);
            }
            assert_eq!(server.error_trap_depth(), 1);
        }
        assert_eq!(server.error_trap_depth(), 0);
    }

    #[test]
    fn test_run_swallows_failure() {
        let server = FakeServer::new();
        let screen = server.screen(0).unwrap();
        server.fail_requests_on(screen.root);

        let result = ErrorTrap::run(&server, "select root input", |s| {
            s.select_input(screen.root, EventMask::NO_EVENT)
        });
        assert!(result.is_none());
        assert_eq!(server.error_trap_depth(), 0);
    }

    #[test]
    fn test_check_pops_on_early_return() {
        let server = FakeServer::new();
        let screen = server.screen(0).unwrap();
        server.fail_requests_on(screen.root);

        let result = ErrorTrap::check(&server, |s| {
            s.delete_property(screen.root, 1)?;
            Ok(42)
        });
        assert!(result.is_err());
        assert_eq!(server.error_trap_depth(), 0);

        let ok = ErrorTrap::check(&server, |_| Ok(7)).unwrap();
        assert_eq!(ok, 7);
    }
}
