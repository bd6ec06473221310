//! X11 Async Event Stream
//!
//! Wakes the async main loop when the X connection has data to read. The
//! socket is polled with mio on a blocking task; events themselves are still
//! read through the display session so deferred events keep their order.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Notify, oneshot};
use x11rb::rust_connection::RustConnection;

const X11_TOKEN: mio::Token = mio::Token(0);

/// Readiness notifications for one X connection
pub struct X11EventStream {
    notify: Arc<Notify>,
    /// Dropping this stops the polling task
    _task_guard: oneshot::Receiver<()>,
}

impl X11EventStream {
    /// Start watching the connection's socket
    pub fn new(conn: &Arc<RustConnection>) -> Result<Self> {
        let fd = conn.stream().as_raw_fd();
        let notify = Arc::new(Notify::new());
        let task_notify = notify.clone();

        let (guard, task_guard) = oneshot::channel::<()>();
        let mut poll = mio::Poll::new().context("Failed to create mio Poll")?;
        let mut events = mio::Events::with_capacity(1);

        poll.registry()
            .register(
                &mut mio::unix::SourceFd(&fd),
                X11_TOKEN,
                mio::Interest::READABLE,
            )
            .context("Failed to register X11 FD with mio")?;

        let timeout = Duration::from_millis(100);
        tokio::task::spawn_blocking(move || {
            loop {
                if guard.is_closed() {
                    tracing::debug!("X11 socket polling task shutting down");
                    return;
                }

                if let Err(err) = poll.poll(&mut events, Some(timeout)) {
                    tracing::warn!("X11 socket poll failed: {:?}", err);
                    continue;
                }

                if events.iter().any(|event| event.token() == X11_TOKEN) {
                    task_notify.notify_one();
                }
            }
        });

        Ok(Self {
            notify,
            _task_guard: task_guard,
        })
    }

    /// Resolves once the socket has become readable
    ///
    /// A wakeup that happened while nobody was waiting is kept, so draining
    /// the queue and then waiting cannot miss data.
    pub async fn wait_readable(&self) {
        self.notify.notified().await;
    }
}
