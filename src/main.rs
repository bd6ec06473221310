//! Area display core binary
//!
//! Takes over window management of the default screen and holds it until the
//! process is signalled or another window manager replaces it.

use std::process;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use area_display::config::{Config, DEFAULT_LOG_FILTER};
use area_display::wm::display::{Dispatch, Display};
use area_display::wm::events::{event_name, event_time};
use area_display::wm::server::{RustServer, XServer};
use area_display::wm::time::Timestamp;
use area_display::x11_async::X11EventStream;

/// Why the main loop stopped
enum Exit {
    Signal,
    Replaced,
}

/// Session state owned by the main loop
struct AreaDisplay {
    display: Display<RustServer>,
    x11_stream: X11EventStream,
    /// Time of the last timestamped event, used when closing
    last_time: Timestamp,
}

impl AreaDisplay {
    fn new(display: Display<RustServer>) -> Result<Self> {
        let x11_stream = X11EventStream::new(display.server().connection())
            .context("Failed to initialize X11 event stream")?;
        let last_time = display.timestamp();
        Ok(Self {
            display,
            x11_stream,
            last_time,
        })
    }

    /// Dispatch everything already queued; `Some` if the session must end
    fn drain_events(&mut self) -> Result<Option<Exit>> {
        while let Some((event, serial)) = self
            .display
            .next_event()
            .context("Failed to read X11 events")?
        {
            let time = event_time(&event);
            let dispatch = self.display.handle_event(event, serial);
            if let Some(time) = time {
                self.last_time = time;
            }
            self.display.end_event();

            match dispatch {
                Dispatch::Handled => {}
                Dispatch::Unhandled(event) => {
                    debug!("No handler for {} (serial {})", event_name(&event), serial)
                }
                Dispatch::ManagerReplaced => return Ok(Some(Exit::Replaced)),
            }
        }
        Ok(None)
    }

    async fn run(&mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<Exit> {
        info!("Starting main event loop");
        loop {
            if let Some(exit) = self.drain_events()? {
                return Ok(exit);
            }

            self.display
                .server()
                .flush()
                .context("Failed to flush X11 requests")?;

            tokio::select! {
                () = self.x11_stream.wait_readable() => {}
                _ = shutdown.recv() => return Ok(Exit::Signal),
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let loaded = Config::load();
    let filter = loaded
        .as_ref()
        .map(|config| config.logging.filter.clone())
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(filter),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Area display core");

    let mut config = loaded.context("Failed to load configuration")?;
    config.apply_args(std::env::args().skip(1));
    let options = config.to_options();

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            }
            let _ = shutdown_tx.send(()).await;
        });
    }

    let display = match Display::connect(&options) {
        Ok(display) => display,
        Err(e) if e.is_fatal() => {
            error!("{}", e);
            process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open display"),
    };

    let mut app = AreaDisplay::new(display)?;
    let exit = app.run(&mut shutdown_rx).await;
    if let Err(e) = &exit {
        error!("Application error: {:#}", e);
    }
    if matches!(exit, Ok(Exit::Replaced)) {
        info!("Replaced by another window manager");
    }

    let AreaDisplay {
        display, last_time, ..
    } = app;
    if let Err(e) = display.close(last_time) {
        warn!("Failed to close display cleanly: {}", e);
    }

    exit.map(|_| ())
}
