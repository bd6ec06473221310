//! Extensions Module
//!
//! Probes the X extensions the display core relies on and records their
//! availability, opcode, event/error bases and negotiated version.

use bitflags::bitflags;
use tracing::{debug, info};

use crate::wm::error::DisplayError;
use crate::wm::server::XServer;

/// Extensions probed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Sync,
    Shape,
    Composite,
    Damage,
    XFixes,
    XInput,
}

impl ExtensionKind {
    /// Probe order
    pub const ALL: [ExtensionKind; 6] = [
        ExtensionKind::Sync,
        ExtensionKind::Shape,
        ExtensionKind::Composite,
        ExtensionKind::Damage,
        ExtensionKind::XFixes,
        ExtensionKind::XInput,
    ];

    /// Protocol name passed to QueryExtension
    pub fn name(self) -> &'static str {
        match self {
            ExtensionKind::Sync => "SYNC",
            ExtensionKind::Shape => "SHAPE",
            ExtensionKind::Composite => "Composite",
            ExtensionKind::Damage => "DAMAGE",
            ExtensionKind::XFixes => "XFIXES",
            ExtensionKind::XInput => "XInputExtension",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn capability(self) -> Capabilities {
        match self {
            ExtensionKind::Sync => Capabilities::SYNC,
            ExtensionKind::Shape => Capabilities::SHAPE,
            ExtensionKind::Composite => Capabilities::COMPOSITE,
            ExtensionKind::Damage => Capabilities::DAMAGE,
            ExtensionKind::XFixes => Capabilities::XFIXES,
            ExtensionKind::XInput => Capabilities::XINPUT,
        }
    }

    /// Minimum version, for extensions the window manager cannot run without
    fn required(self) -> Option<(u32, u32)> {
        match self {
            ExtensionKind::XFixes => Some((5, 0)),
            ExtensionKind::XInput => Some((2, 2)),
            _ => None,
        }
    }
}

bitflags! {
    /// Extension capability set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        const SYNC = 1 << 0;
        const SHAPE = 1 << 1;
        const COMPOSITE = 1 << 2;
        const DAMAGE = 1 << 3;
        const XFIXES = 1 << 4;
        const XINPUT = 1 << 5;
        /// XInput 2.3 (pointer barriers)
        const XINPUT_23 = 1 << 6;
    }
}

/// Per-extension probe result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub present: bool,
    pub major_opcode: u8,
    pub event_base: u8,
    pub error_base: u8,
    /// Negotiated version, (0, 0) if not negotiated
    pub version: (u32, u32),
}

/// X11 extension state of a display session
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    capabilities: Capabilities,
    info: [ExtensionInfo; 6],
}

/// Priority of the window manager's requests relative to other clients
const SYNC_CLIENT_PRIORITY: i32 = 10;

fn version_number((major, minor): (u32, u32)) -> u32 {
    major * 100 + minor
}

impl Extensions {
    /// Query every extension in [`ExtensionKind::ALL`]
    ///
    /// Missing optional extensions are recorded as absent. A missing or too
    /// old XFixes/XInput fails with [`DisplayError::MissingExtension`].
    pub fn probe<S: XServer + ?Sized>(server: &S) -> Result<Self, DisplayError> {
        let mut extensions = Self::default();

        for kind in ExtensionKind::ALL {
            let info = Self::probe_one(server, kind)?;
            debug!(
                "Attempted to init {}, present={} version {}.{} error base {} event base {}",
                kind.name(),
                info.present,
                info.version.0,
                info.version.1,
                info.error_base,
                info.event_base
            );

            if let Some(required) = kind.required() {
                let satisfied =
                    info.present && version_number(info.version) >= version_number(required);
                if !satisfied {
                    return Err(DisplayError::MissingExtension {
                        extension: kind.name(),
                        required: match kind {
                            ExtensionKind::XFixes => "5.0",
                            _ => "2.2",
                        },
                    });
                }
            }

            if info.present {
                extensions.capabilities.insert(kind.capability());
                if kind == ExtensionKind::XInput && version_number(info.version) >= 203 {
                    extensions.capabilities.insert(Capabilities::XINPUT_23);
                }
            }
            extensions.info[kind.index()] = info;
        }

        if extensions.has(ExtensionKind::Sync) {
            server.set_sync_priority(SYNC_CLIENT_PRIORITY)?;
        }

        info!(
            "X11 Extensions: sync={}, shape={}, composite={}, damage={}, xfixes={}, xinput={} (2.3: {})",
            extensions.has(ExtensionKind::Sync),
            extensions.has(ExtensionKind::Shape),
            extensions.has(ExtensionKind::Composite),
            extensions.has(ExtensionKind::Damage),
            extensions.has(ExtensionKind::XFixes),
            extensions.has(ExtensionKind::XInput),
            extensions.has_xinput_23(),
        );

        Ok(extensions)
    }

    fn probe_one<S: XServer + ?Sized>(
        server: &S,
        kind: ExtensionKind,
    ) -> Result<ExtensionInfo, DisplayError> {
        let Some(codes) = server.query_extension(kind)? else {
            return Ok(ExtensionInfo::default());
        };

        let version = server.query_extension_version(kind)?;
        let present = match kind {
            // SYNC is only usable once initialised; Composite only once its
            // version is known
            ExtensionKind::Sync | ExtensionKind::Composite | ExtensionKind::XInput => {
                version.is_some()
            }
            _ => true,
        };

        if !present {
            return Ok(ExtensionInfo::default());
        }

        Ok(ExtensionInfo {
            present,
            major_opcode: codes.major_opcode,
            event_base: codes.first_event,
            error_base: codes.first_error,
            version: version.unwrap_or((0, 0)),
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn info(&self, kind: ExtensionKind) -> &ExtensionInfo {
        &self.info[kind.index()]
    }

    pub fn has(&self, kind: ExtensionKind) -> bool {
        self.capabilities.contains(kind.capability())
    }

    /// First event code, 0 when the extension is absent
    pub fn event_base(&self, kind: ExtensionKind) -> u8 {
        self.info(kind).event_base
    }

    /// First error code, 0 when the extension is absent
    pub fn error_base(&self, kind: ExtensionKind) -> u8 {
        self.info(kind).error_base
    }

    pub fn xinput_opcode(&self) -> u8 {
        self.info(ExtensionKind::XInput).major_opcode
    }

    pub fn has_shape(&self) -> bool {
        self.has(ExtensionKind::Shape)
    }

    pub fn shape_event_base(&self) -> u8 {
        self.event_base(ExtensionKind::Shape)
    }

    pub fn damage_event_base(&self) -> u8 {
        self.event_base(ExtensionKind::Damage)
    }

    pub fn has_xinput_23(&self) -> bool {
        self.capabilities.contains(Capabilities::XINPUT_23)
    }
}
