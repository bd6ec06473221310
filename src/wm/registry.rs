//! Registry Module
//!
//! Maps server resource ids (windows and SYNC alarms) to the window objects
//! that own them. The registry only holds weak references; window objects
//! are created and destroyed by their owners, who register and unregister
//! their ids.
//!
//! Windows and alarms share one table since the server allocates both from
//! the same id space.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::{Rc, Weak};

/// Server resource id
pub type Xid = u32;

/// A window object that owns server resources
pub trait ResourceOwner {
    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Kind of resource an id was registered as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Window,
    SyncAlarm,
}

struct Registration {
    kind: ResourceKind,
    owner: Weak<dyn ResourceOwner>,
}

/// Id to window object table
#[derive(Default)]
pub struct XidRegistry {
    entries: HashMap<Xid, Registration>,
}

impl XidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `xid` as owned by `owner`
    ///
    /// # Panics
    /// If `xid` is already registered.
    pub fn register(&mut self, xid: Xid, kind: ResourceKind, owner: &Rc<dyn ResourceOwner>) {
        match self.entries.entry(xid) {
            Entry::Occupied(existing) => panic!(
                "resource 0x{:x} registered twice (already {:?} of {})",
                xid,
                existing.get().kind,
                existing
                    .get()
                    .owner
                    .upgrade()
                    .map(|o| o.describe())
                    .unwrap_or_else(|| "a dropped window".into())
            ),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    kind,
                    owner: Rc::downgrade(owner),
                });
            }
        }
    }

    /// Forget `xid`
    ///
    /// # Panics
    /// If `xid` is not registered.
    pub fn unregister(&mut self, xid: Xid) {
        assert!(
            self.entries.remove(&xid).is_some(),
            "resource 0x{:x} unregistered but was never registered",
            xid
        );
    }

    /// Owner of `xid`, `None` if unknown or the owner is gone
    pub fn lookup(&self, xid: Xid) -> Option<Rc<dyn ResourceOwner>> {
        self.entries.get(&xid).and_then(|e| e.owner.upgrade())
    }

    pub fn kind(&self, xid: Xid) -> Option<ResourceKind> {
        self.entries.get(&xid).map(|e| e.kind)
    }

    pub fn register_window(&mut self, xid: Xid, owner: &Rc<dyn ResourceOwner>) {
        self.register(xid, ResourceKind::Window, owner);
    }

    pub fn register_sync_alarm(&mut self, xid: Xid, owner: &Rc<dyn ResourceOwner>) {
        self.register(xid, ResourceKind::SyncAlarm, owner);
    }

    pub fn lookup_window(&self, xid: Xid) -> Option<Rc<dyn ResourceOwner>> {
        self.lookup_kind(xid, ResourceKind::Window)
    }

    pub fn lookup_sync_alarm(&self, xid: Xid) -> Option<Rc<dyn ResourceOwner>> {
        self.lookup_kind(xid, ResourceKind::SyncAlarm)
    }

    fn lookup_kind(&self, xid: Xid, kind: ResourceKind) -> Option<Rc<dyn ResourceOwner>> {
        self.entries
            .get(&xid)
            .filter(|e| e.kind == kind)
            .and_then(|e| e.owner.upgrade())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered ids, in no particular order
    pub fn xids(&self) -> impl Iterator<Item = Xid> + '_ {
        self.entries.keys().copied()
    }
}
