//! Data-collection channels
//!
//! A channel bundles a set of observers, configuration, and a channel
//! blackboard holding its global attributes. Channels do not interfere
//! with one another: a snapshot taken on one channel does not flow
//! into another channel's observers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::blackboard::Blackboard;
use crate::events::Events;

/// Snapshot storage floor; covers typical records without growing.
const MIN_SNAPSHOT_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChannelId(pub(crate) u32);

impl ChannelId {
    pub const INVALID: ChannelId = ChannelId(0);

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

pub struct Channel {
    id: ChannelId,
    name: String,
    active: AtomicBool,
    events: RwLock<Events>,
    blackboard: RwLock<Blackboard>,
    snapshot_highwater: AtomicUsize,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            active: AtomicBool::new(true),
            events: RwLock::new(Events::default()),
            blackboard: RwLock::new(Blackboard::new()),
            snapshot_highwater: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Paused channels ignore annotation updates and snapshots.
    pub fn pause(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.active.store(true, Ordering::Relaxed);
    }

    /// Register observers; takes the event list writer lock.
    pub fn with_events(&self, f: impl FnOnce(&mut Events)) {
        f(&mut self.events.write().unwrap());
    }

    pub(crate) fn events(&self) -> &RwLock<Events> {
        &self.events
    }

    pub(crate) fn blackboard(&self) -> &RwLock<Blackboard> {
        &self.blackboard
    }

    pub(crate) fn note_snapshot_size(&self, len: usize) {
        self.snapshot_highwater.fetch_max(len, Ordering::Relaxed);
    }

    pub(crate) fn snapshot_capacity(&self) -> usize {
        self.snapshot_highwater
            .load(Ordering::Relaxed)
            .saturating_mul(2)
            .max(MIN_SNAPSHOT_CAPACITY)
    }
}
