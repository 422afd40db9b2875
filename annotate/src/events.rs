//! Observer callbacks dispatched by a channel
//!
//! Each event is a list of observers invoked synchronously on the
//! posting thread, in registration order. Observers must not register
//! further observers or create channels from inside a callback.

use crate::channel::Channel;
use crate::dispatch::Runtime;
use crate::snapshot::SnapshotBuilder;
use vernier_context::{Attribute, Entry, EntryList};
use vernier_transit::Value;

pub type AttributeCallback = Box<dyn Fn(&Runtime, &Attribute) + Send + Sync>;
pub type RegionCallback = Box<dyn Fn(&Runtime, &Channel, &Attribute, &Value) + Send + Sync>;
/// Snapshot observers may append entries to the record being built.
pub type SnapshotCallback =
    Box<dyn Fn(&Runtime, &Channel, &[Entry], &mut SnapshotBuilder) + Send + Sync>;
pub type ProcessSnapshotCallback = Box<dyn Fn(&Runtime, &Channel, &EntryList) + Send + Sync>;
pub type ChannelCallback = Box<dyn Fn(&Runtime, &Channel) + Send + Sync>;
/// Flush observers push their stored records into the provided sink.
pub type FlushCallback = Box<dyn Fn(&Runtime, &Channel, &mut dyn FnMut(EntryList)) + Send + Sync>;

#[derive(Default)]
pub struct Events {
    pub create_attr_evt: Vec<AttributeCallback>,

    pub pre_begin_evt: Vec<RegionCallback>,
    pub post_begin_evt: Vec<RegionCallback>,
    pub pre_set_evt: Vec<RegionCallback>,
    pub post_set_evt: Vec<RegionCallback>,
    pub pre_end_evt: Vec<RegionCallback>,
    pub post_end_evt: Vec<RegionCallback>,

    /// `(signal_safe, callback)`; observers that declare themselves
    /// signal-safe are the only ones invoked on the pull path.
    pub snapshot_evt: Vec<(bool, SnapshotCallback)>,
    pub process_snapshot_evt: Vec<ProcessSnapshotCallback>,

    pub pre_flush_evt: Vec<ChannelCallback>,
    pub flush_evt: Vec<FlushCallback>,
    pub post_flush_evt: Vec<ChannelCallback>,
    pub write_output_evt: Vec<ChannelCallback>,

    pub create_thread_evt: Vec<ChannelCallback>,
    pub release_thread_evt: Vec<ChannelCallback>,

    pub post_init_evt: Vec<ChannelCallback>,
    pub finish_evt: Vec<ChannelCallback>,
    pub clear_evt: Vec<ChannelCallback>,
}
