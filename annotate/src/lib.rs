//! Low-overhead annotation runtime for program performance analysis.
//!
//! An application marks regions of interest with `begin`/`end` pairs
//! and publishes named attribute/value updates; the runtime keeps the
//! currently active annotation state on per-scope blackboards and
//! captures snapshots of it at trigger points. Snapshot records flow
//! to observers registered on a channel, which typically aggregate
//! them in memory or write them to a stream.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use vernier_annotate as annotate;
//!
//! annotate::init();
//!
//! annotate::begin_byname("phase", "setup");
//! // ... work ...
//! annotate::push_snapshot(annotate::default_channel_id(), &[]);
//! annotate::end_byname("phase");
//! ```
//!
//! Region guards keep begin/end pairs balanced across early returns:
//!
//! ```rust,ignore
//! use vernier_annotate::region_scope;
//!
//! fn solve() {
//!     region_scope!("function", "solve");
//!     // ...
//! }
//! ```
//!
//! Annotation calls never fail into the application: errors on the
//! instrumentation path are logged and swallowed, and the blackboard
//! is left in its last known-good state.

pub mod blackboard;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod guards;
pub mod snapshot;

#[macro_use]
mod macros;

pub use channel::{Channel, ChannelId};
pub use config::RuntimeConfig;
pub use dispatch::{
    begin, begin_byname, create_attribute, default_channel_id, end, end_byname, find_attribute,
    finalize, flush, init, instance, pull_snapshot, push_snapshot, set, set_byname, Runtime,
};
pub use snapshot::{ScopeMask, SnapshotBuilder};

pub mod prelude {
    pub use crate::dispatch::{
        begin, begin_byname, create_attribute, end, end_byname, find_attribute, push_snapshot,
        set, set_byname,
    };
    pub use crate::guards::ScopeGuard;
    pub use crate::region_scope;
    pub use vernier_context::{Attribute, Entry, Properties, Scope};
    pub use vernier_transit::{AttrType, Value};
}
