//! Vernier is a program-performance instrumentation and analysis
//! toolkit.
//!
//! An application annotates regions of its code and publishes named
//! attribute/value updates; the runtime snapshots the current
//! annotation state at trigger points and hands the records to
//! channel observers. The offline side reads the resulting streams
//! and runs declarative queries against them.
//!
//! # Instrumentation
//!
//! ```rust,ignore
//! use vernier::annotate;
//!
//! annotate::init();
//! annotate::begin_byname("phase", "solve");
//! annotate::push_snapshot(annotate::default_channel_id(), &[]);
//! annotate::end_byname("phase");
//! ```
//!
//! # Offline queries
//!
//! The `vernier-query` tool runs query expressions over recorded
//! streams:
//!
//! ```text
//! vernier-query --query "SELECT phase, sum(time) GROUP BY phase FORMAT table" run.cali
//! ```

pub use chrono;
pub use serde_json;
pub use uuid;

pub mod analytics {
    pub use vernier_analytics::*;
}

pub mod annotate {
    pub use vernier_annotate::*;
}

pub mod context {
    pub use vernier_context::*;
}

pub mod transit {
    pub use vernier_transit::*;
}
