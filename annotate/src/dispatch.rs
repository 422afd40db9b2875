//! The process-wide runtime and the annotation entry points
//!
//! The runtime is a single process-wide handle acquired at
//! initialisation; initialisation is idempotent and one-shot (first
//! caller wins). Annotation calls are free functions that resolve the
//! handle and never propagate errors into the application.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::blackboard::{begin_entry, end_entry, set_entry, Blackboard};
use crate::channel::{Channel, ChannelId};
use crate::config::RuntimeConfig;
use crate::events::Events;
use crate::snapshot::{ScopeMask, SnapshotBuilder};
use vernier_context::record::pack_record;
use vernier_context::{Attribute, ContextTree, Entry, EntryList, Properties, Result, Scope};
use vernier_transit::{AttrType, Value};

static G_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Entries a signal-path snapshot can carry.
const PULL_SNAPSHOT_CAPACITY: usize = 128;

thread_local! {
    static THREAD_SCOPE: RefCell<Option<ThreadScope>> = const { RefCell::new(None) };
    // set while the current thread is inside an annotation critical
    // section; the signal path refuses to enter when it is held
    static ACTIVITY: Cell<bool> = const { Cell::new(false) };
}

struct ThreadScope {
    blackboard: Blackboard,
}

impl Drop for ThreadScope {
    fn drop(&mut self) {
        if let Some(runtime) = instance() {
            runtime.fire_channel_event(|e| &e.release_thread_evt);
        }
    }
}

struct ActivityGuard {
    was_active: bool,
}

impl ActivityGuard {
    fn enter() -> Self {
        let was_active = ACTIVITY.try_with(|c| c.replace(true)).unwrap_or(true);
        Self { was_active }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let _ = ACTIVITY.try_with(|c| c.set(self.was_active));
    }
}

/// Initialise the runtime; returns the existing handle if a caller
/// got there first.
pub fn init() -> &'static Runtime {
    G_RUNTIME.get_or_init(|| Runtime::new(RuntimeConfig::from_environment()))
}

pub fn instance() -> Option<&'static Runtime> {
    G_RUNTIME.get()
}

/// Id of the channel created from the environment configuration.
pub fn default_channel_id() -> ChannelId {
    ChannelId(1)
}

pub fn create_attribute(name: &str, t: AttrType, properties: Properties) -> Attribute {
    init().create_attribute(name, t, properties, &[])
}

pub fn find_attribute(name: &str) -> Option<Attribute> {
    instance().and_then(|r| r.find_attribute(name))
}

pub fn begin(attr: &Attribute, value: impl Into<Value>) {
    init().begin(attr, &value.into());
}

pub fn set(attr: &Attribute, value: impl Into<Value>) {
    init().set(attr, &value.into());
}

pub fn end(attr: &Attribute) {
    init().end(attr);
}

pub fn begin_byname(name: &str, value: impl Into<Value>) {
    init().begin_byname(name, &value.into());
}

pub fn set_byname(name: &str, value: impl Into<Value>) {
    init().set_byname(name, &value.into());
}

pub fn end_byname(name: &str) {
    init().end_byname(name);
}

pub fn push_snapshot(channel: ChannelId, trigger_info: &[Entry]) {
    if let Some(runtime) = instance() {
        runtime.push_snapshot(channel, trigger_info);
    }
}

/// Signal-safe snapshot: writes a packed record into `buf` and
/// returns the number of bytes written, or 0 if taking the snapshot
/// would block or allocate.
pub fn pull_snapshot(channel: ChannelId, scopes: ScopeMask, buf: &mut [u8]) -> usize {
    match instance() {
        Some(runtime) => runtime.pull_snapshot(channel, scopes, buf),
        None => 0,
    }
}

/// Run a synchronous flush on a channel, handing each stored record
/// to `sink`.
pub fn flush(channel: ChannelId, sink: &mut dyn FnMut(EntryList)) {
    if let Some(runtime) = instance() {
        runtime.flush(channel, sink);
    }
}

/// Fires pending flushes and finish events on every channel.
pub fn finalize() {
    if let Some(runtime) = instance() {
        runtime.finalize();
    }
}

pub struct Runtime {
    tree: ContextTree,
    config: RuntimeConfig,
    process_blackboard: RwLock<Blackboard>,
    channels: RwLock<Vec<Arc<Channel>>>,
    next_channel_id: AtomicU32,
}

impl Runtime {
    fn new(config: RuntimeConfig) -> Self {
        let runtime = Self {
            tree: ContextTree::new(),
            config,
            process_blackboard: RwLock::new(Blackboard::new()),
            channels: RwLock::new(vec![]),
            next_channel_id: AtomicU32::new(1),
        };
        let name = runtime.config.get_or("channel", "name", "default");
        runtime.create_channel(&name);
        runtime
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // --- channels

    pub fn create_channel(&self, name: &str) -> ChannelId {
        let id = ChannelId(self.next_channel_id.fetch_add(1, Ordering::Relaxed));
        let channel = Arc::new(Channel::new(id, name));
        self.publish_standard_globals(&channel);
        self.channels.write().unwrap().push(channel.clone());
        self.fire_on_channel(&channel, |e| &e.post_init_evt);
        id
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap()
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    pub fn channel_by_name(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Tear down a channel after firing its finish and clear events.
    pub fn close_channel(&self, id: ChannelId) {
        let Some(channel) = self.channel(id) else {
            return;
        };
        channel.pause();
        self.fire_on_channel(&channel, |e| &e.finish_evt);
        self.fire_on_channel(&channel, |e| &e.clear_evt);
        self.channels.write().unwrap().retain(|c| c.id() != id);
    }

    fn publish_standard_globals(&self, channel: &Arc<Channel>) {
        let global =
            Properties::DEFAULT.with(Properties::GLOBAL | Properties::SKIP_EVENTS);
        let globals = [
            ("vernier.version", env!("CARGO_PKG_VERSION").to_string()),
            ("vernier.user", whoami::username()),
            ("vernier.hostname", whoami::devicename()),
            ("vernier.starttime", chrono::Utc::now().to_rfc3339()),
            ("vernier.process.id", uuid::Uuid::new_v4().to_string()),
        ];
        let mut bb = channel.blackboard().write().unwrap();
        for (name, value) in globals {
            match self
                .tree
                .create_attribute(name, AttrType::String, global, &[])
            {
                Ok(attr) => {
                    if let Err(e) = set_entry(&self.tree, &mut bb, &attr, &Value::Str(value.into()))
                    {
                        log::warn!("publishing {name}: {e}");
                    }
                }
                Err(e) => log::warn!("creating {name}: {e}"),
            }
        }
    }

    // --- attributes

    pub fn create_attribute(
        &self,
        name: &str,
        t: AttrType,
        properties: Properties,
        meta: &[(Attribute, Value)],
    ) -> Attribute {
        match self.tree.create_attribute(name, t, properties, meta) {
            Ok(attr) => {
                self.fire_attribute_event(&attr);
                attr
            }
            Err(e) => {
                // first declaration wins; the conflict is reported and
                // the existing attribute returned
                log::warn!("create_attribute({name}): {e}");
                self.tree
                    .find_attribute(name)
                    .expect("conflicting attribute exists")
            }
        }
    }

    pub fn find_attribute(&self, name: &str) -> Option<Attribute> {
        self.tree.find_attribute(name)
    }

    // --- annotation state machine

    pub fn begin(&self, attr: &Attribute, value: &Value) {
        let _activity = ActivityGuard::enter();
        if !attr.skip_events() {
            self.fire_region_event(|e| &e.pre_begin_evt, attr, value);
        }
        if let Err(e) = self.update_scope(attr, |tree, bb| begin_entry(tree, bb, attr, value)) {
            self.report(attr, "begin", &e);
            return;
        }
        if !attr.skip_events() {
            self.fire_region_event(|e| &e.post_begin_evt, attr, value);
        }
    }

    pub fn set(&self, attr: &Attribute, value: &Value) {
        let _activity = ActivityGuard::enter();
        if !attr.skip_events() {
            self.fire_region_event(|e| &e.pre_set_evt, attr, value);
        }
        if let Err(e) = self.update_scope(attr, |tree, bb| set_entry(tree, bb, attr, value)) {
            self.report(attr, "set", &e);
            return;
        }
        if !attr.skip_events() {
            self.fire_region_event(|e| &e.post_set_evt, attr, value);
        }
    }

    pub fn end(&self, attr: &Attribute) {
        let _activity = ActivityGuard::enter();
        if !attr.skip_events() {
            self.fire_region_event(|e| &e.pre_end_evt, attr, &Value::Empty);
        }
        if let Err(e) = self.update_scope(attr, |tree, bb| end_entry(tree, bb, attr)) {
            self.report(attr, "end", &e);
            return;
        }
        if !attr.skip_events() {
            self.fire_region_event(|e| &e.post_end_evt, attr, &Value::Empty);
        }
    }

    /// `begin` that creates the attribute on demand, inferring its
    /// type from the value. By-name regions nest strictly.
    pub fn begin_byname(&self, name: &str, value: &Value) {
        let attr = match self.find_attribute(name) {
            Some(attr) => attr,
            None => self.create_attribute(
                name,
                value.attr_type(),
                Properties::DEFAULT.with(Properties::NESTED),
                &[],
            ),
        };
        self.begin(&attr, value);
    }

    pub fn set_byname(&self, name: &str, value: &Value) {
        let attr = match self.find_attribute(name) {
            Some(attr) => attr,
            None => self.create_attribute(name, value.attr_type(), Properties::DEFAULT, &[]),
        };
        self.set(&attr, value);
    }

    pub fn end_byname(&self, name: &str) {
        match self.find_attribute(name) {
            Some(attr) => self.end(&attr),
            None => log::warn!("end_byname({name}): attribute not found"),
        }
    }

    fn report(&self, attr: &Attribute, op: &str, e: &vernier_context::Error) {
        let name = self
            .tree
            .attribute_name(attr.id())
            .unwrap_or("<unknown>")
            .to_string();
        log::warn!("{op}({name}): {e}");
    }

    fn update_scope(
        &self,
        attr: &Attribute,
        f: impl Fn(&ContextTree, &mut Blackboard) -> Result<()>,
    ) -> Result<()> {
        if attr.is_global() {
            let channels = self.channels.read().unwrap();
            for channel in channels.iter().filter(|c| c.is_active()) {
                f(&self.tree, &mut channel.blackboard().write().unwrap())?;
            }
            return Ok(());
        }
        match attr.scope() {
            Scope::Process => f(&self.tree, &mut self.process_blackboard.write().unwrap()),
            // task scope shares the per-thread storage
            Scope::Thread | Scope::Task => {
                self.ensure_thread_scope();
                THREAD_SCOPE
                    .try_with(|cell| match cell.try_borrow_mut() {
                        Ok(mut scope) => match scope.as_mut() {
                            Some(ts) => f(&self.tree, &mut ts.blackboard),
                            None => Ok(()),
                        },
                        Err(_) => Ok(()),
                    })
                    .unwrap_or(Ok(()))
            }
        }
    }

    /// Allocates the calling thread's blackboard on first use and
    /// fires `create_thread` observers.
    fn ensure_thread_scope(&self) {
        let created = THREAD_SCOPE
            .try_with(|cell| {
                let mut scope = match cell.try_borrow_mut() {
                    Ok(scope) => scope,
                    Err(_) => return false,
                };
                if scope.is_some() {
                    return false;
                }
                let mut blackboard = Blackboard::new();
                if let Ok(attr) = self.tree.create_attribute(
                    "vernier.thread.id",
                    AttrType::Uint,
                    Properties::DEFAULT
                        .with(Properties::SKIP_EVENTS | Properties::HIDDEN),
                    &[],
                ) {
                    let value = Value::Uint(thread_id::get() as u64);
                    let _ = set_entry(&self.tree, &mut blackboard, &attr, &value);
                }
                *scope = Some(ThreadScope { blackboard });
                true
            })
            .unwrap_or(false);
        if created {
            self.fire_channel_event(|e| &e.create_thread_evt);
        }
    }

    // --- snapshots

    pub fn push_snapshot(&self, channel: ChannelId, trigger_info: &[Entry]) {
        let _activity = ActivityGuard::enter();
        let Some(channel) = self.channel(channel) else {
            log::warn!("push_snapshot: unknown {channel}");
            return;
        };
        if !channel.is_active() {
            return;
        }
        self.ensure_thread_scope();

        let mut storage = vec![Entry::Empty; channel.snapshot_capacity()];
        let mut builder = SnapshotBuilder::new(&mut storage);
        for entry in trigger_info {
            builder.push(entry.clone());
        }
        self.capture_blackboards(ScopeMask::ALL, &mut builder);

        {
            let events = channel.events().read().unwrap();
            for (_, callback) in &events.snapshot_evt {
                callback(self, &channel, trigger_info, &mut builder);
            }
        }
        if builder.overflowed() {
            log::debug!("snapshot buffer overflow on {}", channel.name());
        }
        channel.note_snapshot_size(builder.len());

        let record: EntryList = builder.entries().to_vec();
        let events = channel.events().read().unwrap();
        for callback in &events.process_snapshot_evt {
            callback(self, &channel, &record);
        }
    }

    fn capture_blackboards(&self, scopes: ScopeMask, builder: &mut SnapshotBuilder) {
        if scopes.contains(ScopeMask::PROCESS) {
            self.process_blackboard.read().unwrap().snapshot(builder);
        }
        if scopes.contains(ScopeMask::THREAD) {
            let _ = THREAD_SCOPE.try_with(|cell| {
                if let Ok(scope) = cell.try_borrow() {
                    if let Some(ts) = scope.as_ref() {
                        ts.blackboard.snapshot(builder);
                    }
                }
            });
        }
    }

    /// Signal-safe snapshot into a caller-owned buffer.
    ///
    /// Never blocks and never allocates: every lock on this path is a
    /// try-lock, and the record is packed from a fixed-size stack
    /// buffer. Returns 0 when the snapshot would have to block, when
    /// the calling thread was interrupted inside an annotation
    /// operation, or when the output buffer is too small.
    pub fn pull_snapshot(&self, channel: ChannelId, scopes: ScopeMask, buf: &mut [u8]) -> usize {
        if ACTIVITY.try_with(Cell::get).unwrap_or(true) {
            return 0;
        }
        let _activity = ActivityGuard::enter();

        let Ok(channels) = self.channels.try_read() else {
            return 0;
        };
        let Some(channel) = channels.iter().find(|c| c.id() == channel) else {
            return 0;
        };
        if !channel.is_active() {
            return 0;
        }

        let mut storage: [Entry; PULL_SNAPSHOT_CAPACITY] =
            std::array::from_fn(|_| Entry::Empty);
        let mut builder = SnapshotBuilder::new(&mut storage);

        if scopes.contains(ScopeMask::PROCESS) {
            let Ok(bb) = self.process_blackboard.try_read() else {
                return 0;
            };
            bb.snapshot(&mut builder);
        }
        if scopes.contains(ScopeMask::THREAD) {
            let ok = THREAD_SCOPE
                .try_with(|cell| match cell.try_borrow() {
                    Ok(scope) => {
                        if let Some(ts) = scope.as_ref() {
                            ts.blackboard.snapshot(&mut builder);
                        }
                        true
                    }
                    Err(_) => false,
                })
                .unwrap_or(false);
            if !ok {
                return 0;
            }
        }

        {
            let Ok(events) = channel.events().try_read() else {
                return 0;
            };
            for (signal_safe, callback) in &events.snapshot_evt {
                if *signal_safe {
                    callback(self, channel, &[], &mut builder);
                }
            }
        }

        pack_record(builder.entries(), buf).unwrap_or(0)
    }

    // --- flush

    pub fn flush(&self, channel: ChannelId, sink: &mut dyn FnMut(EntryList)) {
        let _activity = ActivityGuard::enter();
        let Some(channel) = self.channel(channel) else {
            log::warn!("flush: unknown {channel}");
            return;
        };
        self.fire_on_channel(&channel, |e| &e.pre_flush_evt);
        {
            let events = channel.events().read().unwrap();
            for callback in &events.flush_evt {
                callback(self, &channel, sink);
            }
        }
        self.fire_on_channel(&channel, |e| &e.post_flush_evt);
        self.fire_on_channel(&channel, |e| &e.write_output_evt);
    }

    /// The channel's global attribute entries, as written into a
    /// stream's globals section.
    pub fn globals(&self, channel: ChannelId) -> EntryList {
        let Some(channel) = self.channel(channel) else {
            return vec![];
        };
        let bb = channel.blackboard().read().unwrap();
        let mut storage = vec![Entry::Empty; bb.len()];
        let mut builder = SnapshotBuilder::new(&mut storage);
        bb.snapshot(&mut builder);
        builder.entries().to_vec()
    }

    pub fn finalize(&self) {
        let channels: Vec<Arc<Channel>> = self.channels.read().unwrap().clone();
        for channel in channels {
            self.fire_on_channel(&channel, |e| &e.finish_evt);
            channel.pause();
        }
    }

    // --- event dispatch helpers

    fn fire_attribute_event(&self, attr: &Attribute) {
        let channels = self.channels.read().unwrap();
        for channel in channels.iter().filter(|c| c.is_active()) {
            let events = channel.events().read().unwrap();
            for callback in &events.create_attr_evt {
                callback(self, attr);
            }
        }
    }

    fn fire_region_event(
        &self,
        select: impl Fn(&Events) -> &Vec<crate::events::RegionCallback>,
        attr: &Attribute,
        value: &Value,
    ) {
        let channels = self.channels.read().unwrap();
        for channel in channels.iter().filter(|c| c.is_active()) {
            let events = channel.events().read().unwrap();
            for callback in select(&events) {
                callback(self, channel, attr, value);
            }
        }
    }

    fn fire_channel_event(&self, select: impl Fn(&Events) -> &Vec<crate::events::ChannelCallback>) {
        let channels = self.channels.read().unwrap();
        for channel in channels.iter().filter(|c| c.is_active()) {
            let events = channel.events().read().unwrap();
            for callback in select(&events) {
                callback(self, channel);
            }
        }
    }

    fn fire_on_channel(
        &self,
        channel: &Arc<Channel>,
        select: impl Fn(&Events) -> &Vec<crate::events::ChannelCallback>,
    ) {
        let events = channel.events().read().unwrap();
        for callback in select(&events) {
            callback(self, channel);
        }
    }
}
