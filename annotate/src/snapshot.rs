//! Snapshot capture buffers

use vernier_context::Entry;

/// Which blackboards a snapshot draws from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScopeMask(u32);

impl ScopeMask {
    pub const PROCESS: ScopeMask = ScopeMask(1);
    pub const THREAD: ScopeMask = ScopeMask(2);
    pub const ALL: ScopeMask = ScopeMask(3);

    pub fn contains(self, other: ScopeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: ScopeMask) -> ScopeMask {
        ScopeMask(self.0 | other.0)
    }
}

/// Collects entries into caller-owned storage.
///
/// The builder never allocates; when the storage is exhausted further
/// entries are dropped and the overflow flag is set. Capture paths
/// pre-size their storage from a running high-water mark so overflow
/// stays rare.
pub struct SnapshotBuilder<'a> {
    storage: &'a mut [Entry],
    len: usize,
    overflowed: bool,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(storage: &'a mut [Entry]) -> Self {
        Self {
            storage,
            len: 0,
            overflowed: false,
        }
    }

    pub fn push(&mut self, entry: Entry) -> bool {
        if entry.is_empty() {
            return true;
        }
        match self.storage.get_mut(self.len) {
            Some(slot) => {
                *slot = entry;
                self.len += 1;
                true
            }
            None => {
                self.overflowed = true;
                false
            }
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.storage[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::NodeId;
    use vernier_transit::Value;

    #[test]
    fn overflow_drops_entries() {
        let mut storage: [Entry; 2] = Default::default();
        let mut builder = SnapshotBuilder::new(&mut storage);
        let attr = NodeId::from_u64(11).unwrap();
        assert!(builder.push(Entry::immediate(attr, Value::Int(1))));
        assert!(builder.push(Entry::immediate(attr, Value::Int(2))));
        assert!(!builder.push(Entry::immediate(attr, Value::Int(3))));
        assert!(builder.overflowed());
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn empty_entries_are_skipped() {
        let mut storage: [Entry; 4] = Default::default();
        let mut builder = SnapshotBuilder::new(&mut storage);
        assert!(builder.push(Entry::Empty));
        assert_eq!(builder.len(), 0);
    }
}
