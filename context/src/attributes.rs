//! Attribute identity and property flags

use std::fmt;

use crate::tree::NodeId;
use vernier_transit::AttrType;

/// Property word of an attribute.
///
/// The numeric values are part of the stream format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Properties(pub u32);

impl Properties {
    /// Values are never interned in the tree; entries are immediates.
    pub const AS_VALUE: u32 = 1;
    /// Create a separate tree root instead of merging into the path.
    pub const NO_MERGE: u32 = 2;
    pub const SCOPE_PROCESS: u32 = 12;
    pub const SCOPE_THREAD: u32 = 20;
    pub const SCOPE_TASK: u32 = 24;
    pub const SCOPE_MASK: u32 = 60;
    /// Updates do not fire observers.
    pub const SKIP_EVENTS: u32 = 64;
    pub const HIDDEN: u32 = 128;
    /// begin/end calls must nest strictly.
    pub const NESTED: u32 = 256;
    /// Process-wide; written into the stream's globals section.
    pub const GLOBAL: u32 = 512;
    /// Numeric, suitable as aggregation input.
    pub const AGGREGATABLE: u32 = 1024;

    const LEVEL_SHIFT: u32 = 16;
    const LEVEL_MASK: u32 = 7 << Self::LEVEL_SHIFT;

    pub const DEFAULT: Properties = Properties(Self::SCOPE_THREAD);

    pub fn with(self, flags: u32) -> Self {
        Properties(self.0 | flags)
    }

    pub fn with_level(self, level: u32) -> Self {
        Properties((self.0 & !Self::LEVEL_MASK) | ((level & 7) << Self::LEVEL_SHIFT))
    }

    pub fn level(self) -> u32 {
        (self.0 & Self::LEVEL_MASK) >> Self::LEVEL_SHIFT
    }

    pub fn contains(self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    pub fn scope(self) -> Scope {
        match self.0 & Self::SCOPE_MASK {
            Self::SCOPE_PROCESS => Scope::Process,
            Self::SCOPE_TASK => Scope::Task,
            _ => Scope::Thread,
        }
    }

    pub fn with_scope(self, scope: Scope) -> Self {
        let bits = match scope {
            Scope::Process => Self::SCOPE_PROCESS,
            Scope::Thread => Self::SCOPE_THREAD,
            Scope::Task => Self::SCOPE_TASK,
        };
        Properties((self.0 & !Self::SCOPE_MASK) | bits)
    }
}

/// Which blackboard an attribute's updates target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Scope {
    Process,
    Thread,
    Task,
}

/// A named, typed key with property flags.
///
/// The identity of an attribute is the id of its name node in the
/// context tree; type and properties are cached here so the annotation
/// hot path never walks the tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Attribute {
    id: NodeId,
    attr_type: AttrType,
    properties: Properties,
}

impl Attribute {
    pub(crate) fn new(id: NodeId, attr_type: AttrType, properties: Properties) -> Self {
        Self {
            id,
            attr_type,
            properties,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    pub fn properties(&self) -> Properties {
        self.properties
    }

    pub fn store_as_value(&self) -> bool {
        self.properties.contains(Properties::AS_VALUE)
    }

    pub fn is_autocombineable(&self) -> bool {
        !self.store_as_value() && !self.properties.contains(Properties::NO_MERGE)
    }

    pub fn skip_events(&self) -> bool {
        self.properties.contains(Properties::SKIP_EVENTS)
    }

    pub fn is_hidden(&self) -> bool {
        self.properties.contains(Properties::HIDDEN)
    }

    pub fn is_nested(&self) -> bool {
        self.properties.contains(Properties::NESTED)
    }

    pub fn is_global(&self) -> bool {
        self.properties.contains(Properties::GLOBAL)
    }

    pub fn scope(&self) -> Scope {
        self.properties.scope()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attribute#{}", self.id.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_bits_are_exclusive() {
        let p = Properties::DEFAULT.with_scope(Scope::Process);
        assert_eq!(p.scope(), Scope::Process);
        let p = p.with_scope(Scope::Task);
        assert_eq!(p.scope(), Scope::Task);
        assert!(!p.contains(Properties::AS_VALUE));
    }

    #[test]
    fn level_roundtrip() {
        let p = Properties::DEFAULT.with_level(5);
        assert_eq!(p.level(), 5);
        assert_eq!(p.scope(), Scope::Thread);
    }
}
