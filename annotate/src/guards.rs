//! RAII guards keeping begin/end pairs balanced

use crate::dispatch;
use vernier_context::Attribute;
use vernier_transit::Value;

/// Opens a by-name region on construction and closes it on drop.
pub struct ScopeGuard {
    name: &'static str,
}

impl ScopeGuard {
    pub fn new(name: &'static str, value: impl Into<Value>) -> Self {
        dispatch::begin_byname(name, value);
        Self { name }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        dispatch::end_byname(self.name);
    }
}

/// Region guard for a pre-created attribute.
pub struct AttributeGuard {
    attr: Attribute,
}

impl AttributeGuard {
    pub fn new(attr: Attribute, value: impl Into<Value>) -> Self {
        dispatch::begin(&attr, value);
        Self { attr }
    }
}

impl Drop for AttributeGuard {
    fn drop(&mut self) {
        dispatch::end(&self.attr);
    }
}
