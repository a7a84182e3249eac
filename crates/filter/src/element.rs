//! Elements a filter can test

use std::collections::{BTreeMap, HashMap};
use typegraph_core::Value;
use typegraph_primitives::Complex;

/// Property lookup for filter evaluation
pub trait Element {
    /// Primitive value of a property, `None` if absent
    fn property(&self, name: &str) -> Option<Value>;
}

// Reads the ambient transaction's projected state
impl Element for Complex {
    fn property(&self, name: &str) -> Option<Value> {
        self.get_value(name)
    }
}

impl Element for BTreeMap<String, Value> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Element for HashMap<String, Value> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl<E: Element + ?Sized> Element for &E {
    fn property(&self, name: &str) -> Option<Value> {
        (**self).property(name)
    }
}
