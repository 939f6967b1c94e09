//! Object values: the host-object seam and the built-in property bag

use super::{ThrowResult, Value};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An object implemented outside this crate
///
/// This is how foreign deferred-value implementations participate in
/// resolution: anything whose `get("then")` yields a [`Function`](super::Function)
/// is treated as a thenable. Reads are fallible so a host object can throw
/// from a getter.
pub trait HostObject {
    /// Read a member; `Err` carries the thrown value
    fn get(&self, key: &str) -> ThrowResult;

    /// Enumerable keys, used for rendering
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Class name, used for rendering
    fn class_name(&self) -> &str {
        "Object"
    }
}

/// Shared handle to a host object; clones keep the same identity
#[derive(Clone)]
pub struct ObjectRef(Rc<dyn HostObject>);

impl ObjectRef {
    /// Wrap a host object
    pub fn new(object: impl HostObject + 'static) -> Self {
        ObjectRef(Rc::new(object))
    }

    /// Read a member
    pub fn get(&self, key: &str) -> ThrowResult {
        self.0.get(key)
    }

    /// Enumerable keys
    pub fn keys(&self) -> Vec<String> {
        self.0.keys()
    }

    /// Class name
    pub fn class_name(&self) -> &str {
        self.0.class_name()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[object {}]", self.class_name())
    }
}

/// Ordinary property bag; reads never throw
#[derive(Default)]
pub struct PlainObject {
    properties: RefCell<FxHashMap<String, Value>>,
}

impl PlainObject {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property assignment
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Assign a property
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.borrow_mut().insert(key.into(), value.into());
    }

    /// Read an own property, `undefined` when absent
    pub fn get_own(&self, key: &str) -> Value {
        self.properties
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of own properties
    pub fn len(&self) -> usize {
        self.properties.borrow().len()
    }

    /// Whether there are no own properties
    pub fn is_empty(&self) -> bool {
        self.properties.borrow().is_empty()
    }
}

impl HostObject for PlainObject {
    fn get(&self, key: &str) -> ThrowResult {
        Ok(self.get_own(key))
    }

    fn keys(&self) -> Vec<String> {
        self.properties.borrow().keys().cloned().collect()
    }
}
