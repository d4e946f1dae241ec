//! Closure environments
//!
//! An environment is a chain of scopes. Each scope is an observable object,
//! so writing a variable notifies anything that watched it while a loop head
//! was being evaluated.

use std::fmt;
use std::rc::Rc;

use crate::observe::ObjectRef;
use crate::value::{CheapClone, JsString, Value};

struct EnvironmentData {
    values: ObjectRef,
    prev: Option<Environment>,
}

#[derive(Clone)]
pub struct Environment(Rc<EnvironmentData>);

impl CheapClone for Environment {}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Create a root environment with an empty scope
    pub fn new() -> Self {
        Self::with_values(ObjectRef::new(), None)
    }

    pub fn with_values(values: ObjectRef, prev: Option<Environment>) -> Self {
        Environment(Rc::new(EnvironmentData { values, prev }))
    }

    /// Root environment populated from a JSON object; non-objects give an empty scope
    pub fn from_json(json: &serde_json::Value) -> Self {
        match Value::from_json(json) {
            Value::Object(values) => Self::with_values(values, None),
            _ => Self::new(),
        }
    }

    /// A new empty scope whose parent is `self`
    pub fn child(&self) -> Environment {
        Self::with_values(ObjectRef::new(), Some(self.cheap_clone()))
    }

    /// A new scope with the given values whose parent is `self`
    pub fn extend(&self, values: ObjectRef) -> Environment {
        Self::with_values(values, Some(self.cheap_clone()))
    }

    pub fn values(&self) -> &ObjectRef {
        &self.0.values
    }

    pub fn prev(&self) -> Option<&Environment> {
        self.0.prev.as_ref()
    }

    /// Declare (or overwrite) a variable in this scope
    pub fn define(&self, name: impl Into<JsString>, value: Value) {
        self.0.values.set(name, value);
    }

    /// Find the scope that declares `name` and the current value
    pub fn lookup(&self, name: &str) -> Option<(ObjectRef, Value)> {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(value) = current.0.values.get(name) {
                return Some((current.0.values.cheap_clone(), value));
            }
            env = current.prev();
        }
        None
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lookup(name).map(|(_, value)| value)
    }

    /// Assign to an existing variable in the nearest declaring scope,
    /// or declare it in this scope when no scope has it
    pub fn set(&self, name: &str, value: Value) {
        match self.lookup(name) {
            Some((scope, _)) => scope.set(name, value),
            None => self.define(name, value),
        }
    }

    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut env = self.prev();
        while let Some(current) = env {
            depth += 1;
            env = current.prev();
        }
        depth
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: values may be large or cyclic
        let mut list = f.debug_list();
        let mut env = Some(self);
        while let Some(current) = env {
            list.entry(&current.0.values.keys());
            env = current.prev();
        }
        list.finish()
    }
}
