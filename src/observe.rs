//! Observable storage: arrays and objects that notify listeners on mutation.
//!
//! This is the trap surface of the engine. Instead of intercepting method
//! calls on foreign objects, every collection the engine can watch is an
//! `ArrayRef` or `ObjectRef`, and every mutating method reports a
//! [`MutationEvent`] to registered listeners after the change is applied.
//!
//! Listeners are held by a [`Subscription`]; dropping it removes the listener.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::prelude::{IndexMap, index_map_new};
use crate::value::{CheapClone, JsString, Value};

/// Mutating array methods the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMethod {
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
}

impl ArrayMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ArrayMethod::Push => "push",
            ArrayMethod::Pop => "pop",
            ArrayMethod::Shift => "shift",
            ArrayMethod::Unshift => "unshift",
            ArrayMethod::Splice => "splice",
        }
    }
}

/// A structural change reported by an observable array or object.
///
/// `pop` and `shift` are reported as `Splice` events carrying their own
/// method name, so consumers only need to handle append, splice, prepend
/// and property writes.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    /// Items appended at `start` (the previous length)
    Push { start: usize, items: Vec<Value> },
    /// `removed` taken out at `start`, `inserted` put in their place
    Splice {
        method: ArrayMethod,
        start: usize,
        removed: Vec<Value>,
        inserted: Vec<Value>,
    },
    /// Items inserted at the front
    Unshift { items: Vec<Value> },
    /// Property write on an observable object
    Write { property: JsString, value: Value },
}

impl MutationEvent {
    /// Name of the method (or `"set"` for property writes) that caused the event
    pub fn method_name(&self) -> &'static str {
        match self {
            MutationEvent::Push { .. } => ArrayMethod::Push.name(),
            MutationEvent::Splice { method, .. } => method.name(),
            MutationEvent::Unshift { .. } => ArrayMethod::Unshift.name(),
            MutationEvent::Write { .. } => "set",
        }
    }
}

pub type Listener = Rc<dyn Fn(&MutationEvent)>;

/// Registered listeners of one observable
#[derive(Default)]
pub struct ObserverList {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(u64, Listener)>>,
}

impl ObserverList {
    fn add(self: &Rc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, listener));
        Subscription {
            list: Rc::downgrade(self),
            id,
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
    }

    fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn notify(&self, event: &MutationEvent) {
        // Snapshot so listeners may subscribe/unsubscribe while being notified
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.cheap_clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Keeps a listener registered; dropping it unregisters the listener
pub struct Subscription {
    list: Weak<ObserverList>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({})", self.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Arrays
// ═══════════════════════════════════════════════════════════════════════════════

struct ArrayCell {
    elements: RefCell<Vec<Value>>,
    observers: Rc<ObserverList>,
}

/// A dense, index-addressable, observable sequence
#[derive(Clone)]
pub struct ArrayRef(Rc<ArrayCell>);

impl CheapClone for ArrayRef {}

impl ArrayRef {
    pub fn new(elements: Vec<Value>) -> Self {
        ArrayRef(Rc::new(ArrayCell {
            elements: RefCell::new(elements),
            observers: Rc::new(ObserverList::default()),
        }))
    }

    pub fn from_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(values.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.elements.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.elements.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.elements.borrow().clone()
    }

    /// Append items, returning the new length
    pub fn push(&self, items: Vec<Value>) -> usize {
        let (start, len) = {
            let mut elements = self.0.elements.borrow_mut();
            let start = elements.len();
            elements.extend(items.iter().cloned());
            (start, elements.len())
        };
        self.0
            .observers
            .notify(&MutationEvent::Push { start, items });
        len
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.splice_with(ArrayMethod::Pop, len - 1, 1, Vec::new())
            .into_iter()
            .next()
    }

    pub fn shift(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        self.splice_with(ArrayMethod::Shift, 0, 1, Vec::new())
            .into_iter()
            .next()
    }

    /// Insert items at the front, returning the new length
    pub fn unshift(&self, items: Vec<Value>) -> usize {
        let len = {
            let mut elements = self.0.elements.borrow_mut();
            for (offset, item) in items.iter().enumerate() {
                elements.insert(offset, item.clone());
            }
            elements.len()
        };
        self.0.observers.notify(&MutationEvent::Unshift { items });
        len
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    /// Out-of-range arguments are clamped. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        self.splice_with(ArrayMethod::Splice, start, delete_count, items)
    }

    fn splice_with(
        &self,
        method: ArrayMethod,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Vec<Value> {
        let (start, removed) = {
            let mut elements = self.0.elements.borrow_mut();
            let start = start.min(elements.len());
            let end = start.saturating_add(delete_count).min(elements.len());
            let removed: Vec<Value> = elements.splice(start..end, items.iter().cloned()).collect();
            (start, removed)
        };
        self.0.observers.notify(&MutationEvent::Splice {
            method,
            start,
            removed: removed.clone(),
            inserted: items,
        });
        removed
    }

    pub fn observe(&self, listener: impl Fn(&MutationEvent) + 'static) -> Subscription {
        self.0.observers.add(Rc::new(listener))
    }

    pub fn observer_count(&self) -> usize {
        self.0.observers.len()
    }

    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity for the lifetime of the array
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec().iter()).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Objects
// ═══════════════════════════════════════════════════════════════════════════════

struct ObjectCell {
    properties: RefCell<IndexMap<JsString, Value>>,
    observers: Rc<ObserverList>,
}

/// An observable property bag (also used for environment scopes)
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectCell>);

impl CheapClone for ObjectRef {}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRef {
    pub fn new() -> Self {
        ObjectRef(Rc::new(ObjectCell {
            properties: RefCell::new(index_map_new()),
            observers: Rc::new(ObserverList::default()),
        }))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<JsString>,
        V: Into<Value>,
    {
        let object = Self::new();
        for (key, value) in pairs {
            object.insert_silently(key.into(), value.into());
        }
        object
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.properties.borrow().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.properties.borrow().contains_key(key)
    }

    /// Write a property and notify observers
    pub fn set(&self, key: impl Into<JsString>, value: Value) {
        let property = key.into();
        self.0
            .properties
            .borrow_mut()
            .insert(property.cheap_clone(), value.clone());
        self.0
            .observers
            .notify(&MutationEvent::Write { property, value });
    }

    /// Write a property without notifying (construction only)
    pub(crate) fn insert_silently(&self, key: JsString, value: Value) {
        self.0.properties.borrow_mut().insert(key, value);
    }

    pub fn keys(&self) -> Vec<JsString> {
        self.0.properties.borrow().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(JsString, Value)> {
        self.0
            .properties
            .borrow()
            .iter()
            .map(|(k, v)| (k.cheap_clone(), v.clone()))
            .collect()
    }

    pub fn observe(&self, listener: impl Fn(&MutationEvent) + 'static) -> Subscription {
        self.0.observers.add(Rc::new(listener))
    }

    pub fn observer_count(&self) -> usize {
        self.0.observers.len()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.entries() {
            map.entry(&key.as_str(), &value);
        }
        map.finish()
    }
}
