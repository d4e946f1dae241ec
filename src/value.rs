//! Runtime value representation
//!
//! The `Value` type shared by the head evaluator, the element evaluators and
//! the observable collections the loop directive binds to.

use std::fmt;
use std::rc::Rc;

use crate::error::LoopError;
use crate::observe::{ArrayRef, ObjectRef};

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at call sites that a clone only bumps a reference count.
/// `ArrayRef`, `ObjectRef`, `JsString` and `Environment` are all cheap.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

/// Intrinsics the loop controller exposes to the head script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `bind(collection)` registers the iteration source
    Bind,
}

impl Intrinsic {
    pub fn name(&self) -> &'static str {
        match self {
            Intrinsic::Bind => "bind",
        }
    }
}

/// Signature of host-provided functions callable from expressions
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, LoopError>;

/// A host function exposed to expressions (predicates, formatters, ...)
#[derive(Clone)]
pub struct NativeFunction {
    name: JsString,
    func: Rc<NativeFn>,
}

impl CheapClone for NativeFunction {}

impl NativeFunction {
    pub fn new(
        name: impl Into<JsString>,
        func: impl Fn(&[Value]) -> Result<Value, LoopError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &JsString {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, LoopError> {
        (self.func)(args)
    }

    pub fn ptr_eq(&self, other: &NativeFunction) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

/// A value as seen by expressions
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(NativeFunction),
    Intrinsic(Intrinsic),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Intrinsic(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.as_str().is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Intrinsic(_) => true,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Identity comparison: primitives by value, collections and functions by reference
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Intrinsic(a), Value::Intrinsic(b)) => a == b,
            _ => false,
        }
    }

    /// Text used when a value is written into a rendered element
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(arr) => arr
                .to_vec()
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("function {}()", f.name()),
            Value::Intrinsic(i) => format!("function {}()", i.name()),
        }
    }

    /// Build observable data from a JSON literal
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(JsString::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::Array(ArrayRef::new(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let object = ObjectRef::new();
                for (key, value) in map {
                    object.insert_silently(JsString::from(key.as_str()), Value::from_json(value));
                }
                Value::Object(object)
            }
        }
    }

    /// Snapshot a value back to JSON; functions become `null`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Intrinsic(_) => {
                serde_json::Value::Null
            }
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.to_vec().iter().map(Value::to_json).collect())
            }
            Value::Object(obj) => serde_json::Value::Object(
                obj.entries()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s.as_str()),
            Value::Array(arr) => f.debug_list().entries(arr.to_vec().iter()).finish(),
            Value::Object(obj) => {
                let mut map = f.debug_map();
                for (key, value) in obj.entries() {
                    map.entry(&key.as_str(), &value);
                }
                map.finish()
            }
            Value::Function(func) => write!(f, "[Function: {}]", func.name()),
            Value::Intrinsic(i) => write!(f, "[Function: {}]", i.name()),
        }
    }
}

/// Structural equality for tests and assertions; collections compare by content
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || a.to_vec() == b.to_vec(),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b) || a.entries() == b.entries(),
            _ => self.same_value(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

impl From<ArrayRef> for Value {
    fn from(arr: ArrayRef) -> Self {
        Value::Array(arr)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<NativeFunction> for Value {
    fn from(func: NativeFunction) -> Self {
        Value::Function(func)
    }
}

/// Reference-counted immutable string
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(Rc::from(s))
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(Rc::from(s))
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &*self.0)
    }
}
