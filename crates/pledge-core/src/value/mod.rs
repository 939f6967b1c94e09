//! Dynamic values carried by deferred values
//!
//! Settlement values, rejection reasons and handler results are all
//! [`Value`]s. The type is a tagged union: primitives compare by value,
//! everything else compares by identity. The resolution procedure recognizes
//! our own deferred values through the [`Value::Deferred`] variant and probes
//! every other object-like variant for a callable `then` member.

mod function;
mod object;

pub use function::{Function, NativeFn};
pub use object::{HostObject, ObjectRef, PlainObject};

use crate::deferred::Deferred;
use std::fmt;
use std::rc::Rc;

/// Outcome of calling into user code: `Ok` is a normal return, `Err` carries
/// the thrown value
pub type ThrowResult = Result<Value, Value>;

/// Nesting limit for [`Value::to_json`]; deeper objects render as a marker
const JSON_DEPTH_LIMIT: usize = 8;

/// A dynamically typed value
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// IEEE-754 number
    Number(f64),
    /// Immutable string
    String(Rc<str>),
    /// Error object
    Error(ErrorRef),
    /// Host or plain object
    Object(ObjectRef),
    /// Callable
    Function(Function),
    /// Deferred value of this runtime
    Deferred(Deferred),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    /// Create a plain `Error` object
    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(ErrorRef::new(ErrorKind::Error, message))
    }

    /// Create a `TypeError` object
    pub fn type_error(message: impl Into<String>) -> Self {
        Value::Error(ErrorRef::new(ErrorKind::TypeError, message))
    }

    /// Wrap a plain object
    pub fn object(object: PlainObject) -> Self {
        Value::Object(ObjectRef::new(object))
    }

    /// Whether this is `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Whether this value may expose members (objects, callables, errors,
    /// deferred values)
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            Value::Error(_) | Value::Object(_) | Value::Function(_) | Value::Deferred(_)
        )
    }

    /// The callable behind this value, if any
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The deferred value behind this value, if any
    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }

    /// The numeric payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The error object, if this is an error
    pub fn as_error(&self) -> Option<&ErrorRef> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Short type tag used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Error(_) => "error",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Deferred(_) => "deferred",
        }
    }

    /// Read a member
    ///
    /// Host objects may throw from reads; the thrown value comes back as
    /// `Err`. Reading from `undefined`/`null` throws a `TypeError`.
    pub fn get(&self, key: &str) -> ThrowResult {
        match self {
            Value::Undefined | Value::Null => Err(Value::type_error(format!(
                "Cannot read property '{}' of {}",
                key,
                self.type_name()
            ))),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(Value::Undefined),
            Value::Error(e) => Ok(match key {
                "name" => Value::string(e.kind().name()),
                "message" => Value::string(e.message()),
                _ => Value::Undefined,
            }),
            Value::Object(o) => o.get(key),
            Value::Function(f) => Ok(f.properties().get_own(key)),
            Value::Deferred(d) => Ok(match key {
                "then" => Value::Function(d.then_function()),
                _ => Value::Undefined,
            }),
        }
    }

    /// SameValue comparison: primitives by value (NaN equals NaN), reference
    /// variants by identity
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan())
                    || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Render as JSON for reports
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> serde_json::Value {
        use serde_json::json;

        if depth > JSON_DEPTH_LIMIT {
            return json!("[nested]");
        }
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| json!(format_number(*n))),
            Value::String(s) => json!(s.as_ref()),
            Value::Error(e) => json!({ "error": e.kind().name(), "message": e.message() }),
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                let mut keys = o.keys();
                keys.sort();
                for key in keys {
                    let rendered = match o.get(&key) {
                        Ok(v) => v.to_json_at(depth + 1),
                        Err(_) => json!("[throws]"),
                    };
                    map.insert(key, rendered);
                }
                serde_json::Value::Object(map)
            }
            Value::Function(f) => json!(format!("[Function {}]", f.name())),
            Value::Deferred(d) => json!({
                "deferred": d.id().as_u64(),
                "state": d.state().as_str(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Error(e) => write!(f, "{}", e),
            Value::Object(o) => write!(f, "[object {}]", o.class_name()),
            Value::Function(func) => write!(f, "[Function {}]", func.name()),
            Value::Deferred(d) => write!(f, "{}", d),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s.as_ref()),
            other => write!(f, "{}", other),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
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
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<ErrorRef> for Value {
    fn from(e: ErrorRef) -> Self {
        Value::Error(e)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<PlainObject> for Value {
    fn from(o: PlainObject) -> Self {
        Value::object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Value::Deferred(d)
    }
}

/// Built-in error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic `Error`
    Error,
    /// `TypeError`
    TypeError,
    /// `RangeError`
    RangeError,
}

impl ErrorKind {
    /// Class name as shown in messages
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
        }
    }
}

/// Shared handle to an error object; clones keep the same identity
#[derive(Clone)]
pub struct ErrorRef(Rc<ErrorObject>);

struct ErrorObject {
    kind: ErrorKind,
    message: String,
}

impl ErrorRef {
    /// Allocate a new error object
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorRef(Rc::new(ErrorObject {
            kind,
            message: message.into(),
        }))
    }

    /// Error class
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ErrorRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for ErrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.message.is_empty() {
            write!(f, "{}", self.0.kind.name())
        } else {
            write!(f, "{}: {}", self.0.kind.name(), self.0.message)
        }
    }
}

impl fmt::Debug for ErrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
