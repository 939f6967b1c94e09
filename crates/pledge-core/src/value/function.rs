//! Callable values

use super::{PlainObject, ThrowResult, Value};
use std::fmt;
use std::rc::Rc;

/// Native function body: `(receiver, arguments) -> return or throw`
pub type NativeFn = dyn Fn(&Value, &[Value]) -> ThrowResult;

/// Shared handle to a callable; clones keep the same identity
///
/// Functions carry their own property bag, so a function can itself be a
/// thenable.
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

struct FunctionInner {
    name: String,
    body: Box<NativeFn>,
    properties: PlainObject,
}

impl Function {
    /// Create an anonymous function
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> ThrowResult + 'static,
    {
        Self::named("anonymous", body)
    }

    /// Create a named function
    pub fn named<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> ThrowResult + 'static,
    {
        Function(Rc::new(FunctionInner {
            name: name.into(),
            body: Box::new(body),
            properties: PlainObject::new(),
        }))
    }

    /// Create a function of one argument that ignores its receiver
    pub fn unary<F>(body: F) -> Self
    where
        F: Fn(Value) -> ThrowResult + 'static,
    {
        Self::new(move |_this, args| body(args.first().cloned().unwrap_or_default()))
    }

    /// Call with an explicit receiver; missing arguments read as `undefined`
    pub fn call(&self, this: &Value, args: &[Value]) -> ThrowResult {
        (self.0.body)(this, args)
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Own properties
    pub fn properties(&self) -> &PlainObject {
        &self.0.properties
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function {}]", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_receives_receiver_and_args() {
        let f = Function::new(|this, args| {
            assert_eq!(*this, Value::Null);
            Ok(Value::from(args.len() as i32))
        });
        assert_eq!(f.call(&Value::Null, &[Value::from(1), Value::from(2)]), Ok(Value::from(2)));
    }

    #[test]
    fn test_unary_defaults_missing_argument() {
        let f = Function::unary(|v| Ok(Value::Bool(v == Value::Undefined)));
        assert_eq!(f.call(&Value::Undefined, &[]), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_throw_is_err() {
        let f = Function::named("thrower", |_, _| Err(Value::error("boom")));
        assert!(f.call(&Value::Undefined, &[]).is_err());
        assert_eq!(f.name(), "thrower");
    }

    #[test]
    fn test_function_properties() {
        let f = Function::new(|_, _| Ok(Value::Undefined));
        f.properties().set("then", 3);
        assert_eq!(Value::Function(f).get("then"), Ok(Value::from(3)));
    }
}
