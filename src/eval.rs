//! Expression evaluator
//!
//! A small tree-walking evaluator for loop heads and bound element text.
//! It knows nothing about loops itself: the `bind` intrinsic is delegated
//! to an [`IntrinsicHost`], and every identifier/member read and
//! every node exit is reported to an optional [`EvaluationListener`].
//!
//! Resuming a captured loop continuation is expressed as re-evaluating the
//! source expression with a *replay* value: when evaluation reaches the
//! recorded `bind(...)` call site, the call yields the replay value instead
//! of calling the host again.

use crate::ast::{Expression, ExpressionKind, ExprId, LiteralValue, MemberProperty, Pattern};
use crate::env::Environment;
use crate::error::LoopError;
use crate::observe::ArrayRef;
use crate::value::{CheapClone, Intrinsic, JsString, Value};

/// A storage location read while an expression ran.
///
/// `object` is the object or array the read went through; `property` is the
/// key that was read, `None` when the collection itself was the target.
#[derive(Debug, Clone)]
pub struct ObservableBinding {
    pub object: Value,
    pub property: Option<JsString>,
}

/// Receives evaluation events
pub trait EvaluationListener {
    /// A variable or property was read
    fn observed(&mut self, binding: ObservableBinding);

    /// Evaluation of `node` finished with `value`
    fn exited(&mut self, node: ExprId, value: &Value);
}

/// Implements the loop intrinsics for one evaluation
pub trait IntrinsicHost {
    fn bind(&mut self, candidate: Value, site: ExprId) -> Result<Value, LoopError>;
}

/// Host for expressions evaluated outside a loop head
pub struct NoIntrinsics;

impl IntrinsicHost for NoIntrinsics {
    fn bind(&mut self, _candidate: Value, _site: ExprId) -> Result<Value, LoopError> {
        Err(LoopError::type_error(
            "bind() can only be used in a for-of loop head",
        ))
    }
}

pub struct Evaluator<'h> {
    env: Environment,
    host: &'h mut dyn IntrinsicHost,
    listener: Option<&'h mut dyn EvaluationListener>,
    replay: Option<(ExprId, Value)>,
}

impl<'h> Evaluator<'h> {
    pub fn new(env: Environment, host: &'h mut dyn IntrinsicHost) -> Self {
        Self {
            env,
            host,
            listener: None,
            replay: None,
        }
    }

    pub fn with_listener(mut self, listener: &'h mut dyn EvaluationListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Make the `bind` call at `site` yield `value` instead of reaching the host
    pub fn with_replay(mut self, site: ExprId, value: Value) -> Self {
        self.replay = Some((site, value));
        self
    }

    pub fn evaluate(&mut self, expr: &Expression) -> Result<Value, LoopError> {
        let value = match &expr.kind {
            ExpressionKind::Literal(literal) => literal_value(literal),
            ExpressionKind::Identifier(name) => self.identifier(name)?,
            ExpressionKind::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Value::Array(ArrayRef::new(values))
            }
            ExpressionKind::Member { object, property } => {
                let target = self.evaluate(object)?;
                let key = self.property_key(property)?;
                self.read_property(&target, &key)?
            }
            ExpressionKind::Call { callee, arguments } => self.call(expr.id, callee, arguments)?,
            ExpressionKind::Not(operand) => Value::Boolean(!self.evaluate(operand)?.is_truthy()),
        };
        if let Some(listener) = self.listener.as_deref_mut() {
            listener.exited(expr.id, &value);
        }
        Ok(value)
    }

    fn identifier(&mut self, name: &JsString) -> Result<Value, LoopError> {
        match self.env.lookup(name.as_str()) {
            Some((scope, value)) => {
                self.observe(Value::Object(scope), Some(name.cheap_clone()));
                Ok(value)
            }
            None if name.as_str() == "undefined" => Ok(Value::Undefined),
            None => Err(LoopError::reference_error(name.as_str())),
        }
    }

    fn property_key(&mut self, property: &MemberProperty) -> Result<PropertyKey, LoopError> {
        match property {
            MemberProperty::Identifier(name) => Ok(PropertyKey::Name(name.cheap_clone())),
            MemberProperty::Computed(key) => match self.evaluate(key)? {
                Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                    Ok(PropertyKey::Index(n as usize))
                }
                other => Ok(PropertyKey::Name(JsString::from(other.to_display_string()))),
            },
        }
    }

    fn read_property(&mut self, target: &Value, key: &PropertyKey) -> Result<Value, LoopError> {
        match target {
            Value::Object(object) => {
                let name = key.to_js_string();
                self.observe(target.clone(), Some(name.cheap_clone()));
                Ok(object.get(name.as_str()).unwrap_or_default())
            }
            Value::Array(array) => {
                self.observe(target.clone(), Some(key.to_js_string()));
                Ok(match key {
                    PropertyKey::Index(i) => array.get(*i).unwrap_or_default(),
                    PropertyKey::Name(name) if name.as_str() == "length" => {
                        Value::Number(array.len() as f64)
                    }
                    PropertyKey::Name(_) => Value::Undefined,
                })
            }
            Value::String(s) => Ok(match key {
                PropertyKey::Name(name) if name.as_str() == "length" => {
                    Value::Number(s.as_str().chars().count() as f64)
                }
                _ => Value::Undefined,
            }),
            Value::Undefined | Value::Null => Err(LoopError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                target.type_name(),
                key.to_js_string()
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    fn call(
        &mut self,
        site: ExprId,
        callee: &Expression,
        arguments: &[Expression],
    ) -> Result<Value, LoopError> {
        if let ExpressionKind::Member { object, property } = &callee.kind {
            let receiver = self.evaluate(object)?;
            let key = self.property_key(property)?;
            let args = self.arguments(arguments)?;
            return self.call_method(&receiver, &key, &args);
        }

        match self.evaluate(callee)? {
            Value::Intrinsic(Intrinsic::Bind) => {
                if self.replay.as_ref().is_some_and(|(at, _)| *at == site) {
                    if let Some((_, value)) = self.replay.take() {
                        return Ok(value);
                    }
                }
                let candidate = match arguments.first() {
                    Some(argument) => self.evaluate(argument)?,
                    None => Value::Undefined,
                };
                self.host.bind(candidate, site)
            }
            Value::Function(func) => {
                let args = self.arguments(arguments)?;
                func.call(&args)
            }
            other => Err(LoopError::type_error(format!(
                "{} is not a function",
                describe_callee(callee, &other)
            ))),
        }
    }

    fn arguments(&mut self, arguments: &[Expression]) -> Result<Vec<Value>, LoopError> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.evaluate(argument)?);
        }
        Ok(values)
    }

    fn call_method(
        &mut self,
        receiver: &Value,
        key: &PropertyKey,
        args: &[Value],
    ) -> Result<Value, LoopError> {
        let name = key.to_js_string();
        match receiver {
            Value::Array(array) => array_method(array, name.as_str(), args),
            Value::Object(object) => {
                self.observe(receiver.clone(), Some(name.cheap_clone()));
                match object.get(name.as_str()) {
                    Some(Value::Function(func)) => func.call(args),
                    _ => Err(LoopError::type_error(format!(
                        "{} is not a function",
                        name
                    ))),
                }
            }
            _ => Err(LoopError::type_error(format!(
                "Cannot call method '{}' on {}",
                name,
                receiver.type_name()
            ))),
        }
    }

    fn observe(&mut self, object: Value, property: Option<JsString>) {
        if let Some(listener) = self.listener.as_deref_mut() {
            listener.observed(ObservableBinding { object, property });
        }
    }
}

enum PropertyKey {
    Name(JsString),
    Index(usize),
}

impl PropertyKey {
    fn to_js_string(&self) -> JsString {
        match self {
            PropertyKey::Name(name) => name.cheap_clone(),
            PropertyKey::Index(i) => JsString::from(i.to_string()),
        }
    }
}

fn literal_value(literal: &LiteralValue) -> Value {
    match literal {
        LiteralValue::Number(n) => Value::Number(*n),
        LiteralValue::String(s) => Value::String(s.cheap_clone()),
        LiteralValue::Boolean(b) => Value::Boolean(*b),
        LiteralValue::Null => Value::Null,
    }
}

fn describe_callee(callee: &Expression, value: &Value) -> String {
    match &callee.kind {
        ExpressionKind::Identifier(name) => name.to_string(),
        _ => value.type_name().to_string(),
    }
}

fn call_callback(callback: Option<&Value>, args: &[Value]) -> Result<Value, LoopError> {
    match callback {
        Some(Value::Function(func)) => func.call(args),
        Some(other) => Err(LoopError::type_error(format!(
            "{} is not a function",
            other.type_name()
        ))),
        None => Err(LoopError::type_error("undefined is not a function")),
    }
}

fn index_arg(args: &[Value], position: usize, len: usize, default: usize) -> usize {
    match args.get(position) {
        Some(Value::Number(n)) if *n < 0.0 => len.saturating_sub((-*n) as usize),
        Some(Value::Number(n)) => (*n as usize).min(len),
        _ => default,
    }
}

/// Non-mutating array methods available to expressions
fn array_method(array: &ArrayRef, name: &str, args: &[Value]) -> Result<Value, LoopError> {
    let elements = array.to_vec();
    match name {
        "filter" => {
            let mut kept = Vec::new();
            for (index, item) in elements.into_iter().enumerate() {
                let keep = call_callback(args.first(), &[item.clone(), Value::from(index as f64)])?;
                if keep.is_truthy() {
                    kept.push(item);
                }
            }
            Ok(Value::Array(ArrayRef::new(kept)))
        }
        "map" => {
            let mut mapped = Vec::with_capacity(elements.len());
            for (index, item) in elements.into_iter().enumerate() {
                mapped.push(call_callback(args.first(), &[item, Value::from(index as f64)])?);
            }
            Ok(Value::Array(ArrayRef::new(mapped)))
        }
        "slice" => {
            let len = elements.len();
            let start = index_arg(args, 0, len, 0);
            let end = index_arg(args, 1, len, len).max(start);
            Ok(Value::Array(ArrayRef::new(
                elements.get(start..end).map(<[Value]>::to_vec).unwrap_or_default(),
            )))
        }
        "concat" => {
            let mut joined = elements;
            for arg in args {
                match arg {
                    Value::Array(other) => joined.extend(other.to_vec()),
                    other => joined.push(other.clone()),
                }
            }
            Ok(Value::Array(ArrayRef::new(joined)))
        }
        "includes" => {
            let needle = args.first().cloned().unwrap_or_default();
            Ok(Value::Boolean(elements.iter().any(|v| v.same_value(&needle))))
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or_default();
            let position = elements.iter().position(|v| v.same_value(&needle));
            Ok(Value::Number(position.map(|p| p as f64).unwrap_or(-1.0)))
        }
        "join" => {
            let separator = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or(",")
                .to_string();
            Ok(Value::from(
                elements
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }
        _ => Err(LoopError::type_error(format!(
            "array.{} is not a function",
            name
        ))),
    }
}

/// Evaluate an expression that cannot use the loop intrinsics
pub fn evaluate_expression(expr: &Expression, env: &Environment) -> Result<Value, LoopError> {
    let mut host = NoIntrinsics;
    Evaluator::new(env.cheap_clone(), &mut host).evaluate(expr)
}

/// Declare the names of `pattern` in `env`, destructuring `value`
pub fn bind_pattern(pattern: &Pattern, value: Value, env: &Environment) -> Result<(), LoopError> {
    match pattern {
        Pattern::Identifier(id) => {
            env.define(id.name.cheap_clone(), value);
            Ok(())
        }
        Pattern::Array(elements) => {
            let Value::Array(array) = &value else {
                return Err(LoopError::type_error(format!(
                    "{} is not iterable",
                    value.type_name()
                )));
            };
            for (index, element) in elements.iter().enumerate() {
                if let Some(element) = element {
                    bind_pattern(element, array.get(index).unwrap_or_default(), env)?;
                }
            }
            Ok(())
        }
        Pattern::Object(properties) => {
            if matches!(value, Value::Undefined | Value::Null) {
                return Err(LoopError::type_error(format!(
                    "Cannot destructure '{}' as it is {}",
                    value.to_display_string(),
                    value.type_name()
                )));
            }
            for property in properties {
                let field = match &value {
                    Value::Object(object) => object.get(property.key.name.as_str()),
                    _ => None,
                };
                bind_pattern(&property.value, field.unwrap_or_default(), env)?;
            }
            Ok(())
        }
    }
}
