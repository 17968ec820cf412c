// Binding declared controller parameters from the request and the container

use crate::controller::ControllerHandle;
use crate::definition::{ParamKind, ParamSpec, Resolved};
use crate::{Container, Error, HttpRequest};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Binds a controller's declared parameter list, in declaration order.
///
/// For each parameter the first matching source wins: the request itself
/// (by kind), a request attribute under the parameter's name (scalar kinds
/// coerced), a container service by declared type, the declared default,
/// null for nullable parameters. Anything else fails loudly.
pub struct ArgumentResolver {
    container: Arc<Container>,
}

impl ArgumentResolver {
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }

    pub fn resolve(
        &self,
        request: &HttpRequest,
        controller: &ControllerHandle,
    ) -> Result<Vec<Resolved>, Error> {
        controller
            .parameters()
            .iter()
            .map(|param| self.bind(request, controller.name(), param))
            .collect()
    }

    fn bind(
        &self,
        request: &HttpRequest,
        controller: &str,
        param: &ParamSpec,
    ) -> Result<Resolved, Error> {
        if matches!(param.kind, ParamKind::Request) {
            return Ok(Resolved::Request(request.clone()));
        }

        if let Some(value) = request.attribute(&param.name) {
            let coerced = coerce(value, param.kind).ok_or_else(|| {
                Error::UnresolvableArgument {
                    controller: controller.to_string(),
                    parameter: param.name.clone(),
                    reason: format!(
                        "attribute value {value} cannot be cast to {}",
                        param.kind.type_label()
                    ),
                }
            })?;
            trace!(controller, parameter = %param.name, "Bound from request attribute");
            return Ok(Resolved::Value(coerced));
        }

        if let ParamKind::Service(key) = &param.kind {
            match self.container.get_for_type(key) {
                Ok(instance) => {
                    trace!(controller, parameter = %param.name, "Bound from container");
                    return Ok(Resolved::Service(instance));
                }
                Err(Error::ServiceNotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }

        if let Some(default) = &param.default {
            return Ok(Resolved::Value(default.clone()));
        }
        if param.nullable {
            return Ok(Resolved::Null);
        }

        Err(Error::UnresolvableArgument {
            controller: controller.to_string(),
            parameter: param.name.clone(),
            reason: "no attribute, service, or default matched".to_string(),
        })
    }
}

/// The documented scalar coercion table for request attributes.
///
/// Numeric strings parse to the numeric kinds; booleans accept the
/// `true/false/1/0` spellings; the string kind renders numbers and bools.
/// Non-scalar declared kinds bind the raw value without casting.
fn coerce(value: &Value, kind: ParamKind) -> Option<Value> {
    match kind {
        ParamKind::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::Number(n) => {
                let f = n.as_f64()?;
                (f.fract() == 0.0).then(|| Value::from(f as i64))
            }
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            Value::Bool(b) => Some(Value::from(i64::from(*b))),
            _ => None,
        },
        ParamKind::Float => match value {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        ParamKind::Bool => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(Value::Bool(true)),
                Some(0) => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ParamKind::Str => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        // Non-scalar kinds bind the raw attribute without casting.
        ParamKind::Value | ParamKind::Service(_) => Some(value.clone()),
        ParamKind::Request => None,
    }
}
