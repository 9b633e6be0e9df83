//! Static tool registry.
//!
//! Adapters declare their tools as `const` tables of [`ToolSpec`]. The registry turns those into
//! MCP `Tool` listings, validates incoming arguments before anything is sent upstream, and
//! renders call outcomes into `CallToolResult`s.

use crate::error::{Result, UpstreamError};
use crate::semantics::{Effect, annotations_for_effect};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Accepted shape of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer { min: Option<i64>, max: Option<i64> },
    Number,
    Boolean,
    /// String restricted to a fixed set of values.
    Enum(&'static [&'static str]),
    StringList,
    IntegerList,
    Object,
    ObjectList,
    /// Passed through untouched.
    Any,
}

impl ParamKind {
    pub const INTEGER: Self = Self::Integer {
        min: None,
        max: None,
    };

    #[must_use]
    pub const fn int_range(min: i64, max: i64) -> Self {
        Self::Integer {
            min: Some(min),
            max: Some(max),
        }
    }

    #[must_use]
    pub const fn int_min(min: i64) -> Self {
        Self::Integer {
            min: Some(min),
            max: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Int(i64),
    Str(&'static str),
    Bool(bool),
}

impl ParamDefault {
    fn to_value(self) -> Value {
        match self {
            Self::Int(i) => json!(i),
            Self::Str(s) => json!(s),
            Self::Bool(b) => json!(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<ParamDefault>,
    pub description: &'static str,
}

impl ParamSpec {
    #[must_use]
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    #[must_use]
    pub const fn default_int(mut self, value: i64) -> Self {
        self.default = Some(ParamDefault::Int(value));
        self
    }

    #[must_use]
    pub const fn default_str(mut self, value: &'static str) -> Self {
        self.default = Some(ParamDefault::Str(value));
        self
    }

    #[must_use]
    pub const fn default_bool(mut self, value: bool) -> Self {
        self.default = Some(ParamDefault::Bool(value));
        self
    }

    fn schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamKind::String => json!({"type": "string"}),
            ParamKind::Integer { min, max } => {
                let mut s = json!({"type": "integer"});
                if let Some(min) = min {
                    s["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    s["maximum"] = json!(max);
                }
                s
            }
            ParamKind::Number => json!({"type": "number"}),
            ParamKind::Boolean => json!({"type": "boolean"}),
            ParamKind::Enum(values) => json!({"type": "string", "enum": values}),
            ParamKind::StringList => json!({"type": "array", "items": {"type": "string"}}),
            ParamKind::IntegerList => json!({"type": "array", "items": {"type": "integer"}}),
            ParamKind::Object => json!({"type": "object"}),
            ParamKind::ObjectList => json!({"type": "array", "items": {"type": "object"}}),
            ParamKind::Any => json!({}),
        };
        if !self.description.is_empty() {
            schema["description"] = json!(self.description);
        }
        if let Some(default) = self.default {
            schema["default"] = default.to_value();
        }
        schema
    }

    fn check(&self, value: Value) -> Result<Value> {
        let bad = |expected: &str| {
            UpstreamError::validation(format!(
                "parameter '{}' must be {expected}",
                self.name
            ))
        };

        match self.kind {
            ParamKind::String => match value {
                Value::String(_) => Ok(value),
                _ => Err(bad("a string")),
            },
            ParamKind::Integer { min, max } => {
                let n = as_integer(&value).ok_or_else(|| bad("an integer"))?;
                if let Some(min) = min
                    && n < min
                {
                    return Err(bad(&format!("at least {min}")));
                }
                if let Some(max) = max
                    && n > max
                {
                    return Err(bad(&format!("at most {max}")));
                }
                Ok(json!(n))
            }
            ParamKind::Number => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(|f| json!(f))
                    .map_err(|_| bad("a number")),
                _ => Err(bad("a number")),
            },
            ParamKind::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(json!(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(json!(false)),
                _ => Err(bad("a boolean")),
            },
            ParamKind::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => Ok(value),
                _ => Err(bad(&format!("one of: {}", allowed.join(", ")))),
            },
            ParamKind::StringList => match value {
                Value::String(s) => Ok(json!([s])),
                Value::Array(items) if items.iter().all(Value::is_string) => {
                    Ok(Value::Array(items))
                }
                _ => Err(bad("a list of strings")),
            },
            ParamKind::IntegerList => {
                let items = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                items
                    .iter()
                    .map(|v| as_integer(v).map(Value::from))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array)
                    .ok_or_else(|| bad("a list of integers"))
            }
            ParamKind::Object => match value {
                Value::Object(_) => Ok(value),
                _ => Err(bad("an object")),
            },
            ParamKind::ObjectList => match value {
                Value::Array(items) if items.iter().all(Value::is_object) => {
                    Ok(Value::Array(items))
                }
                _ => Err(bad("a list of objects")),
            },
            ParamKind::Any => Ok(value),
        }
    }
}

/// Integral numbers (including `3.0`) and numeric strings within the `i64` range.
fn as_integer(value: &Value) -> Option<i64> {
    // 2^63 as f64; `i64::MAX as f64` rounds up to it, so the upper bound is exclusive.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && (-LIMIT..LIMIT).contains(f))
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One statically declared tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub effect: Effect,
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    #[must_use]
    pub fn input_schema(&self) -> JsonObject {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in self.params {
            properties.insert(p.name.to_string(), p.schema());
            if p.required && p.default.is_none() {
                required.push(p.name);
            }
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), json!(required));
        }
        schema
    }

    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let mut tool = Tool::new(self.name, self.description, Arc::new(self.input_schema()));
        tool.annotations = Some(annotations_for_effect(self.effect));
        tool
    }

    /// Check `arguments` against the declared parameters and fill in defaults.
    ///
    /// Keys that match no declared parameter are dropped, not rejected. Explicit `null` counts
    /// as absent.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Validation`] for a missing required parameter or a value of the
    /// wrong shape.
    pub fn validate(&self, arguments: Option<&JsonObject>) -> Result<ToolArgs> {
        let mut out = Map::new();
        for p in self.params {
            let given = arguments
                .and_then(|a| a.get(p.name))
                .filter(|v| !v.is_null())
                .cloned();
            match (given, p.default) {
                (Some(v), _) => {
                    out.insert(p.name.to_string(), p.check(v)?);
                }
                (None, Some(d)) => {
                    out.insert(p.name.to_string(), d.to_value());
                }
                (None, None) if p.required => {
                    return Err(UpstreamError::validation(format!(
                        "missing required parameter '{}'",
                        p.name
                    )));
                }
                (None, None) => {}
            }
        }
        Ok(ToolArgs(out))
    }
}

/// Look up a tool by name.
#[must_use]
pub fn find_tool<'a>(tools: &'a [ToolSpec], name: &str) -> Option<&'a ToolSpec> {
    tools.iter().find(|t| t.name == name)
}

/// Validated arguments for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Required string.
    ///
    /// # Errors
    ///
    /// Validation error if the argument is absent or not a string.
    pub fn str(&self, name: &str) -> Result<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(name))
    }

    /// Optional string; blank strings count as absent.
    #[must_use]
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Required integer.
    ///
    /// # Errors
    ///
    /// Validation error if the argument is absent or not an integer.
    pub fn i64(&self, name: &str) -> Result<i64> {
        self.opt_i64(name).ok_or_else(|| missing(name))
    }

    #[must_use]
    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(as_integer)
    }

    #[must_use]
    pub fn opt_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    /// Boolean; absent means `false`.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.opt_bool(name).unwrap_or(false)
    }

    #[must_use]
    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn str_list(&self, name: &str) -> Vec<String> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn i64_list(&self, name: &str) -> Vec<i64> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(as_integer).collect())
            .unwrap_or_default()
    }
}

fn missing(name: &str) -> UpstreamError {
    UpstreamError::validation(format!("missing required parameter '{name}'"))
}

/// Render a call outcome for the transport.
///
/// Errors are returned as tool results with `is_error` set, never as protocol errors.
#[must_use]
pub fn render_outcome(outcome: Result<Value>) -> CallToolResult {
    match outcome {
        Ok(Value::String(text)) => CallToolResult::success(vec![Content::text(text)]),
        Ok(body) => {
            let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            CallToolResult::success(vec![Content::text(text)])
        }
        Err(err) => {
            let payload = err.to_payload();
            CallToolResult {
                content: vec![Content::text(payload.to_string())],
                structured_content: None,
                is_error: Some(true),
                meta: None,
            }
        }
    }
}
