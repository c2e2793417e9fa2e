//! Typed argument schemas
//!
//! A tool declares its parameters once, at registration. The same descriptor
//! renders the JSON Schema shown to the decision-maker and validates (and
//! lightly coerces) the arguments that come back.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

/// JSON type of a single parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Accept any JSON value.
    Any,
}

/// Floats in `[-2^63, 2^63)` convert to i64 without saturating.
const I64_MIN_F64: f64 = i64::MIN as f64;
const I64_MAX_F64: f64 = 9_223_372_036_854_775_808.0;

impl ParamType {
    fn json_type(self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array => Some("array"),
            Self::Object => Some("object"),
            Self::Any => None,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    /// Coerce common near-misses: numbers and booleans sent as strings,
    /// integral floats sent for integers.
    fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (Self::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(s),
            },
            (Self::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f)
                    if !n.is_i64()
                        && !n.is_u64()
                        && f.fract() == 0.0
                        && (I64_MIN_F64..I64_MAX_F64).contains(&f) =>
                {
                    Value::from(f as i64)
                }
                _ => Value::Number(n),
            },
            (Self::Number, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) => json!(f),
                Err(_) => Value::String(s),
            },
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(s),
            },
            (_, v) => v,
        }
    }
}

/// One declared parameter.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: String::new(),
            required: false,
            default: None,
            allowed: None,
            pattern: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the argument is absent. Implies optional.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    /// Restrict string values to a regex.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    fn to_json_schema(&self) -> Value {
        let mut prop = Map::new();
        if let Some(t) = self.ty.json_type() {
            prop.insert("type".into(), json!(t));
        }
        if !self.description.is_empty() {
            prop.insert("description".into(), json!(self.description));
        }
        if let Some(allowed) = &self.allowed {
            prop.insert("enum".into(), Value::Array(allowed.clone()));
        }
        if let Some(re) = &self.pattern {
            prop.insert("pattern".into(), json!(re.as_str()));
        }
        if let Some(d) = &self.default {
            prop.insert("default".into(), d.clone());
        }
        Value::Object(prop)
    }

    fn check(&self, value: Value, problems: &mut Vec<String>) -> Value {
        let value = self.ty.coerce(value);
        if !self.ty.matches(&value) {
            problems.push(format!(
                "'{}' expected {}, got {}",
                self.name,
                self.ty.json_type().unwrap_or("any"),
                type_name(&value)
            ));
            return value;
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(&value) {
                problems.push(format!(
                    "'{}' must be one of {}",
                    self.name,
                    Value::Array(allowed.clone())
                ));
            }
        }
        if let (Some(re), Some(s)) = (&self.pattern, value.as_str()) {
            if !re.is_match(s) {
                problems.push(format!(
                    "'{}' value '{}' does not match pattern '{}'",
                    self.name,
                    s,
                    re.as_str()
                ));
            }
        }
        value
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments failed validation. Lists every problem found, not just the first.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .problems.join("; "))]
pub struct SchemaError {
    pub problems: Vec<String>,
}

/// Parameter descriptor for one tool.
#[derive(Clone, Debug, Default)]
pub struct ArgumentSchema {
    params: Vec<ParamSpec>,
    deny_unknown: bool,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.retain(|p| p.name != spec.name);
        self.params.push(spec);
        self
    }

    pub fn required(self, name: &str, ty: ParamType, description: &str) -> Self {
        self.param(ParamSpec::new(name, ty).describe(description).required())
    }

    pub fn optional(self, name: &str, ty: ParamType, description: &str) -> Self {
        self.param(ParamSpec::new(name, ty).describe(description))
    }

    /// Reject argument keys that are not declared.
    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// JSON Schema rendering sent to the decision-maker.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
        if self.deny_unknown {
            schema["additionalProperties"] = json!(false);
        }
        schema
    }

    /// Validate raw arguments from the decision-maker.
    ///
    /// A JSON string holding an object is parsed first; any other non-object
    /// value is treated as no arguments at all, so the result reports missing
    /// parameters instead of a type mismatch on the whole payload.
    pub fn validate(&self, raw: &Value) -> Result<ToolArgs, SchemaError> {
        let mut input = match raw {
            Value::Object(map) => map.clone(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => {
                    debug!("ignoring non-object arguments: {}", s);
                    Map::new()
                }
            },
            other => {
                if !other.is_null() {
                    debug!("ignoring non-object arguments: {}", other);
                }
                Map::new()
            }
        };

        let mut problems = Vec::new();
        let mut out = Map::new();

        for spec in &self.params {
            match input.remove(&spec.name) {
                Some(Value::Null) | None => {
                    if let Some(d) = &spec.default {
                        out.insert(spec.name.clone(), d.clone());
                    } else if spec.required {
                        problems.push(format!("missing required parameter '{}'", spec.name));
                    }
                }
                Some(value) => {
                    let value = spec.check(value, &mut problems);
                    out.insert(spec.name.clone(), value);
                }
            }
        }

        if self.deny_unknown {
            let mut unknown: Vec<&String> = input.keys().collect();
            unknown.sort();
            for key in unknown {
                problems.push(format!("unknown parameter '{}'", key));
            }
        } else {
            out.extend(input);
        }

        if problems.is_empty() {
            Ok(ToolArgs(out))
        } else {
            Err(SchemaError { problems })
        }
    }
}

/// Validated tool arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Deserialize into a typed argument struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ToolArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
