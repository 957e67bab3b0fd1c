//! Typed parameter schemas for tools.
//!
//! A [`ParametersSchema`] is the JSON-schema-like description of a tool's
//! arguments, held as a small tagged type rather than a raw `serde_json::Value`.
//! It serializes to (and parses from) the JSON Schema objects providers expect,
//! and it performs the bind-and-validate step that turns model-supplied JSON
//! into [`ToolArguments`] before any tool body runs.
//!
//! Parameters marked as *injected* are filled by the runtime (trace ids,
//! session ids, ...). They are stripped from every model-facing rendering and
//! any value the model supplies for them is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::BindError;

/// The type of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// A string, optionally restricted to a fixed set of values.
    String { allowed: Option<Vec<String>> },
    Integer,
    Number,
    Boolean,
    /// A homogeneous array.
    Array(Box<ParamType>),
    /// A free-form JSON object.
    Object,
    /// No type constraint.
    Any,
}

impl ParamType {
    pub fn string() -> Self {
        Self::String { allowed: None }
    }

    /// A string restricted to the given values.
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::String {
            allowed: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn array(items: ParamType) -> Self {
        Self::Array(Box::new(items))
    }

    /// JSON Schema type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    fn to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        match self {
            Self::Any => {}
            Self::String { allowed } => {
                out.insert("type".into(), json!("string"));
                if let Some(values) = allowed {
                    out.insert("enum".into(), json!(values));
                }
            }
            Self::Array(items) => {
                out.insert("type".into(), json!("array"));
                out.insert("items".into(), Value::Object(items.to_json()));
            }
            other => {
                out.insert("type".into(), json!(other.type_name()));
            }
        }
        out
    }

    fn from_json(schema: &Value) -> Result<Self, SchemaError> {
        let Some(obj) = schema.as_object() else {
            return Err(SchemaError(format!("property schema must be an object, got {schema}")));
        };
        let ty = match obj.get("type") {
            None => return Ok(Self::Any),
            Some(Value::String(t)) => t.as_str(),
            Some(other) => {
                return Err(SchemaError(format!("unsupported 'type' value: {other}")));
            }
        };
        Ok(match ty {
            "string" => Self::String {
                allowed: obj.get("enum").and_then(Value::as_array).map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                }),
            },
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array(Box::new(match obj.get("items") {
                Some(items) => Self::from_json(items)?,
                None => Self::Any,
            })),
            other => return Err(SchemaError(format!("unsupported parameter type '{other}'"))),
        })
    }

    /// Validate (and lightly coerce) a value against this type.
    ///
    /// Models frequently quote numbers and booleans, so `"5"` binds to an
    /// integer and `"true"` to a boolean. Nothing else is coerced.
    fn check(&self, field: &str, value: Value) -> Result<Value, BindError> {
        let mismatch = |value: &Value| BindError::TypeMismatch {
            field: field.to_string(),
            expected: self.describe(),
            found: json_type_name(value),
        };

        match self {
            Self::Any => Ok(value),
            Self::String { allowed } => match &value {
                Value::String(s) => match allowed {
                    Some(values) if !values.iter().any(|v| v == s) => Err(mismatch(&value)),
                    _ => Ok(value),
                },
                _ => Err(mismatch(&value)),
            },
            Self::Integer => match &value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(json!(f as i64)),
                    _ => Err(mismatch(&value)),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|n| json!(n))
                    .map_err(|_| mismatch(&value)),
                _ => Err(mismatch(&value)),
            },
            Self::Number => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| mismatch(&value)),
                _ => Err(mismatch(&value)),
            },
            Self::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            Self::Object => match value {
                Value::Object(_) => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Self::Array(items) => match value {
                Value::Array(values) => values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| items.check(&format!("{field}[{i}]"), v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(mismatch(&other)),
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::String { allowed: Some(values) } => format!("one of [{}]", values.join(", ")),
            Self::Array(items) => format!("array of {}", items.describe()),
            other => other.type_name().to_string(),
        }
    }
}

/// One named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub ty: ParamType,
    pub description: Option<String>,
    pub required: bool,
    /// Filled by the runtime; never shown to the model.
    pub injected: bool,
}

/// The parameter block of a tool: an object schema with typed properties.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ParametersSchema {
    params: BTreeMap<String, ParamSpec>,
    /// Reject fields the schema does not name.
    strict: bool,
}

/// A JSON schema that could not be mapped onto [`ParametersSchema`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported parameter schema: {0}")]
pub struct SchemaError(String);

impl ParametersSchema {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_param(
        mut self,
        name: impl Into<String>,
        ty: ParamType,
        description: Option<String>,
        required: bool,
        injected: bool,
    ) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                ty,
                description,
                required,
                injected,
            },
        );
        self
    }

    /// Add a required parameter.
    pub fn required(self, name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        self.with_param(name, ty, Some(description.into()), true, false)
    }

    /// Add an optional parameter.
    pub fn optional(self, name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        self.with_param(name, ty, Some(description.into()), false, false)
    }

    /// Add a parameter the runtime fills in.
    pub fn injected(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.with_param(name, ty, None, true, true)
    }

    /// Reject arguments the schema does not declare.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamSpec)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Names of the parameters filled by the runtime.
    pub fn injected_names(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|(_, spec)| spec.injected)
            .map(|(name, _)| name.as_str())
    }

    /// The schema as the model should see it: injected parameters removed.
    pub fn model_facing(&self) -> Self {
        Self {
            params: self
                .params
                .iter()
                .filter(|(_, spec)| !spec.injected)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            strict: self.strict,
        }
    }

    /// Render as a JSON Schema object (model-facing parameters only).
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, spec) in self.params.iter().filter(|(_, s)| !s.injected) {
            let mut prop = spec.ty.to_json();
            if let Some(desc) = &spec.description {
                prop.insert("description".into(), json!(desc));
            }
            properties.insert(name.clone(), Value::Object(prop));
            if spec.required {
                required.push(json!(name));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), Value::Array(required));
        }
        if self.strict {
            schema.insert("additionalProperties".into(), json!(false));
        }
        Value::Object(schema)
    }

    /// Parse a JSON Schema object of the form produced by [`to_json_schema`](Self::to_json_schema).
    pub fn from_json_schema(schema: &Value) -> Result<Self, SchemaError> {
        let Some(obj) = schema.as_object() else {
            return Err(SchemaError(format!("expected an object schema, got {schema}")));
        };
        if let Some(ty) = obj.get("type") {
            if ty != "object" {
                return Err(SchemaError(format!("top-level type must be 'object', got {ty}")));
            }
        }

        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut out = Self::new();
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let ty = ParamType::from_json(prop)?;
                let description = prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                out = out.with_param(name.clone(), ty, description, required.contains(&name.as_str()), false);
            }
        }
        out.strict = obj.get("additionalProperties") == Some(&Value::Bool(false));
        Ok(out)
    }

    /// Bind model-supplied arguments against this schema.
    ///
    /// `injected` supplies values for injected parameters; the model's own
    /// values for those names are discarded, and an injected value the
    /// runtime does not have (no session, say) is simply left out. `null`
    /// arguments are treated as an empty object, and `null` fields as absent.
    pub fn bind(&self, arguments: Value, injected: &Map<String, Value>) -> Result<ToolArguments, BindError> {
        let mut supplied = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(BindError::NotAnObject(json_type_name(&other))),
        };

        let mut bound = Map::new();
        for (name, spec) in &self.params {
            let value = if spec.injected {
                supplied.remove(name);
                injected.get(name).cloned()
            } else {
                supplied.remove(name).filter(|v| !v.is_null())
            };

            match value {
                Some(v) => {
                    bound.insert(name.clone(), spec.ty.check(name, v)?);
                }
                None if spec.required && !spec.injected => return Err(BindError::MissingField(name.clone())),
                None => {}
            }
        }

        if let Some(unknown) = supplied.keys().next() {
            if self.strict {
                return Err(BindError::UnknownField(unknown.clone()));
            }
        }
        bound.extend(supplied);

        Ok(ToolArguments(bound))
    }

    /// Human-readable parameter list for text-only backends.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (name, spec) in self.params.iter().filter(|(_, s)| !s.injected) {
            let req = if spec.required { "required" } else { "optional" };
            out.push_str(&format!("- {name} ({}, {req})", spec.ty.describe()));
            if let Some(desc) = &spec.description {
                out.push_str(": ");
                out.push_str(desc);
            }
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("(no parameters)\n");
        }
        out
    }
}

impl From<ParametersSchema> for Value {
    fn from(schema: ParametersSchema) -> Self {
        schema.to_json_schema()
    }
}

impl TryFrom<Value> for ParametersSchema {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json_schema(&value)
    }
}

/// Arguments that passed validation, ready for a tool body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// The schema contract for one tool: `{name, description, parameters}`.
///
/// This is what gets sent to the model, either as a structured
/// function-calling spec or rendered into the system instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// Parameters, serialized as a JSON Schema object
    pub parameters: ParametersSchema,
}

impl ToolDefinition {
    /// `{"type": "function", "function": {name, description, parameters}}`
    pub fn to_function_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters.to_json_schema(),
            }
        })
    }

    /// Parse a structured function-calling spec back into a definition.
    ///
    /// Accepts both the wrapped `{"type":"function","function":{..}}` form and
    /// a bare `{name, description, parameters}` object.
    pub fn from_function_spec(spec: &Value) -> Result<Self, SchemaError> {
        let function = spec.get("function").unwrap_or(spec);
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError("function spec has no name".into()))?;
        let description = function
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parameters = match function.get("parameters") {
            Some(p) => ParametersSchema::from_json_schema(p)?,
            None => ParametersSchema::new(),
        };
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        })
    }

    /// Markdown-ish block describing the tool for text-only backends.
    pub fn render_text(&self) -> String {
        format!(
            "### {}\n{}\nParameters:\n{}",
            self.name,
            self.description,
            self.parameters.render_text()
        )
    }
}

/// JSON type name of a value, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
