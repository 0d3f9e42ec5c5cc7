//! Typed parameter schemas for tool arguments.
//!
//! A [`ParamSchema`] is what the executor validates against before a handler
//! runs. It renders to JSON Schema for the model and can be derived from a
//! JSON Schema published by a remote tool server.

use serde_json::{json, Map, Value};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Enum(Vec<String>),
    Any,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Enum(values) => value
                .as_str()
                .map(|s| values.iter().any(|v| v == s))
                .unwrap_or(false),
            ParamKind::Any => true,
        }
    }

    fn describe(&self) -> String {
        match self {
            ParamKind::String => "string".to_string(),
            ParamKind::Integer => "integer".to_string(),
            ParamKind::Number => "number".to_string(),
            ParamKind::Boolean => "boolean".to_string(),
            ParamKind::Array => "array".to_string(),
            ParamKind::Object => "object".to_string(),
            ParamKind::Enum(values) => format!("one of [{}]", values.join(", ")),
            ParamKind::Any => "any".to_string(),
        }
    }

    fn to_json_schema(&self) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Number => json!({ "type": "number" }),
            ParamKind::Boolean => json!({ "type": "boolean" }),
            ParamKind::Array => json!({ "type": "array" }),
            ParamKind::Object => json!({ "type": "object" }),
            ParamKind::Enum(values) => json!({ "type": "string", "enum": values }),
            ParamKind::Any => json!({}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
}

impl ParamField {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Default applied when the field is absent. Implies optional.
    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new(fields: Vec<ParamField>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks `args` and returns the argument map with defaults filled in.
    ///
    /// `null` counts as absent. Fields the schema does not declare are passed
    /// through untouched.
    pub fn validate(&self, args: &Value) -> Result<Map<String, Value>, AppError> {
        let mut out = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(AppError::Validation(format!(
                    "arguments must be an object, got {}",
                    json_type_name(other)
                )))
            }
        };

        for field in &self.fields {
            match out.get(&field.name) {
                Some(value) if !value.is_null() => {
                    if !field.kind.matches(value) {
                        return Err(AppError::Validation(format!(
                            "field '{}' expected {}, got {}",
                            field.name,
                            field.kind.describe(),
                            json_type_name(value)
                        )));
                    }
                }
                _ => {
                    if field.required {
                        return Err(AppError::Validation(format!(
                            "missing required field '{}'",
                            field.name
                        )));
                    }
                    if let Some(default) = &field.default {
                        out.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }

        Ok(out)
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = field.kind.to_json_schema();
            if let Some(obj) = prop.as_object_mut() {
                if let Some(desc) = &field.description {
                    obj.insert("description".to_string(), Value::String(desc.clone()));
                }
                if let Some(default) = &field.default {
                    obj.insert("default".to_string(), default.clone());
                }
            }
            properties.insert(field.name.clone(), prop);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// Derives a schema from an object-typed JSON Schema.
    ///
    /// Handles the shapes pydantic-style servers emit: `anyOf` with a `null`
    /// branch, `enum`, and `$ref` into `$defs`/`definitions`. Anything else
    /// falls back to [`ParamKind::Any`].
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
            return Self::empty();
        };

        let fields = properties
            .iter()
            .map(|(name, prop)| {
                let kind = kind_from_json_schema(prop, schema);
                let mut field = if required.contains(&name.as_str()) {
                    ParamField::required(name.clone(), kind)
                } else {
                    ParamField::optional(name.clone(), kind)
                };
                if let Some(desc) = prop.get("description").and_then(|v| v.as_str()) {
                    field = field.describe(desc);
                }
                if let Some(default) = prop.get("default").filter(|v| !v.is_null()) {
                    field = field.with_default(default.clone());
                }
                field
            })
            .collect();

        Self { fields }
    }
}

fn kind_from_json_schema(prop: &Value, root: &Value) -> ParamKind {
    if let Some(reference) = prop.get("$ref").and_then(|v| v.as_str()) {
        return resolve_ref(reference, root)
            .map(|target| kind_from_json_schema(target, root))
            .unwrap_or(ParamKind::Any);
    }

    if let Some(values) = prop.get("enum").and_then(|v| v.as_array()) {
        let values: Vec<String> = values
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
        if !values.is_empty() {
            return ParamKind::Enum(values);
        }
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(branches) = prop.get(key).and_then(|v| v.as_array()) {
            let non_null = branches
                .iter()
                .find(|b| b.get("type").and_then(|t| t.as_str()) != Some("null"));
            return non_null
                .map(|b| kind_from_json_schema(b, root))
                .unwrap_or(ParamKind::Any);
        }
    }

    match prop.get("type").and_then(|v| v.as_str()) {
        Some("string") => ParamKind::String,
        Some("integer") => ParamKind::Integer,
        Some("number") => ParamKind::Number,
        Some("boolean") => ParamKind::Boolean,
        Some("array") => ParamKind::Array,
        Some("object") => ParamKind::Object,
        _ => ParamKind::Any,
    }
}

fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Option<&'a Value> {
    let name = reference.rsplit('/').next()?;
    root.get("$defs")
        .or_else(|| root.get("definitions"))
        .and_then(|defs| defs.get(name))
}

fn json_type_name(value: &Value) -> &'static str {
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
