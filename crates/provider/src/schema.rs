//! Tool input schema
//!
//! Tool schemas arrive as loose JSON-Schema objects. Every backend accepts a
//! flat object whose properties are scalars or arrays of scalars, so schemas
//! are parsed into that shape once and anything richer is rejected here,
//! before any request is built.

use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

/// Schema translation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("tool '{tool}': top-level schema must be an object")]
    NotObject { tool: String },

    #[error("tool '{tool}': property '{property}' is a nested object")]
    NestedObject { tool: String, property: String },

    #[error("tool '{tool}': property '{property}' is an array of objects")]
    ArrayOfObjects { tool: String, property: String },

    #[error("tool '{tool}': array property '{property}' needs a scalar item type")]
    MissingItems { tool: String, property: String },

    #[error("tool '{tool}': property '{property}' has unsupported type '{kind}'")]
    UnsupportedType {
        tool: String,
        property: String,
        kind: String,
    },

    #[error("tool '{tool}': required property '{property}' is not declared")]
    UnknownRequired { tool: String, property: String },
}

/// Property type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(SchemaType::String),
            "integer" => Some(SchemaType::Integer),
            "number" => Some(SchemaType::Number),
            "boolean" => Some(SchemaType::Boolean),
            "array" => Some(SchemaType::Array),
            "object" => Some(SchemaType::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        }
    }

    /// Does `value` carry this type?
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Number => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One top-level property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub name: String,
    pub kind: SchemaType,
    pub description: String,
    /// Element type, set only for arrays
    pub items: Option<SchemaType>,
    pub enum_values: Vec<String>,
}

/// Flat object schema shared by every backend
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    pub properties: Vec<PropertySchema>,
    pub required: Vec<String>,
}

impl ObjectSchema {
    pub fn parse(tool: &str, schema: &Value) -> Result<Self, SchemaError> {
        let not_object = || SchemaError::NotObject {
            tool: tool.to_string(),
        };
        let obj = schema.as_object().ok_or_else(not_object)?;
        if obj.get("type").and_then(Value::as_str) != Some("object") {
            return Err(not_object());
        }

        let mut properties = Vec::new();
        if let Some(props) = obj.get("properties") {
            let props = props.as_object().ok_or_else(not_object)?;
            for (name, prop) in props {
                properties.push(parse_property(tool, name, prop)?);
            }
        }

        let mut required = Vec::new();
        if let Some(list) = obj.get("required").and_then(Value::as_array) {
            for entry in list.iter().filter_map(Value::as_str) {
                if !properties.iter().any(|p| p.name == entry) {
                    return Err(SchemaError::UnknownRequired {
                        tool: tool.to_string(),
                        property: entry.to_string(),
                    });
                }
                required.push(entry.to_string());
            }
        }

        Ok(Self {
            properties,
            required,
        })
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Canonical lowercase JSON-Schema rendering
    pub fn to_json_schema(&self) -> Value {
        let mut props = Map::new();
        for prop in &self.properties {
            let mut entry = json!({ "type": prop.kind.as_str() });
            if !prop.description.is_empty() {
                entry["description"] = json!(prop.description);
            }
            if let Some(items) = prop.items {
                entry["items"] = json!({ "type": items.as_str() });
            }
            if !prop.enum_values.is_empty() {
                entry["enum"] = json!(prop.enum_values);
            }
            props.insert(prop.name.clone(), entry);
        }
        json!({
            "type": "object",
            "properties": props,
            "required": self.required,
        })
    }
}

fn parse_property(tool: &str, name: &str, prop: &Value) -> Result<PropertySchema, SchemaError> {
    let unsupported = |kind: &str| SchemaError::UnsupportedType {
        tool: tool.to_string(),
        property: name.to_string(),
        kind: kind.to_string(),
    };

    let tag = prop
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| unsupported("<missing>"))?;
    let kind = SchemaType::parse(tag).ok_or_else(|| unsupported(tag))?;

    let items = match kind {
        SchemaType::Object => {
            return Err(SchemaError::NestedObject {
                tool: tool.to_string(),
                property: name.to_string(),
            })
        }
        SchemaType::Array => {
            let missing = || SchemaError::MissingItems {
                tool: tool.to_string(),
                property: name.to_string(),
            };
            let item_tag = prop
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str)
                .ok_or_else(missing)?;
            match SchemaType::parse(item_tag) {
                Some(SchemaType::Object) => {
                    return Err(SchemaError::ArrayOfObjects {
                        tool: tool.to_string(),
                        property: name.to_string(),
                    })
                }
                Some(SchemaType::Array) | None => return Err(missing()),
                Some(scalar) => Some(scalar),
            }
        }
        _ => None,
    };

    let enum_values = prop
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(PropertySchema {
        name: name.to_string(),
        kind,
        description: prop
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        items,
        enum_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unix_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The Unix command to execute." },
                "timeout": { "type": "integer" },
                "paths": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["command"]
        })
    }

    #[test]
    fn test_parse_flat_schema() {
        let schema = ObjectSchema::parse("unix", &unix_schema()).unwrap();
        assert_eq!(schema.properties.len(), 3);
        let command = schema.property("command").unwrap();
        assert_eq!(command.kind, SchemaType::String);
        assert_eq!(command.description, "The Unix command to execute.");
        assert_eq!(schema.property("paths").unwrap().items, Some(SchemaType::String));
        assert!(schema.is_required("command"));
        assert!(!schema.is_required("timeout"));
    }

    #[test]
    fn test_parse_empty_object() {
        let schema = ObjectSchema::parse("noop", &json!({"type": "object"})).unwrap();
        assert!(schema.properties.is_empty());
        assert_eq!(
            schema.to_json_schema(),
            json!({"type": "object", "properties": {}, "required": []})
        );
    }

    #[test]
    fn test_rejects_non_object_top_level() {
        let err = ObjectSchema::parse("t", &json!({"type": "string"})).unwrap_err();
        assert_eq!(err, SchemaError::NotObject { tool: "t".into() });
        assert!(ObjectSchema::parse("t", &json!("object")).is_err());
    }

    #[test]
    fn test_rejects_nested_object() {
        let schema = json!({
            "type": "object",
            "properties": { "opts": { "type": "object", "properties": {} } }
        });
        assert!(matches!(
            ObjectSchema::parse("t", &schema),
            Err(SchemaError::NestedObject { .. })
        ));
    }

    #[test]
    fn test_rejects_array_of_objects() {
        let schema = json!({
            "type": "object",
            "properties": { "rows": { "type": "array", "items": { "type": "object" } } }
        });
        assert!(matches!(
            ObjectSchema::parse("t", &schema),
            Err(SchemaError::ArrayOfObjects { .. })
        ));
    }

    #[test]
    fn test_rejects_array_without_items() {
        let schema = json!({
            "type": "object",
            "properties": { "rows": { "type": "array" } }
        });
        assert!(matches!(
            ObjectSchema::parse("t", &schema),
            Err(SchemaError::MissingItems { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let schema = json!({
            "type": "object",
            "properties": { "when": { "type": "date" } }
        });
        let err = ObjectSchema::parse("t", &schema).unwrap_err();
        assert!(err.to_string().contains("date"));
    }

    #[test]
    fn test_rejects_undeclared_required() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "required": ["b"]
        });
        assert!(matches!(
            ObjectSchema::parse("t", &schema),
            Err(SchemaError::UnknownRequired { .. })
        ));
    }

    #[test]
    fn test_json_schema_preserves_fields() {
        let schema = ObjectSchema::parse("unix", &unix_schema()).unwrap();
        let rendered = schema.to_json_schema();
        assert_eq!(rendered["properties"]["command"]["type"], "string");
        assert_eq!(
            rendered["properties"]["command"]["description"],
            "The Unix command to execute."
        );
        assert_eq!(rendered["properties"]["paths"]["items"]["type"], "string");
        assert_eq!(rendered["required"], json!(["command"]));
    }

    #[test]
    fn test_enum_values_kept() {
        let schema = json!({
            "type": "object",
            "properties": { "mode": { "type": "string", "enum": ["fast", "slow"] } }
        });
        let parsed = ObjectSchema::parse("t", &schema).unwrap();
        assert_eq!(parsed.property("mode").unwrap().enum_values, vec!["fast", "slow"]);
        assert_eq!(parsed.to_json_schema()["properties"]["mode"]["enum"], json!(["fast", "slow"]));
    }

    #[test]
    fn test_type_matches() {
        assert!(SchemaType::Integer.matches(&json!(3)));
        assert!(!SchemaType::Integer.matches(&json!(3.5)));
        assert!(SchemaType::Number.matches(&json!(3.5)));
        assert!(SchemaType::String.matches(&json!("x")));
        assert!(!SchemaType::Boolean.matches(&json!("true")));
    }
}
