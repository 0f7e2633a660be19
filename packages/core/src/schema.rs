//! Interface schemas, compiled once and checked structurally.
//!
//! A raw schema document declares the property types of an interface and
//! the payload shapes of the commands it accepts (`cmd_in`) and issues
//! (`cmd_out`):
//!
//! ```json
//! {
//!   "property": {
//!     "properties": { "int_field": { "type": "int64" } },
//!     "required": ["int_field"]
//!   },
//!   "cmd_in":  [{ "name": "test" }],
//!   "cmd_out": [{ "name": "hello", "property": { "properties": {} } }]
//! }
//! ```
//!
//! The document may also be wrapped in an `"api"` object. Compiling turns it
//! into typed descriptors so that validation never re-reads the raw document.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::value::PropertyValue;

/// Expected type of one property or payload field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTag {
    Bool,
    /// Any of `int8` .. `int64`, `uint8` .. `uint64`.
    Int,
    /// `float32` or `float64`.
    Float,
    String,
    Object(ObjectShape),
    Array(Box<TypeTag>),
}

impl TypeTag {
    /// Check a JSON value against this tag.
    pub fn validate_json(&self, path: &str, value: &Value) -> Result<()> {
        let ok = match self {
            TypeTag::Bool => value.is_boolean(),
            TypeTag::Int => value.is_i64() || value.is_u64(),
            TypeTag::Float => value.is_number(),
            TypeTag::String => value.is_string(),
            TypeTag::Object(shape) => {
                return match value {
                    Value::Object(map) => shape.validate(path, map),
                    _ => Err(Error::violation(path, "expected object")),
                };
            }
            TypeTag::Array(items) => {
                return match value {
                    Value::Array(values) => {
                        for (i, item) in values.iter().enumerate() {
                            items.validate_json(&format!("{}/{}", path, i), item)?;
                        }
                        Ok(())
                    }
                    _ => Err(Error::violation(path, "expected array")),
                };
            }
        };

        if ok {
            Ok(())
        } else {
            Err(Error::violation(
                path,
                format!("expected {}, found {}", self.name(), json_kind(value)),
            ))
        }
    }

    /// Check a stored property value against this tag.
    pub fn validate_value(&self, path: &str, value: &PropertyValue) -> Result<()> {
        match (self, value) {
            (TypeTag::Bool, PropertyValue::Bool(_))
            | (TypeTag::Int, PropertyValue::Int(_))
            | (TypeTag::Float, PropertyValue::Float(_))
            | (TypeTag::String, PropertyValue::String(_)) => Ok(()),
            (TypeTag::Object(_) | TypeTag::Array(_), PropertyValue::Json(json)) => {
                self.validate_json(path, json)
            }
            (tag, other) => Err(Error::violation(
                path,
                format!("expected {}, found {}", tag.name(), other.value_type()),
            )),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Object(_) => "object",
            TypeTag::Array(_) => "array",
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declared fields of an object plus the names that must be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectShape {
    pub properties: BTreeMap<String, TypeTag>,
    pub required: Vec<String>,
}

impl ObjectShape {
    /// Validate a JSON object. Undeclared fields are allowed.
    pub fn validate(&self, path: &str, map: &Map<String, Value>) -> Result<()> {
        for name in &self.required {
            if !map.contains_key(name) {
                return Err(Error::violation(
                    join(path, name),
                    "required field is missing",
                ));
            }
        }
        for (name, value) in map {
            if let Some(tag) = self.properties.get(name) {
                tag.validate_json(&join(path, name), value)?;
            }
        }
        Ok(())
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}

/// Payload shape of one declared command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandShape {
    pub name: String,
    pub payload: ObjectShape,
}

/// A compiled interface schema.
///
/// Immutable once compiled. The runtime keeps one `Arc<Schema>` per
/// interface and every instance of that interface shares it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    properties: ObjectShape,
    cmd_in: BTreeMap<String, CommandShape>,
    cmd_out: BTreeMap<String, CommandShape>,
}

impl Schema {
    /// Compile a raw schema document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for malformed documents, unknown type tags,
    /// arrays without `items`, required names that are not declared, and
    /// duplicate command names.
    pub fn compile(raw: &Value) -> Result<Self> {
        let raw = match raw.get("api") {
            Some(api) => api,
            None => raw,
        };
        let doc: RawSchema = serde_json::from_value(raw.clone())
            .map_err(|e| Error::invalid_schema(e.to_string()))?;

        let properties = match doc.property {
            Some(obj) => compile_object("property", obj)?,
            None => ObjectShape::default(),
        };

        Ok(Self {
            properties,
            cmd_in: compile_commands("cmd_in", doc.cmd_in)?,
            cmd_out: compile_commands("cmd_out", doc.cmd_out)?,
        })
    }

    /// The declared tag of a property, if any.
    pub fn property_tag(&self, name: &str) -> Option<&TypeTag> {
        self.properties.properties.get(name)
    }

    /// Names of properties that must exist once configuration completes.
    pub fn required_properties(&self) -> impl Iterator<Item = &str> {
        self.properties.required.iter().map(String::as_str)
    }

    /// Whether the interface accepts the named command.
    pub fn accepts(&self, command: &str) -> bool {
        self.cmd_in.contains_key(command)
    }

    /// Whether the interface may issue the named command.
    pub fn issues(&self, command: &str) -> bool {
        self.cmd_out.contains_key(command)
    }

    /// Validate a property value. Undeclared properties always pass.
    pub fn validate_property(&self, name: &str, value: &PropertyValue) -> Result<()> {
        match self.property_tag(name) {
            Some(tag) => tag.validate_value(name, value),
            None => Ok(()),
        }
    }

    /// Validate an inbound command payload against `cmd_in`.
    pub fn validate_command_payload(&self, command: &str, payload: &Value) -> Result<()> {
        validate_payload("cmd_in", &self.cmd_in, command, payload)
    }

    /// Validate an outbound command payload against `cmd_out`.
    pub fn validate_outbound_payload(&self, command: &str, payload: &Value) -> Result<()> {
        validate_payload("cmd_out", &self.cmd_out, command, payload)
    }
}

fn validate_payload(
    section: &str,
    commands: &BTreeMap<String, CommandShape>,
    command: &str,
    payload: &Value,
) -> Result<()> {
    let path = format!("{}/{}", section, command);
    let shape = commands
        .get(command)
        .ok_or_else(|| Error::violation(&path, "command is not declared"))?;

    match payload {
        Value::Null => shape.payload.validate(&path, &Map::new()),
        Value::Object(map) => shape.payload.validate(&path, map),
        other => Err(Error::violation(
            path,
            format!("payload must be an object, found {}", json_kind(other)),
        )),
    }
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    property: Option<RawObject>,
    #[serde(default)]
    cmd_in: Vec<RawCommand>,
    #[serde(default)]
    cmd_out: Vec<RawCommand>,
}

#[derive(Deserialize)]
struct RawObject {
    #[serde(default)]
    properties: BTreeMap<String, RawType>,
    #[serde(default)]
    required: Vec<String>,
}

#[derive(Deserialize)]
struct RawCommand {
    name: String,
    #[serde(default)]
    property: Option<RawObject>,
}

#[derive(Deserialize)]
struct RawType {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    properties: Option<BTreeMap<String, RawType>>,
    #[serde(default)]
    required: Option<Vec<String>>,
    #[serde(default)]
    items: Option<Box<RawType>>,
}

fn compile_object(path: &str, raw: RawObject) -> Result<ObjectShape> {
    let mut properties = BTreeMap::new();
    for (name, ty) in raw.properties {
        let tag = compile_type(&join(path, &name), ty)?;
        properties.insert(name, tag);
    }
    for name in &raw.required {
        if !properties.contains_key(name) {
            return Err(Error::invalid_schema(format!(
                "{}: required field '{}' is not declared",
                path, name
            )));
        }
    }
    Ok(ObjectShape {
        properties,
        required: raw.required,
    })
}

fn compile_type(path: &str, raw: RawType) -> Result<TypeTag> {
    let tag = match raw.ty.as_str() {
        "bool" => TypeTag::Bool,
        "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16" | "uint32" | "uint64" => {
            TypeTag::Int
        }
        "float32" | "float64" => TypeTag::Float,
        "string" => TypeTag::String,
        "object" => TypeTag::Object(compile_object(
            path,
            RawObject {
                properties: raw.properties.unwrap_or_default(),
                required: raw.required.unwrap_or_default(),
            },
        )?),
        "array" => {
            let items = raw.items.ok_or_else(|| {
                Error::invalid_schema(format!("{}: array type requires 'items'", path))
            })?;
            TypeTag::Array(Box::new(compile_type(&join(path, "items"), *items)?))
        }
        other => {
            return Err(Error::invalid_schema(format!(
                "{}: unknown type tag '{}'",
                path, other
            )))
        }
    };
    Ok(tag)
}

fn compile_commands(
    section: &str,
    raw: Vec<RawCommand>,
) -> Result<BTreeMap<String, CommandShape>> {
    let mut commands = BTreeMap::new();
    for cmd in raw {
        if cmd.name.is_empty() {
            return Err(Error::invalid_schema(format!(
                "{}: command name must not be empty",
                section
            )));
        }
        let path = format!("{}/{}", section, cmd.name);
        let payload = match cmd.property {
            Some(obj) => compile_object(&path, obj)?,
            None => ObjectShape::default(),
        };
        let shape = CommandShape {
            name: cmd.name.clone(),
            payload,
        };
        if commands.insert(cmd.name, shape).is_some() {
            return Err(Error::invalid_schema(format!(
                "{}: duplicate command declaration",
                path
            )));
        }
    }
    Ok(commands)
}
