//! Per-instance typed property storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{Schema, TypeTag};
use crate::value::{PropertyValue, ValueType};

/// Name → value storage owned by exactly one extension instance.
///
/// Stores are never shared, so no locking happens at this layer. When a
/// schema is attached every write is validated against it before the store
/// is touched.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    values: BTreeMap<String, PropertyValue>,
    schema: Option<Arc<Schema>>,
}

impl PropertyStore {
    /// Create an empty store with no schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store validated against `schema`.
    pub fn with_schema(schema: Arc<Schema>) -> Self {
        Self {
            values: BTreeMap::new(),
            schema: Some(schema),
        }
    }

    /// The schema this store validates against, if any.
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Store or overwrite a property.
    ///
    /// # Errors
    ///
    /// `SchemaViolation` if the value conflicts with the declared type.
    pub fn set(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        if let Some(schema) = &self.schema {
            schema.validate_property(name, &value)?;
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Read a property, requiring its stored discriminant to be `expected`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `TypeMismatch` if stored under another type.
    pub fn get(&self, name: &str, expected: ValueType) -> Result<PropertyValue> {
        let value = self.values.get(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        if value.value_type() != expected {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected,
                found: value.value_type(),
            });
        }
        Ok(value.clone())
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name, ValueType::Bool)? {
            PropertyValue::Bool(b) => Ok(b),
            other => Err(self.mismatch(name, ValueType::Bool, &other)),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.get(name, ValueType::Int)? {
            PropertyValue::Int(i) => Ok(i),
            other => Err(self.mismatch(name, ValueType::Int, &other)),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.get(name, ValueType::Float)? {
            PropertyValue::Float(f) => Ok(f),
            other => Err(self.mismatch(name, ValueType::Float, &other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.get(name, ValueType::String)? {
            PropertyValue::String(s) => Ok(s),
            other => Err(self.mismatch(name, ValueType::String, &other)),
        }
    }

    pub fn get_json(&self, name: &str) -> Result<Value> {
        match self.get(name, ValueType::Json)? {
            PropertyValue::Json(v) => Ok(v),
            other => Err(self.mismatch(name, ValueType::Json, &other)),
        }
    }

    fn mismatch(&self, name: &str, expected: ValueType, found: &PropertyValue) -> Error {
        Error::TypeMismatch {
            name: name.to_string(),
            expected,
            found: found.value_type(),
        }
    }

    /// Look a property up under whatever type it was stored as.
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Check whether a property exists.
    pub fn exists(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Remove a property, returning it if it existed.
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Names of all stored properties, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Populate several properties from a JSON object, all or nothing.
    ///
    /// Each field is converted with the schema's declared type in mind (a
    /// field declared as a float accepts `1`). Every field is validated
    /// before any is committed; on error the store is unchanged.
    ///
    /// # Errors
    ///
    /// `InvalidDocument` if `doc` is not an object, `SchemaViolation` if any
    /// field conflicts with the schema.
    pub fn load_from_document(&mut self, doc: &Value) -> Result<()> {
        let fields = doc.as_object().ok_or_else(|| Error::InvalidDocument {
            message: "property document must be a JSON object".to_string(),
        })?;

        let mut staged = Vec::with_capacity(fields.len());
        for (name, field) in fields {
            let tag = self.schema.as_ref().and_then(|s| s.property_tag(name));
            let value = convert_field(tag, field.clone());
            if let Some(schema) = &self.schema {
                schema.validate_property(name, &value)?;
            }
            staged.push((name.clone(), value));
        }

        tracing::debug!(count = staged.len(), "loading properties from document");
        self.values.extend(staged);
        Ok(())
    }

    /// Convert a JSON value the way `load_from_document` would for `name`.
    pub fn value_from_json(&self, name: &str, json: Value) -> PropertyValue {
        let tag = self.schema.as_ref().and_then(|s| s.property_tag(name));
        convert_field(tag, json)
    }

    /// Export every property as a JSON object.
    pub fn to_document(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Verify every schema-required property is present.
    pub fn check_required(&self) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        for name in schema.required_properties() {
            if !self.exists(name) {
                return Err(Error::SchemaViolation {
                    path: name.to_string(),
                    message: "required property is missing".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn convert_field(tag: Option<&TypeTag>, field: Value) -> PropertyValue {
    match (tag, field) {
        (Some(TypeTag::Float), Value::Number(n)) => match n.as_f64() {
            Some(f) => PropertyValue::Float(f),
            None => PropertyValue::Json(Value::Number(n)),
        },
        (Some(TypeTag::Object(_) | TypeTag::Array(_)), field) => PropertyValue::Json(field),
        (_, field) => PropertyValue::from_json(field),
    }
}
