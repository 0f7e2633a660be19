//! Core types for the extension host: typed property values, the
//! per-instance property store, and compiled interface schemas.
//!
//! - `PropertyValue`: a tagged union with a fixed discriminant
//! - `PropertyStore`: name → value storage owned by exactly one instance
//! - `Schema`: an interface contract compiled once and shared by reference
//!
//! # Example
//!
//! ```rust
//! use exthost_core::{PropertyStore, PropertyValue, ValueType};
//!
//! let mut store = PropertyStore::new();
//! store.set("int_field", PropertyValue::Int(1)).unwrap();
//! assert_eq!(store.get_int("int_field").unwrap(), 1);
//! assert!(store.get("int_field", ValueType::String).is_err());
//! ```

mod error;
pub mod schema;
mod store;
mod value;

pub use error::{Error, Result};
pub use schema::{CommandShape, ObjectShape, Schema, TypeTag};
pub use store::PropertyStore;
pub use value::{PropertyValue, ValueType};
