//! Document Type Schemas
//!
//! Every node carries a primary type which fixes its schema: the set of named
//! property schemas attached to that type, each declaring typed fields.
//! Property paths take the `schema:field` form (e.g. `dublincore:title`).
//!
//! Resolution failures are deliberately split in two families:
//!
//! - **Not-found**: the schema prefix is unknown everywhere, or the field
//!   segment cannot be resolved inside a known schema. Typed failure carrying
//!   the path, never a crash.
//! - **Configuration**: the schema exists but is not attached to the node's
//!   type. Reading a property foreign to the node's schema is rejected, not
//!   silently `None`.

use crate::models::property::PropertyValue;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Property path resolution and typing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    /// The schema prefix of the path is not registered anywhere.
    #[error("No such property {path}: no such schema '{schema}'")]
    NoSuchSchema { path: String, schema: String },

    /// The schema exists but the field segment cannot be resolved in it.
    #[error("No such property {path}: segment '{field}' cannot be resolved")]
    UnresolvedSegment { path: String, field: String },

    /// The schema exists but is not part of the document type's schemas.
    #[error("Property {path} is foreign to document type '{doc_type}'")]
    ForeignSchema { path: String, doc_type: String },

    /// The value does not match the declared field kind.
    #[error("Type mismatch for {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The path is not of the `schema:field` form.
    #[error("Malformed property path: {path}")]
    MalformedPath { path: String },
}

/// Declared kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Long,
    Double,
    Boolean,
    DateTime,
    Binary,
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Boolean => "boolean",
            FieldKind::DateTime => "datetime",
            FieldKind::Binary => "binary",
        }
    }
}

/// A single field declaration: scalar kind plus multi-valued flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub kind: FieldKind,
    pub multi: bool,
}

impl FieldDef {
    pub fn scalar(kind: FieldKind) -> Self {
        FieldDef { kind, multi: false }
    }

    pub fn multi(kind: FieldKind) -> Self {
        FieldDef { kind, multi: true }
    }

    /// Checks a value against this declaration.
    pub fn check_value(&self, path: &str, value: &PropertyValue) -> Result<(), PropertyError> {
        let expected = if self.multi {
            format!("{}[]", self.kind.name())
        } else {
            self.kind.name().to_string()
        };
        match value {
            PropertyValue::Scalar(s) => {
                if self.multi || s.kind_name() != self.kind.name() {
                    return Err(PropertyError::TypeMismatch {
                        path: path.to_string(),
                        expected,
                        actual: s.kind_name().to_string(),
                    });
                }
            }
            PropertyValue::Array(items) => {
                if !self.multi {
                    return Err(PropertyError::TypeMismatch {
                        path: path.to_string(),
                        expected,
                        actual: "array".to_string(),
                    });
                }
                for item in items {
                    if item.kind_name() != self.kind.name() {
                        return Err(PropertyError::TypeMismatch {
                            path: path.to_string(),
                            expected,
                            actual: format!("{}[]", item.kind_name()),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A named property schema: an ordered set of typed fields.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: BTreeMap<String, FieldDef>,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }
}

/// A document type: a name plus the schemas attached to it.
#[derive(Debug, Clone)]
pub struct DocumentType {
    name: String,
    schemas: Vec<String>,
}

impl DocumentType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.iter().any(|s| s == schema)
    }
}

/// Registry of schemas and document types for one repository.
///
/// Built once at repository construction and shared read-only by every
/// session. The built-in `root` type (no schemas) is always present.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
    types: HashMap<String, DocumentType>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Looks up a document type, `None` when unregistered.
    pub fn document_type(&self, name: &str) -> Option<&DocumentType> {
        self.types.get(name)
    }

    /// Whether the type name is registered.
    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Resolves a `schema:field` path against a document type.
    ///
    /// # Errors
    ///
    /// - [`PropertyError::MalformedPath`] when the path has no `:` separator
    /// - [`PropertyError::NoSuchSchema`] when the prefix is unknown everywhere
    /// - [`PropertyError::UnresolvedSegment`] when the field segment is absent
    ///   from a known schema
    /// - [`PropertyError::ForeignSchema`] when the schema is not attached to
    ///   the given document type
    pub fn resolve(&self, doc_type: &str, path: &str) -> Result<FieldDef, PropertyError> {
        let (schema_name, field_name) =
            path.split_once(':')
                .ok_or_else(|| PropertyError::MalformedPath {
                    path: path.to_string(),
                })?;
        let schema = self
            .schemas
            .get(schema_name)
            .ok_or_else(|| PropertyError::NoSuchSchema {
                path: path.to_string(),
                schema: schema_name.to_string(),
            })?;
        let def = schema
            .field(field_name)
            .ok_or_else(|| PropertyError::UnresolvedSegment {
                path: path.to_string(),
                field: field_name.to_string(),
            })?;
        let attached = self
            .types
            .get(doc_type)
            .map(|t| t.has_schema(schema_name))
            .unwrap_or(false);
        if !attached {
            return Err(PropertyError::ForeignSchema {
                path: path.to_string(),
                doc_type: doc_type.to_string(),
            });
        }
        Ok(*def)
    }
}

/// Builder for [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: HashMap<String, Schema>,
    types: HashMap<String, DocumentType>,
}

impl SchemaRegistryBuilder {
    /// Registers a schema with its fields.
    pub fn schema<I>(mut self, name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, FieldDef)>,
    {
        let schema = Schema {
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(f, d)| (f.to_string(), d))
                .collect(),
        };
        self.schemas.insert(name.to_string(), schema);
        self
    }

    /// Registers a document type with the schemas attached to it.
    pub fn document_type<I>(mut self, name: &str, schemas: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        let dt = DocumentType {
            name: name.to_string(),
            schemas: schemas.into_iter().map(str::to_string).collect(),
        };
        self.types.insert(name.to_string(), dt);
        self
    }

    pub fn build(mut self) -> SchemaRegistry {
        // The repository root always exists and carries no schemas.
        self.types
            .entry("root".to_string())
            .or_insert(DocumentType {
                name: "root".to_string(),
                schemas: Vec::new(),
            });
        SchemaRegistry {
            schemas: self.schemas,
            types: self.types,
        }
    }
}
