//! Data Model
//!
//! Core data structures shared by the session layer and the store adapters:
//!
//! - [`Node`] - the hierarchy record (identity, position, properties, ACL,
//!   lock, version/proxy fragments, soft-delete marker)
//! - [`PropertyValue`] / [`ScalarValue`] / [`BinaryRef`] - typed property
//!   payloads
//! - [`SchemaRegistry`] - document types and their property schemas

pub mod node;
pub mod property;
pub mod schema;

pub use node::{
    AclEntry, LockInfo, Node, NodeId, ProxyInfo, ValidationError, VersionInfo,
    VERSION_WRITABLE_PROPS,
};
pub use property::{BinaryRef, PropertyValue, ScalarValue};
pub use schema::{
    DocumentType, FieldDef, FieldKind, PropertyError, Schema, SchemaRegistry,
    SchemaRegistryBuilder,
};
