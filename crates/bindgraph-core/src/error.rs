//! Core error types for bindgraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the entity model and the dependency graph.

use thiserror::Error;

use crate::path::PropertyPath;

/// Core errors produced by the bindgraph-core crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A path string could not be parsed into canonical form.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// An entity name is not a valid identifier.
    #[error("invalid entity name: '{name}'")]
    InvalidEntityName { name: String },

    /// An entity name collides with a reserved global helper name.
    #[error("entity name '{name}' is reserved")]
    ReservedName { name: String },

    /// An entity with this name already exists in the snapshot.
    #[error("entity already exists: '{name}'")]
    EntityExists { name: String },

    /// The named entity does not exist in the snapshot.
    #[error("entity not found: '{name}'")]
    EntityNotFound { name: String },

    /// The path does not exist on its entity.
    #[error("property not found: {path}")]
    PropertyNotFound { path: PropertyPath },

    /// A path names only an entity where a property was required.
    #[error("path {path} does not name a property")]
    NotAProperty { path: PropertyPath },

    /// A graph invariant was violated.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
