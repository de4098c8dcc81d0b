pub mod entity;
pub mod error;
pub mod expr;
pub mod graph;
pub mod path;

// Re-export commonly used types
pub use entity::{
    Entity, EntityKind, EntitySnapshot, Mutation, PropertyValue, APP_STORE_ENTITY,
    APP_STORE_PROPERTY,
};
pub use error::CoreError;
pub use expr::{Span, SyntaxError};
pub use graph::{Cycle, CycleScan, CyclicDependencyError, DependencyGraph, NodeKind, SortOrder};
pub use path::{PropertyPath, Segment};
