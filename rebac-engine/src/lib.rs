//! Schema-driven ReBAC authorization engine
//!
//! This crate implements a relationship-based access control (ReBAC) decision
//! engine: given a versioned schema of entity types and permission rules, and
//! a store of relationship facts, it can
//! - decide whether a subject may perform an action on an entity (Check),
//! - exhaustively expand the relationship chain behind a decision (Expand),
//! - translate a permission query into a store-executable filter (Lookup).
//!
//! # Core Concepts
//!
//! - **Entity**: any resource that can be protected (e.g., a document)
//! - **Subject**: a user, or a userset such as "admins of org:acme"
//! - **Relation**: a named edge between an entity and its subjects
//! - **Permission**: a boolean expression over relations and other permissions
//! - **Tuple**: a stored fact: "entity has relation to subject"
//!
//! Evaluation is depth-bounded (default 20), cycle-safe via a call-scoped
//! visited-set, deterministic for a fixed schema version and tuple snapshot,
//! and cancellable through an explicit per-call context.
//!
//! # Example
//!
//! ```rust
//! use rebac_engine::{
//!     CheckRequest, Development, EntityReference, EntityTypeDefinition, PermissionExpression,
//!     RelationDefinition, Schema, SubjectReference, Tuple,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dev = Development::new();
//!
//!     // Define and publish a schema: `edit` on a doc is granted to owners.
//!     let schema = Schema::new().with_entity(
//!         EntityTypeDefinition::new("doc")
//!             .with_relation(RelationDefinition::new("owner").allow("user"))
//!             .with_permission("edit", PermissionExpression::relation("owner")),
//!     );
//!     let version = dev.write_schema(schema)?;
//!
//!     // Record a relationship fact.
//!     dev.write_tuple(
//!         Tuple::new(
//!             EntityReference::new("doc", "1"),
//!             "owner",
//!             SubjectReference::user("1"),
//!         ),
//!         &version,
//!     )?;
//!
//!     // Check permission.
//!     let result = dev
//!         .check(CheckRequest {
//!             subject: SubjectReference::user("1"),
//!             action: "edit".to_string(),
//!             entity: EntityReference::new("doc", "1"),
//!             schema_version: version,
//!             depth: None,
//!         })
//!         .await?;
//!     assert!(result.allowed);
//!     Ok(())
//! }
//! ```

pub mod check;
pub mod context;
pub mod development;
pub mod engine;
pub mod error;
pub mod expand;
pub mod lookup;
pub mod models;
pub mod repository;
pub mod schema;
pub mod visit;

pub use context::RequestContext;
pub use development::Development;
pub use engine::AuthorizationEngine;
pub use error::{EngineError, ErrorKind, Result, StoreErrorKind};
pub use models::*;
pub use repository::{InMemoryTupleStore, TupleReader};
pub use schema::{
    EntityTypeDefinition, PermissionExpression, RelationDefinition, Schema, SchemaRegistry,
    SchemaSnapshot,
};
