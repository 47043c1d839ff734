use crate::{
    error::{EngineError, Result},
    models::{SchemaVersion, Tuple},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable boolean AST of a permission, scoped to one entity type.
///
/// A closed tagged variant dispatched through one evaluation function per
/// engine; leaves reference relations or other permissions on the same
/// entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PermissionExpression {
    /// Leaf reference to a relation declared on the entity type.
    Relation(String),
    /// Reference to another permission declared on the entity type.
    Permission(String),
    Union(Vec<PermissionExpression>),
    Intersection(Vec<PermissionExpression>),
    Exclusion {
        include: Box<PermissionExpression>,
        exclude: Box<PermissionExpression>,
    },
}

impl PermissionExpression {
    pub fn relation(name: &str) -> Self {
        Self::Relation(name.to_string())
    }

    pub fn permission(name: &str) -> Self {
        Self::Permission(name.to_string())
    }

    pub fn union(children: Vec<PermissionExpression>) -> Self {
        Self::Union(children)
    }

    pub fn intersection(children: Vec<PermissionExpression>) -> Self {
        Self::Intersection(children)
    }

    pub fn exclusion(include: PermissionExpression, exclude: PermissionExpression) -> Self {
        Self::Exclusion {
            include: Box::new(include),
            exclude: Box::new(exclude),
        }
    }
}

/// A named edge declared on an entity type, restricting allowed subject types.
///
/// An empty `subject_types` list leaves the relation unrestricted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub subject_types: Vec<String>,
}

impl RelationDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subject_types: Vec::new(),
        }
    }

    pub fn allow(mut self, subject_type: &str) -> Self {
        self.subject_types.push(subject_type.to_string());
        self
    }

    pub fn allows_subject_type(&self, subject_type: &str) -> bool {
        self.subject_types.is_empty() || self.subject_types.iter().any(|t| t == subject_type)
    }
}

/// Compiled definition of one entity type: its relations and permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDefinition {
    pub name: String,
    pub relations: BTreeMap<String, RelationDefinition>,
    pub permissions: BTreeMap<String, PermissionExpression>,
}

impl EntityTypeDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            relations: BTreeMap::new(),
            permissions: BTreeMap::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    pub fn with_permission(mut self, name: &str, expression: PermissionExpression) -> Self {
        self.permissions.insert(name.to_string(), expression);
        self
    }

    /// Resolve a checkable target by name: permissions shadow nothing because
    /// name collisions are rejected at validation time.
    pub fn resolve_target(&self, name: &str) -> Option<ResolvedTarget<'_>> {
        if let Some(expression) = self.permissions.get(name) {
            return Some(ResolvedTarget::Permission(expression));
        }
        self.relations.get(name).map(ResolvedTarget::Relation)
    }
}

/// A relation or permission resolved on an entity type.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedTarget<'a> {
    Permission(&'a PermissionExpression),
    Relation(&'a RelationDefinition),
}

/// One immutable compiled schema snapshot: entity types, relations and
/// permission expressions. Safe for unbounded concurrent reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: BTreeMap<String, EntityTypeDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityTypeDefinition) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, entity_type: &str) -> Result<&EntityTypeDefinition> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| EngineError::validation(format!("unknown entity type: {entity_type}")))
    }

    /// Validate that the schema is well-formed: names are consistent,
    /// relation and permission names do not collide, and every expression
    /// reference resolves on its own entity type. Cycles between permission
    /// references are legal; evaluation bounds them at runtime.
    pub fn validate(&self) -> Result<()> {
        for (key, entity) in &self.entities {
            if key != &entity.name {
                return Err(EngineError::validation(format!(
                    "entity key '{key}' does not match name '{}'",
                    entity.name
                )));
            }
            for name in entity.permissions.keys() {
                if entity.relations.contains_key(name) {
                    return Err(EngineError::validation(format!(
                        "'{}.{name}' is declared as both a relation and a permission",
                        entity.name
                    )));
                }
            }
            for (name, expression) in &entity.permissions {
                Self::validate_expression(entity, name, expression)?;
            }
        }
        Ok(())
    }

    fn validate_expression(
        entity: &EntityTypeDefinition,
        permission: &str,
        expression: &PermissionExpression,
    ) -> Result<()> {
        match expression {
            PermissionExpression::Relation(name) => {
                if !entity.relations.contains_key(name) {
                    return Err(EngineError::validation(format!(
                        "'{}.{permission}' references unknown relation '{name}'",
                        entity.name
                    )));
                }
            }
            PermissionExpression::Permission(name) => {
                if !entity.permissions.contains_key(name) {
                    return Err(EngineError::validation(format!(
                        "'{}.{permission}' references unknown permission '{name}'",
                        entity.name
                    )));
                }
            }
            PermissionExpression::Union(children) | PermissionExpression::Intersection(children) => {
                if children.is_empty() {
                    return Err(EngineError::validation(format!(
                        "'{}.{permission}' has an operator with no children",
                        entity.name
                    )));
                }
                for child in children {
                    Self::validate_expression(entity, permission, child)?;
                }
            }
            PermissionExpression::Exclusion { include, exclude } => {
                Self::validate_expression(entity, permission, include)?;
                Self::validate_expression(entity, permission, exclude)?;
            }
        }
        Ok(())
    }

    /// Validate that a tuple conforms to this schema: known entity type,
    /// declared relation, allowed subject type. Userset subjects must name a
    /// declared relation on their own entity type; permissions are not
    /// grantable through tuples.
    pub fn validate_tuple(&self, tuple: &Tuple) -> Result<()> {
        let entity = self.entity(&tuple.entity.entity_type)?;
        let relation = entity.relations.get(&tuple.relation).ok_or_else(|| {
            EngineError::validation(format!(
                "unknown relation '{}' for entity type '{}'",
                tuple.relation, tuple.entity.entity_type
            ))
        })?;
        if !relation.allows_subject_type(&tuple.subject.subject_type) {
            return Err(EngineError::validation(format!(
                "relation '{}.{}' does not accept subjects of type '{}'",
                tuple.entity.entity_type, tuple.relation, tuple.subject.subject_type
            )));
        }
        if let Some(ref subject_relation) = tuple.subject.relation {
            let subject_entity = self.entity(&tuple.subject.subject_type)?;
            if !subject_entity.relations.contains_key(subject_relation) {
                return Err(EngineError::validation(format!(
                    "userset subject '{}' references '{subject_relation}', which is not a \
                     relation declared on '{}'",
                    tuple.subject, tuple.subject.subject_type
                )));
            }
        }
        Ok(())
    }
}

/// A published schema version with its snapshot metadata.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub schema: Arc<Schema>,
    pub published_at: DateTime<Utc>,
}

/// Versioned store of immutable schema snapshots.
///
/// Versions are assigned monotonically on publish and never mutated; resolution
/// is a lock-free concurrent read.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    versions: DashMap<String, SchemaSnapshot>,
    sequence: AtomicU64,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a schema, returning its assigned version.
    pub fn publish(&self, schema: Schema) -> Result<SchemaVersion> {
        schema.validate()?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let version = SchemaVersion::new(format!("v{seq:06}"));
        self.versions.insert(
            version.as_str().to_string(),
            SchemaSnapshot {
                schema: Arc::new(schema),
                published_at: Utc::now(),
            },
        );
        Ok(version)
    }

    pub fn resolve(&self, version: &SchemaVersion) -> Result<Arc<Schema>> {
        self.snapshot(version).map(|s| s.schema)
    }

    pub fn snapshot(&self, version: &SchemaVersion) -> Result<SchemaSnapshot> {
        self.versions
            .get(version.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::validation(format!("unknown schema version: {version}")))
    }

    /// The most recently assigned version, if any schema has been published.
    pub fn latest(&self) -> Option<SchemaVersion> {
        let seq = self.sequence.load(Ordering::SeqCst);
        if seq == 0 {
            return None;
        }
        Some(SchemaVersion::new(format!("v{seq:06}")))
    }
}
