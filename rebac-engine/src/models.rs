use serde::{Deserialize, Serialize};
use std::fmt;

/// Default recursion budget applied when a check request omits its depth.
pub const DEFAULT_MAX_DEPTH: u32 = 20;

/// Upper bound on a caller-supplied depth; anything beyond is a validation error.
pub const MAX_DEPTH_LIMIT: u32 = 100;

/// Opaque identifier selecting one immutable compiled schema snapshot.
///
/// Versions are assigned monotonically by the [`crate::schema::SchemaRegistry`]
/// and never reused or mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion(String);

impl SchemaVersion {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a concrete resource, e.g. `doc:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub entity_type: String,
    pub id: String,
}

impl EntityReference {
    pub fn new(entity_type: &str, id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Identifies a subject: either a concrete user-like entity (`user:1`) or a
/// userset (`org:acme#admin`, the set of subjects holding `admin` on `org:acme`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectReference {
    pub subject_type: String,
    pub id: String,
    pub relation: Option<String>,
}

impl SubjectReference {
    pub fn user(id: &str) -> Self {
        Self {
            subject_type: "user".to_string(),
            id: id.to_string(),
            relation: None,
        }
    }

    pub fn entity(subject_type: &str, id: &str) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            id: id.to_string(),
            relation: None,
        }
    }

    pub fn userset(subject_type: &str, id: &str, relation: &str) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            id: id.to_string(),
            relation: Some(relation.to_string()),
        }
    }

    pub fn is_userset(&self) -> bool {
        self.relation.is_some()
    }

    /// The entity a userset subject points at, e.g. `org:acme` for `org:acme#admin`.
    pub fn as_entity(&self) -> EntityReference {
        EntityReference::new(&self.subject_type, &self.id)
    }
}

impl fmt::Display for SubjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref relation) = self.relation {
            write!(f, "{}:{}#{}", self.subject_type, self.id, relation)
        } else {
            write!(f, "{}:{}", self.subject_type, self.id)
        }
    }
}

/// A stored relationship fact: `entity` has `relation` to `subject`.
///
/// Tuples are owned and persisted externally; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub entity: EntityReference,
    pub relation: String,
    pub subject: SubjectReference,
}

impl Tuple {
    pub fn new(entity: EntityReference, relation: &str, subject: SubjectReference) -> Self {
        Self {
            entity,
            relation: relation.to_string(),
            subject,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.entity, self.relation, self.subject)
    }
}

/// Tuple query filter; `None` fields act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleFilter {
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub relation: Option<String>,
    pub subject: Option<SubjectFilter>,
}

impl TupleFilter {
    /// All tuples for one relation on one concrete entity.
    pub fn entity_relation(entity: &EntityReference, relation: &str) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            entity_id: Some(entity.id.clone()),
            relation: Some(relation.to_string()),
            subject: None,
        }
    }
}

/// Subject side of a [`TupleFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFilter {
    pub subject_type: String,
    pub id: Option<String>,
    pub relation: Option<String>,
}

/// Authorization check request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub subject: SubjectReference,
    pub action: String,
    pub entity: EntityReference,
    pub schema_version: SchemaVersion,
    /// Recursion budget; resolves to [`DEFAULT_MAX_DEPTH`] when omitted.
    #[serde(default)]
    pub depth: Option<u32>,
}

/// Authorization check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub allowed: bool,
    /// Depth budget remaining at the node that established the result.
    pub remaining_depth: u32,
    /// Ordered trace of every node visited during evaluation.
    pub decisions: Vec<Visit>,
}

/// One entry in the visitation trace, e.g. `doc:1.edit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub entity: EntityReference,
    pub target: String,
    pub kind: VisitKind,
}

/// How a traced node terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitKind {
    /// The node was entered and evaluated.
    Evaluated,
    /// The depth budget ran out at this node; the branch decided `false`.
    DepthExhausted,
}

impl fmt::Display for Visit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.target)
    }
}

/// Expand request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub entity: EntityReference,
    pub action: String,
    pub schema_version: SchemaVersion,
}

/// Operator of an [`ExpandTree`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpandOperator {
    Union,
    Intersection,
    Exclusion,
    Leaf,
    /// The node was already expanded elsewhere in this call; see the tree
    /// node carrying the same `(entity, target)`.
    BackReference,
}

/// Exhaustive expansion of a relation or permission on one entity.
///
/// `subjects` is populated on `Leaf` nodes with the concrete tuple-derived
/// subject set; userset subjects additionally appear expanded in `children`.
/// For `Exclusion` the children are `[include, exclude]` in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandTree {
    pub entity: EntityReference,
    pub target: String,
    pub operator: ExpandOperator,
    pub subjects: Vec<SubjectReference>,
    pub children: Vec<ExpandTree>,
}

impl ExpandTree {
    pub fn leaf(
        entity: EntityReference,
        target: &str,
        subjects: Vec<SubjectReference>,
        children: Vec<ExpandTree>,
    ) -> Self {
        Self {
            entity,
            target: target.to_string(),
            operator: ExpandOperator::Leaf,
            subjects,
            children,
        }
    }

    pub fn back_reference(entity: EntityReference, target: &str) -> Self {
        Self {
            entity,
            target: target.to_string(),
            operator: ExpandOperator::BackReference,
            subjects: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Lookup translation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupQueryRequest {
    pub entity_type: String,
    pub subject: SubjectReference,
    pub action: String,
    pub schema_version: SchemaVersion,
}

/// Declarative, store-executable predicate over entity identifiers.
///
/// Returned uninterpreted; the external tuple store evaluates it in its own
/// query vocabulary (see `InMemoryTupleStore::entities_matching` for the
/// reference execution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LookupQuery {
    /// Entities of `entity_type` where `relation` contains `subject`, either
    /// directly or through userset membership tuples.
    RelationContains {
        entity_type: String,
        relation: String,
        subject: SubjectReference,
    },
    Union(Vec<LookupQuery>),
    Intersection(Vec<LookupQuery>),
    Exclusion {
        include: Box<LookupQuery>,
        exclude: Box<LookupQuery>,
    },
}
