use crate::{
    context::RequestContext,
    error::Result,
    models::{
        CheckResult, EntityReference, SchemaVersion, SubjectReference, TupleFilter, VisitKind,
    },
    repository::TupleReader,
    schema::{PermissionExpression, ResolvedTarget, Schema},
    visit::{EnterOutcome, VisitKey, VisitState, VisitTracker},
};
use std::sync::Arc;
use tracing::debug;

/// Outcome of one evaluation node: the boolean plus the depth budget at the
/// step that established it.
#[derive(Debug, Clone, Copy)]
struct Decision {
    allowed: bool,
    remaining_depth: u32,
}

/// Recursive, depth-bounded boolean evaluator.
///
/// Walks the target's permission expression depth-first with deterministic
/// left-to-right short-circuiting, consults the tuple reader at relation
/// leaves, and recurses into userset subjects. One instance serves exactly one
/// call: the visited-set and trace are call-scoped.
pub struct CheckEngine {
    schema: Arc<Schema>,
    reader: Arc<dyn TupleReader>,
    version: SchemaVersion,
    ctx: RequestContext,
    tracker: VisitTracker,
}

impl CheckEngine {
    pub fn new(
        schema: Arc<Schema>,
        reader: Arc<dyn TupleReader>,
        version: SchemaVersion,
        ctx: RequestContext,
    ) -> Self {
        Self {
            schema,
            reader,
            version,
            ctx,
            tracker: VisitTracker::new(),
        }
    }

    /// Decide whether `subject` holds `target` on `entity` within `max_depth`.
    pub async fn check(
        self,
        subject: &SubjectReference,
        target: &str,
        entity: &EntityReference,
        max_depth: u32,
    ) -> Result<CheckResult> {
        let decision = self.check_target(entity, target, subject, max_depth).await?;
        Ok(CheckResult {
            allowed: decision.allowed,
            remaining_depth: decision.remaining_depth,
            decisions: self.tracker.into_trace(),
        })
    }

    /// Evaluate one named node (relation or permission) on an entity.
    ///
    /// Entering a node consumes nothing; recursing into another named node
    /// costs one depth unit. A zero budget terminates the branch as a normal
    /// `false` outcome with a depth-exhausted trace node.
    async fn check_target(
        &self,
        entity: &EntityReference,
        target: &str,
        subject: &SubjectReference,
        depth: u32,
    ) -> Result<Decision> {
        Box::pin(async move {
            self.ctx.ensure_active()?;

            if depth == 0 {
                self.tracker.record(entity, target, VisitKind::DepthExhausted);
                return Ok(Decision {
                    allowed: false,
                    remaining_depth: 0,
                });
            }

            let key = VisitKey::new(entity, target, subject);
            match self.tracker.enter(&key) {
                EnterOutcome::Entered => {}
                EnterOutcome::Revisit(VisitState::Decided(allowed)) => {
                    // Memoized sub-result; reuse instead of recursing again.
                    return Ok(Decision {
                        allowed,
                        remaining_depth: depth,
                    });
                }
                EnterOutcome::Revisit(_) => {
                    // Cycle: the node is still being evaluated above us.
                    return Ok(Decision {
                        allowed: false,
                        remaining_depth: depth,
                    });
                }
            }
            self.tracker.record(entity, target, VisitKind::Evaluated);
            debug!(entity = %entity, target, subject = %subject, depth, "checking node");

            let entity_def = self.schema.entity(&entity.entity_type)?;
            let decision = match entity_def.resolve_target(target) {
                Some(ResolvedTarget::Permission(expression)) => {
                    self.check_expression(entity, expression, subject, depth)
                        .await?
                }
                Some(ResolvedTarget::Relation(_)) => {
                    self.check_relation(entity, target, subject, depth).await?
                }
                None => {
                    return Err(crate::error::EngineError::validation(format!(
                        "unknown relation or permission '{}.{target}'",
                        entity.entity_type
                    )));
                }
            };

            self.tracker
                .complete(&key, VisitState::Decided(decision.allowed));
            Ok(decision)
        })
        .await
    }

    /// Walk an expression at a fixed depth; only leaf references descend.
    async fn check_expression(
        &self,
        entity: &EntityReference,
        expression: &PermissionExpression,
        subject: &SubjectReference,
        depth: u32,
    ) -> Result<Decision> {
        Box::pin(async move {
            match expression {
                PermissionExpression::Relation(name) | PermissionExpression::Permission(name) => {
                    self.check_target(entity, name, subject, depth - 1).await
                }
                PermissionExpression::Union(children) => {
                    let mut last = Decision {
                        allowed: false,
                        remaining_depth: depth,
                    };
                    for child in children {
                        last = self.check_expression(entity, child, subject, depth).await?;
                        if last.allowed {
                            break;
                        }
                    }
                    Ok(last)
                }
                PermissionExpression::Intersection(children) => {
                    let mut last = Decision {
                        allowed: true,
                        remaining_depth: depth,
                    };
                    for child in children {
                        last = self.check_expression(entity, child, subject, depth).await?;
                        if !last.allowed {
                            break;
                        }
                    }
                    Ok(last)
                }
                PermissionExpression::Exclusion { include, exclude } => {
                    let include = self.check_expression(entity, include, subject, depth).await?;
                    if !include.allowed {
                        return Ok(include);
                    }
                    let exclude = self.check_expression(entity, exclude, subject, depth).await?;
                    Ok(Decision {
                        allowed: !exclude.allowed,
                        remaining_depth: exclude.remaining_depth,
                    })
                }
            }
        })
        .await
    }

    /// Leaf: query tuples for (entity, relation, *); a direct subject match
    /// decides true, userset subjects trigger nested checks with depth - 1.
    async fn check_relation(
        &self,
        entity: &EntityReference,
        relation: &str,
        subject: &SubjectReference,
        depth: u32,
    ) -> Result<Decision> {
        self.ctx.ensure_active()?;

        let filter = TupleFilter::entity_relation(entity, relation);
        let tuples = self.reader.query(&filter, &self.version).await?;

        if tuples.iter().any(|tuple| &tuple.subject == subject) {
            return Ok(Decision {
                allowed: true,
                remaining_depth: depth,
            });
        }

        for tuple in &tuples {
            if let Some(ref userset_relation) = tuple.subject.relation {
                let userset_entity = tuple.subject.as_entity();
                let nested = self
                    .check_target(&userset_entity, userset_relation, subject, depth - 1)
                    .await?;
                if nested.allowed {
                    return Ok(nested);
                }
            }
        }

        Ok(Decision {
            allowed: false,
            remaining_depth: depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tuple;
    use crate::repository::InMemoryTupleStore;
    use crate::schema::{EntityTypeDefinition, RelationDefinition};

    fn doc_entity() -> EntityTypeDefinition {
        EntityTypeDefinition::new("doc")
            .with_relation(RelationDefinition::new("owner").allow("user"))
            .with_relation(RelationDefinition::new("viewer"))
            .with_relation(RelationDefinition::new("banned"))
            .with_permission("edit", PermissionExpression::relation("owner"))
            .with_permission(
                "view",
                PermissionExpression::union(vec![
                    PermissionExpression::relation("viewer"),
                    PermissionExpression::permission("edit"),
                ]),
            )
            .with_permission(
                "review",
                PermissionExpression::intersection(vec![
                    PermissionExpression::relation("viewer"),
                    PermissionExpression::relation("owner"),
                ]),
            )
            .with_permission(
                "comment",
                PermissionExpression::exclusion(
                    PermissionExpression::relation("viewer"),
                    PermissionExpression::relation("banned"),
                ),
            )
    }

    fn org_entity() -> EntityTypeDefinition {
        EntityTypeDefinition::new("org")
            .with_relation(RelationDefinition::new("admin").allow("user"))
    }

    fn schema() -> Arc<Schema> {
        let schema = Schema::new()
            .with_entity(doc_entity())
            .with_entity(org_entity());
        schema.validate().unwrap();
        Arc::new(schema)
    }

    fn engine(store: Arc<InMemoryTupleStore>) -> CheckEngine {
        CheckEngine::new(
            schema(),
            store,
            SchemaVersion::new("v000001"),
            RequestContext::new(),
        )
    }

    fn doc1() -> EntityReference {
        EntityReference::new("doc", "1")
    }

    #[tokio::test]
    async fn test_direct_relation() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(doc1(), "owner", SubjectReference::user("1")));

        let result = engine(store.clone())
            .check(&SubjectReference::user("1"), "owner", &doc1(), 20)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_depth, 20);

        let result = engine(store)
            .check(&SubjectReference::user("2"), "owner", &doc1(), 20)
            .await
            .unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn test_permission_over_relation() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(doc1(), "owner", SubjectReference::user("1")));

        let result = engine(store)
            .check(&SubjectReference::user("1"), "edit", &doc1(), 20)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_depth, 19);
        let trace: Vec<String> = result.decisions.iter().map(ToString::to_string).collect();
        assert_eq!(trace, vec!["doc:1.edit", "doc:1.owner"]);
    }

    #[tokio::test]
    async fn test_union_short_circuits_left_to_right() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(doc1(), "viewer", SubjectReference::user("1")));

        let result = engine(store)
            .check(&SubjectReference::user("1"), "view", &doc1(), 20)
            .await
            .unwrap();
        assert!(result.allowed);
        // First union branch decided; `edit`/`owner` were never visited.
        let trace: Vec<String> = result.decisions.iter().map(ToString::to_string).collect();
        assert_eq!(trace, vec!["doc:1.view", "doc:1.viewer"]);
    }

    #[tokio::test]
    async fn test_intersection_requires_both() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(doc1(), "viewer", SubjectReference::user("1")));

        let result = engine(store.clone())
            .check(&SubjectReference::user("1"), "review", &doc1(), 20)
            .await
            .unwrap();
        assert!(!result.allowed);

        store.write_tuple(Tuple::new(doc1(), "owner", SubjectReference::user("1")));
        let result = engine(store)
            .check(&SubjectReference::user("1"), "review", &doc1(), 20)
            .await
            .unwrap();
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_exclusion() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(doc1(), "viewer", SubjectReference::user("1")));
        store.write_tuple(Tuple::new(doc1(), "viewer", SubjectReference::user("2")));
        store.write_tuple(Tuple::new(doc1(), "banned", SubjectReference::user("2")));

        let allowed = engine(store.clone())
            .check(&SubjectReference::user("1"), "comment", &doc1(), 20)
            .await
            .unwrap();
        assert!(allowed.allowed);

        let banned = engine(store.clone())
            .check(&SubjectReference::user("2"), "comment", &doc1(), 20)
            .await
            .unwrap();
        assert!(!banned.allowed);

        // Include branch false: exclude branch is never evaluated.
        let outsider = engine(store)
            .check(&SubjectReference::user("3"), "comment", &doc1(), 20)
            .await
            .unwrap();
        assert!(!outsider.allowed);
        let trace: Vec<String> = outsider.decisions.iter().map(ToString::to_string).collect();
        assert_eq!(trace, vec!["doc:1.comment", "doc:1.viewer"]);
    }

    #[tokio::test]
    async fn test_userset_recursion() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(
            doc1(),
            "owner",
            SubjectReference::userset("org", "acme", "admin"),
        ));
        store.write_tuple(Tuple::new(
            EntityReference::new("org", "acme"),
            "admin",
            SubjectReference::user("1"),
        ));

        let result = engine(store.clone())
            .check(&SubjectReference::user("1"), "edit", &doc1(), 20)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_depth, 18);

        let result = engine(store)
            .check(&SubjectReference::user("2"), "edit", &doc1(), 20)
            .await
            .unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn test_depth_exhaustion_is_not_an_error() {
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(doc1(), "owner", SubjectReference::user("1")));

        let result = engine(store)
            .check(&SubjectReference::user("1"), "edit", &doc1(), 0)
            .await
            .unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining_depth, 0);
        assert_eq!(
            result.decisions.first().map(|v| v.kind),
            Some(VisitKind::DepthExhausted)
        );
    }

    #[tokio::test]
    async fn test_cyclic_usersets_terminate() {
        // a's owner set points at b's owners and vice versa.
        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(
            EntityReference::new("doc", "a"),
            "owner",
            SubjectReference::userset("doc", "b", "owner"),
        ));
        store.write_tuple(Tuple::new(
            EntityReference::new("doc", "b"),
            "owner",
            SubjectReference::userset("doc", "a", "owner"),
        ));

        let result = engine(store)
            .check(
                &SubjectReference::user("1"),
                "edit",
                &EntityReference::new("doc", "a"),
                20,
            )
            .await
            .unwrap();
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn test_unknown_target_is_validation() {
        let store = Arc::new(InMemoryTupleStore::new());
        let err = engine(store)
            .check(&SubjectReference::user("1"), "publish", &doc1(), 20)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_cancellation_observed() {
        let store = Arc::new(InMemoryTupleStore::new());
        let ctx = RequestContext::new();
        ctx.cancel();
        let engine = CheckEngine::new(
            schema(),
            store,
            SchemaVersion::new("v000001"),
            ctx,
        );

        let err = engine
            .check(&SubjectReference::user("1"), "edit", &doc1(), 20)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }
}
