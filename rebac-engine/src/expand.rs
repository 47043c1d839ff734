use crate::{
    context::RequestContext,
    error::{EngineError, Result},
    models::{
        EntityReference, ExpandOperator, ExpandTree, SchemaVersion, TupleFilter, VisitKind,
    },
    repository::TupleReader,
    schema::{PermissionExpression, ResolvedTarget, Schema},
    visit::{EnterOutcome, VisitKey, VisitState, VisitTracker},
};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Recursive, exhaustive evaluator producing a full decision tree.
///
/// Unlike Check, every branch of every operator is expanded to its leaves;
/// the purpose is explanation, not a boolean, so nothing short-circuits.
/// Sibling branches are evaluated concurrently and merged in declaration
/// order, so the tree is reproducible regardless of scheduling. Revisited
/// nodes materialize as back-reference markers.
pub struct ExpandEngine {
    schema: Arc<Schema>,
    reader: Arc<dyn TupleReader>,
    version: SchemaVersion,
    ctx: RequestContext,
    tracker: VisitTracker,
}

impl ExpandEngine {
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

    /// Expand `target` on `entity` down to concrete subject sets.
    pub async fn expand(
        self,
        entity: &EntityReference,
        target: &str,
        max_depth: u32,
    ) -> Result<ExpandTree> {
        self.expand_target(entity, target, max_depth).await
    }

    async fn expand_target(
        &self,
        entity: &EntityReference,
        target: &str,
        depth: u32,
    ) -> Result<ExpandTree> {
        Box::pin(async move {
            self.ctx.ensure_active()?;

            if depth == 0 {
                // Depth exhaustion cuts the branch; an empty leaf marks the spot.
                self.tracker.record(entity, target, VisitKind::DepthExhausted);
                return Ok(ExpandTree::leaf(entity.clone(), target, Vec::new(), Vec::new()));
            }

            let key = VisitKey::expansion(entity, target);
            match self.tracker.enter(&key) {
                EnterOutcome::Entered => {}
                EnterOutcome::Revisit(_) => {
                    return Ok(ExpandTree::back_reference(entity.clone(), target));
                }
            }
            self.tracker.record(entity, target, VisitKind::Evaluated);
            debug!(entity = %entity, target, depth, "expanding node");

            let entity_def = self.schema.entity(&entity.entity_type)?;
            let tree = match entity_def.resolve_target(target) {
                Some(ResolvedTarget::Permission(expression)) => {
                    self.expand_expression(entity, target, expression, depth)
                        .await?
                }
                Some(ResolvedTarget::Relation(_)) => {
                    self.expand_relation(entity, target, depth).await?
                }
                None => {
                    return Err(EngineError::validation(format!(
                        "unknown relation or permission '{}.{target}'",
                        entity.entity_type
                    )));
                }
            };

            self.tracker.complete(&key, VisitState::Expanded);
            Ok(tree)
        })
        .await
    }

    /// Expand an expression; operator nodes keep the enclosing target's name.
    async fn expand_expression(
        &self,
        entity: &EntityReference,
        target: &str,
        expression: &PermissionExpression,
        depth: u32,
    ) -> Result<ExpandTree> {
        Box::pin(async move {
            match expression {
                PermissionExpression::Relation(name) | PermissionExpression::Permission(name) => {
                    self.expand_target(entity, name, depth - 1).await
                }
                PermissionExpression::Union(children) => {
                    let children = try_join_all(
                        children
                            .iter()
                            .map(|child| self.expand_expression(entity, target, child, depth)),
                    )
                    .await?;
                    Ok(self.operator_node(entity, target, ExpandOperator::Union, children))
                }
                PermissionExpression::Intersection(children) => {
                    let children = try_join_all(
                        children
                            .iter()
                            .map(|child| self.expand_expression(entity, target, child, depth)),
                    )
                    .await?;
                    Ok(self.operator_node(entity, target, ExpandOperator::Intersection, children))
                }
                PermissionExpression::Exclusion { include, exclude } => {
                    // Children are [include, exclude] in that order.
                    let children = try_join_all(
                        [include.as_ref(), exclude.as_ref()]
                            .into_iter()
                            .map(|child| self.expand_expression(entity, target, child, depth)),
                    )
                    .await?;
                    Ok(self.operator_node(entity, target, ExpandOperator::Exclusion, children))
                }
            }
        })
        .await
    }

    fn operator_node(
        &self,
        entity: &EntityReference,
        target: &str,
        operator: ExpandOperator,
        children: Vec<ExpandTree>,
    ) -> ExpandTree {
        ExpandTree {
            entity: entity.clone(),
            target: target.to_string(),
            operator,
            subjects: Vec::new(),
            children,
        }
    }

    /// Leaf: materialize the concrete tuple-derived subject set; userset
    /// subjects are additionally expanded as children.
    async fn expand_relation(
        &self,
        entity: &EntityReference,
        relation: &str,
        depth: u32,
    ) -> Result<ExpandTree> {
        self.ctx.ensure_active()?;

        let filter = TupleFilter::entity_relation(entity, relation);
        let tuples = self.reader.query(&filter, &self.version).await?;

        let subjects = tuples.iter().map(|tuple| tuple.subject.clone()).collect();
        let usersets: Vec<_> = tuples
            .iter()
            .filter_map(|tuple| {
                tuple
                    .subject
                    .relation
                    .as_ref()
                    .map(|rel| (tuple.subject.as_entity(), rel.clone()))
            })
            .collect();
        let children = try_join_all(
            usersets
                .iter()
                .map(|(userset_entity, rel)| self.expand_target(userset_entity, rel, depth - 1)),
        )
        .await?;

        Ok(ExpandTree::leaf(entity.clone(), relation, subjects, children))
    }
}
