use crate::{
    error::{EngineError, Result},
    models::{LookupQuery, SubjectReference, DEFAULT_MAX_DEPTH},
    schema::{PermissionExpression, ResolvedTarget, Schema},
};
use std::sync::Arc;
use tracing::debug;

/// Translates a permission expression into a declarative, store-executable
/// predicate instead of invoking Check once per entity.
///
/// The rewrite preserves the union/intersection/exclusion structure and
/// inlines permission references; the resulting [`LookupQuery`] is handed
/// back uninterpreted. Pure translation: no store access, no execution.
pub struct LookupEngine {
    schema: Arc<Schema>,
}

impl LookupEngine {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Rewrite `target` on `entity_type` for `subject` into a predicate over
    /// entity identifiers.
    pub fn lookup_query(
        &self,
        entity_type: &str,
        subject: &SubjectReference,
        target: &str,
    ) -> Result<LookupQuery> {
        debug!(entity_type, target, subject = %subject, "translating lookup query");
        let mut visiting = Vec::new();
        self.translate_target(entity_type, target, subject, DEFAULT_MAX_DEPTH, &mut visiting)
    }

    fn translate_target(
        &self,
        entity_type: &str,
        target: &str,
        subject: &SubjectReference,
        depth: u32,
        visiting: &mut Vec<String>,
    ) -> Result<LookupQuery> {
        if depth == 0 {
            return Err(EngineError::validation(format!(
                "expression for '{entity_type}.{target}' is too deep to translate"
            )));
        }
        // A cyclic reference has no finite predicate form.
        if visiting.iter().any(|name| name == target) {
            return Err(EngineError::validation(format!(
                "cyclic permission reference through '{entity_type}.{target}' cannot be \
                 translated to a lookup query"
            )));
        }

        let entity_def = self.schema.entity(entity_type)?;
        match entity_def.resolve_target(target) {
            Some(ResolvedTarget::Relation(relation)) => Ok(LookupQuery::RelationContains {
                entity_type: entity_type.to_string(),
                relation: relation.name.clone(),
                subject: subject.clone(),
            }),
            Some(ResolvedTarget::Permission(expression)) => {
                visiting.push(target.to_string());
                let query =
                    self.translate_expression(entity_type, expression, subject, depth, visiting);
                visiting.pop();
                query
            }
            None => Err(EngineError::validation(format!(
                "unknown relation or permission '{entity_type}.{target}'"
            ))),
        }
    }

    fn translate_expression(
        &self,
        entity_type: &str,
        expression: &PermissionExpression,
        subject: &SubjectReference,
        depth: u32,
        visiting: &mut Vec<String>,
    ) -> Result<LookupQuery> {
        match expression {
            PermissionExpression::Relation(name) | PermissionExpression::Permission(name) => {
                self.translate_target(entity_type, name, subject, depth - 1, visiting)
            }
            PermissionExpression::Union(children) => {
                let children = children
                    .iter()
                    .map(|child| {
                        self.translate_expression(entity_type, child, subject, depth, visiting)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(LookupQuery::Union(children))
            }
            PermissionExpression::Intersection(children) => {
                let children = children
                    .iter()
                    .map(|child| {
                        self.translate_expression(entity_type, child, subject, depth, visiting)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(LookupQuery::Intersection(children))
            }
            PermissionExpression::Exclusion { include, exclude } => {
                let include =
                    self.translate_expression(entity_type, include, subject, depth, visiting)?;
                let exclude =
                    self.translate_expression(entity_type, exclude, subject, depth, visiting)?;
                Ok(LookupQuery::Exclusion {
                    include: Box::new(include),
                    exclude: Box::new(exclude),
                })
            }
        }
    }
}
