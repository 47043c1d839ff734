use crate::{
    check::CheckEngine,
    context::RequestContext,
    error::{EngineError, Result},
    expand::ExpandEngine,
    lookup::LookupEngine,
    models::{
        CheckRequest, CheckResult, ExpandRequest, ExpandTree, LookupQuery, LookupQueryRequest,
        DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT,
    },
    repository::TupleReader,
    schema::SchemaRegistry,
};
use std::sync::Arc;
use tracing::debug;

/// Entry point for the transport layer: resolves the schema snapshot for the
/// requested version, runs the per-call evaluator, and wraps failures once
/// with call context.
///
/// The facade holds no mutable state; arbitrarily many calls may run
/// concurrently over the shared registry and tuple reader.
pub struct AuthorizationEngine {
    registry: Arc<SchemaRegistry>,
    reader: Arc<dyn TupleReader>,
}

impl AuthorizationEngine {
    pub fn new(registry: Arc<SchemaRegistry>, reader: Arc<dyn TupleReader>) -> Self {
        Self { registry, reader }
    }

    /// Decide whether `subject` may perform `action` on `entity`.
    ///
    /// An omitted depth resolves to 20; depths beyond 100 are rejected as
    /// validation errors.
    pub async fn check(&self, ctx: &RequestContext, request: CheckRequest) -> Result<CheckResult> {
        let depth = request.depth.unwrap_or(DEFAULT_MAX_DEPTH);
        if depth > MAX_DEPTH_LIMIT {
            return Err(EngineError::validation(format!(
                "depth {depth} exceeds the maximum of {MAX_DEPTH_LIMIT}"
            )));
        }
        ctx.ensure_active()?;
        debug!(
            subject = %request.subject,
            action = %request.action,
            entity = %request.entity,
            version = %request.schema_version,
            depth,
            "check"
        );

        let call = format!(
            "check {} {} on {}",
            request.subject, request.action, request.entity
        );
        let schema = self
            .registry
            .resolve(&request.schema_version)
            .map_err(|err| err.with_call_context(&call))?;
        CheckEngine::new(
            schema,
            self.reader.clone(),
            request.schema_version.clone(),
            ctx.clone(),
        )
        .check(&request.subject, &request.action, &request.entity, depth)
        .await
        .map_err(|err| err.with_call_context(&call))
    }

    /// Exhaustively expand the relationship chain behind `action` on `entity`.
    pub async fn expand(&self, ctx: &RequestContext, request: ExpandRequest) -> Result<ExpandTree> {
        ctx.ensure_active()?;
        debug!(
            action = %request.action,
            entity = %request.entity,
            version = %request.schema_version,
            "expand"
        );

        let call = format!("expand {} on {}", request.action, request.entity);
        let schema = self
            .registry
            .resolve(&request.schema_version)
            .map_err(|err| err.with_call_context(&call))?;
        ExpandEngine::new(
            schema,
            self.reader.clone(),
            request.schema_version.clone(),
            ctx.clone(),
        )
        .expand(&request.entity, &request.action, DEFAULT_MAX_DEPTH)
        .await
        .map_err(|err| err.with_call_context(&call))
    }

    /// Translate `action` for `subject` into a store-executable predicate over
    /// entities of `entity_type`. The predicate is returned uninterpreted.
    pub fn lookup_query(
        &self,
        ctx: &RequestContext,
        request: &LookupQueryRequest,
    ) -> Result<LookupQuery> {
        ctx.ensure_active()?;
        debug!(
            entity_type = %request.entity_type,
            subject = %request.subject,
            action = %request.action,
            version = %request.schema_version,
            "lookup query"
        );

        let call = format!(
            "lookup {} {} over {}",
            request.subject, request.action, request.entity_type
        );
        let schema = self
            .registry
            .resolve(&request.schema_version)
            .map_err(|err| err.with_call_context(&call))?;
        LookupEngine::new(schema)
            .lookup_query(&request.entity_type, &request.subject, &request.action)
            .map_err(|err| err.with_call_context(&call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityReference, SchemaVersion, SubjectReference, Tuple};
    use crate::repository::InMemoryTupleStore;
    use crate::schema::{
        EntityTypeDefinition, PermissionExpression, RelationDefinition, Schema,
    };

    fn setup() -> (AuthorizationEngine, Arc<InMemoryTupleStore>, SchemaVersion) {
        let registry = Arc::new(SchemaRegistry::new());
        let version = registry
            .publish(Schema::new().with_entity(
                EntityTypeDefinition::new("doc")
                    .with_relation(RelationDefinition::new("owner").allow("user"))
                    .with_permission("edit", PermissionExpression::relation("owner")),
            ))
            .unwrap();

        let store = Arc::new(InMemoryTupleStore::new());
        store.write_tuple(Tuple::new(
            EntityReference::new("doc", "1"),
            "owner",
            SubjectReference::user("1"),
        ));

        let engine = AuthorizationEngine::new(registry, store.clone());
        (engine, store, version)
    }

    fn check_request(user: &str, version: &SchemaVersion, depth: Option<u32>) -> CheckRequest {
        CheckRequest {
            subject: SubjectReference::user(user),
            action: "edit".to_string(),
            entity: EntityReference::new("doc", "1"),
            schema_version: version.clone(),
            depth,
        }
    }

    #[tokio::test]
    async fn test_check_default_depth_is_20() {
        let (engine, _store, version) = setup();
        let ctx = RequestContext::new();

        let result = engine
            .check(&ctx, check_request("1", &version, None))
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_depth, 19);
    }

    #[tokio::test]
    async fn test_check_depth_cap() {
        let (engine, _store, version) = setup();
        let ctx = RequestContext::new();

        let err = engine
            .check(&ctx, check_request("1", &version, Some(101)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_schema_version() {
        let (engine, _store, _version) = setup();
        let ctx = RequestContext::new();

        let err = engine
            .check(
                &ctx,
                check_request("1", &SchemaVersion::new("v424242"), None),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        // Wrapped once with the call context.
        assert!(err.to_string().contains("check user:1 edit on doc:1"));
    }

    #[tokio::test]
    async fn test_cancelled_before_evaluation() {
        let (engine, _store, version) = setup();
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = engine
            .check(&ctx, check_request("1", &version, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_expand_and_lookup_share_version_resolution() {
        let (engine, _store, version) = setup();
        let ctx = RequestContext::new();

        let tree = engine
            .expand(
                &ctx,
                ExpandRequest {
                    entity: EntityReference::new("doc", "1"),
                    action: "edit".to_string(),
                    schema_version: version.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(tree.target, "owner");

        let query = engine
            .lookup_query(
                &ctx,
                &LookupQueryRequest {
                    entity_type: "doc".to_string(),
                    subject: SubjectReference::user("1"),
                    action: "edit".to_string(),
                    schema_version: version,
                },
            )
            .unwrap();
        assert_eq!(
            query,
            LookupQuery::RelationContains {
                entity_type: "doc".to_string(),
                relation: "owner".to_string(),
                subject: SubjectReference::user("1"),
            }
        );
    }
}
