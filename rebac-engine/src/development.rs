use crate::{
    context::RequestContext,
    engine::AuthorizationEngine,
    error::Result,
    models::{
        CheckRequest, CheckResult, ExpandRequest, ExpandTree, LookupQuery, LookupQueryRequest,
        SchemaVersion, Tuple,
    },
    repository::InMemoryTupleStore,
    schema::{Schema, SchemaRegistry},
};
use std::sync::Arc;
use tracing::info;

/// Self-contained engine bundle for demos, embedding hosts and tests: an
/// in-memory schema registry, an in-memory tuple store, and an engine wired
/// over them. Nothing here persists.
pub struct Development {
    registry: Arc<SchemaRegistry>,
    store: Arc<InMemoryTupleStore>,
    engine: AuthorizationEngine,
}

impl Default for Development {
    fn default() -> Self {
        Self::new()
    }
}

impl Development {
    pub fn new() -> Self {
        let registry = Arc::new(SchemaRegistry::new());
        let store = Arc::new(InMemoryTupleStore::new());
        let engine = AuthorizationEngine::new(registry.clone(), store.clone());
        Self {
            registry,
            store,
            engine,
        }
    }

    /// Validate and publish a schema, returning its assigned version.
    pub fn write_schema(&self, schema: Schema) -> Result<SchemaVersion> {
        let version = self.registry.publish(schema)?;
        info!(%version, "schema published");
        Ok(version)
    }

    pub fn read_schema(&self, version: &SchemaVersion) -> Result<Arc<Schema>> {
        self.registry.resolve(version)
    }

    pub fn latest_version(&self) -> Option<SchemaVersion> {
        self.registry.latest()
    }

    /// Validate a tuple against the schema at `version` and store it.
    pub fn write_tuple(&self, tuple: Tuple, version: &SchemaVersion) -> Result<()> {
        let schema = self.registry.resolve(version)?;
        schema.validate_tuple(&tuple)?;
        info!(%tuple, "tuple written");
        self.store.write_tuple(tuple);
        Ok(())
    }

    pub fn delete_tuple(&self, tuple: &Tuple) {
        self.store.delete_tuple(tuple);
    }

    pub fn store(&self) -> &Arc<InMemoryTupleStore> {
        &self.store
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    pub async fn check(&self, request: CheckRequest) -> Result<CheckResult> {
        self.engine.check(&RequestContext::new(), request).await
    }

    pub async fn expand(&self, request: ExpandRequest) -> Result<ExpandTree> {
        self.engine.expand(&RequestContext::new(), request).await
    }

    pub fn lookup_query(&self, request: &LookupQueryRequest) -> Result<LookupQuery> {
        self.engine.lookup_query(&RequestContext::new(), request)
    }
}
