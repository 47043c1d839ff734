use crate::{
    error::Result,
    models::{LookupQuery, SchemaVersion, SubjectReference, Tuple, TupleFilter, DEFAULT_MAX_DEPTH},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Read-only query surface over stored relationship facts.
///
/// Queries are consistent within one logical call (snapshot read at the
/// requested schema version); a store that cannot serve the snapshot fails
/// with `Database { kind: SnapshotMissing }`. The engine never writes tuples.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Read tuples matching the filter; `None` filter fields act as wildcards.
    async fn query(&self, filter: &TupleFilter, version: &SchemaVersion) -> Result<Vec<Tuple>>;
}

/// In-memory tuple store for development and testing.
///
/// Write methods exist only for seeding; the engines go through [`TupleReader`].
/// Query results are returned in stable sorted order so evaluation traces are
/// reproducible.
#[derive(Debug, Default)]
pub struct InMemoryTupleStore {
    tuples: DashMap<String, Tuple, ahash::RandomState>,
}

impl InMemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tuple_key(tuple: &Tuple) -> String {
        tuple.to_string()
    }

    pub fn write_tuple(&self, tuple: Tuple) {
        self.tuples.insert(Self::tuple_key(&tuple), tuple);
    }

    pub fn delete_tuple(&self, tuple: &Tuple) {
        self.tuples.remove(&Self::tuple_key(tuple));
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    fn matches(tuple: &Tuple, filter: &TupleFilter) -> bool {
        if tuple.entity.entity_type != filter.entity_type {
            return false;
        }
        if let Some(ref id) = filter.entity_id {
            if &tuple.entity.id != id {
                return false;
            }
        }
        if let Some(ref relation) = filter.relation {
            if &tuple.relation != relation {
                return false;
            }
        }
        if let Some(ref subject) = filter.subject {
            if tuple.subject.subject_type != subject.subject_type {
                return false;
            }
            if let Some(ref id) = subject.id {
                if &tuple.subject.id != id {
                    return false;
                }
            }
            if let Some(ref relation) = subject.relation {
                if tuple.subject.relation.as_ref() != Some(relation) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether a granted subject covers `subject`: a direct match, or a
    /// userset whose membership tuples reach `subject` within `depth` hops.
    fn subject_matches(
        &self,
        granted: &SubjectReference,
        subject: &SubjectReference,
        depth: u32,
    ) -> bool {
        if granted == subject {
            return true;
        }
        let Some(ref relation) = granted.relation else {
            return false;
        };
        if depth == 0 {
            return false;
        }

        let entity = granted.as_entity();
        // Collect before recursing; shard guards must not be held re-entrantly.
        let members: Vec<SubjectReference> = self
            .tuples
            .iter()
            .filter(|entry| {
                let tuple = entry.value();
                tuple.entity == entity && &tuple.relation == relation
            })
            .map(|entry| entry.value().subject.clone())
            .collect();
        members
            .iter()
            .any(|member| self.subject_matches(member, subject, depth - 1))
    }

    /// Execute a [`LookupQuery`] predicate, returning the matching entity ids.
    ///
    /// This is the store-side interpretation of the predicate the Lookup
    /// engine hands back uninterpreted. `RelationContains` resolves userset
    /// grants through stored membership tuples, bounded at the same default
    /// depth Check evaluates with.
    pub fn entities_matching(&self, query: &LookupQuery) -> BTreeSet<String> {
        match query {
            LookupQuery::RelationContains {
                entity_type,
                relation,
                subject,
            } => {
                let grants: Vec<Tuple> = self
                    .tuples
                    .iter()
                    .filter(|entry| {
                        let tuple = entry.value();
                        &tuple.entity.entity_type == entity_type && &tuple.relation == relation
                    })
                    .map(|entry| entry.value().clone())
                    .collect();
                grants
                    .into_iter()
                    .filter(|tuple| {
                        self.subject_matches(&tuple.subject, subject, DEFAULT_MAX_DEPTH)
                    })
                    .map(|tuple| tuple.entity.id)
                    .collect()
            }
            LookupQuery::Union(children) => children
                .iter()
                .flat_map(|child| self.entities_matching(child))
                .collect(),
            LookupQuery::Intersection(children) => {
                let mut sets = children.iter().map(|child| self.entities_matching(child));
                let Some(first) = sets.next() else {
                    return BTreeSet::new();
                };
                sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
            }
            LookupQuery::Exclusion { include, exclude } => {
                let include = self.entities_matching(include);
                let exclude = self.entities_matching(exclude);
                include.difference(&exclude).cloned().collect()
            }
        }
    }
}

#[async_trait]
impl TupleReader for InMemoryTupleStore {
    async fn query(&self, filter: &TupleFilter, _version: &SchemaVersion) -> Result<Vec<Tuple>> {
        let mut results: Vec<(String, Tuple)> = self
            .tuples
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        // DashMap iteration order is unstable; sort for reproducible traces.
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results.into_iter().map(|(_, tuple)| tuple).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityReference, SubjectFilter, SubjectReference};

    fn store_with_tuples() -> InMemoryTupleStore {
        let store = InMemoryTupleStore::new();
        store.write_tuple(Tuple::new(
            EntityReference::new("doc", "1"),
            "owner",
            SubjectReference::user("1"),
        ));
        store.write_tuple(Tuple::new(
            EntityReference::new("doc", "1"),
            "viewer",
            SubjectReference::user("2"),
        ));
        store.write_tuple(Tuple::new(
            EntityReference::new("doc", "2"),
            "owner",
            SubjectReference::user("2"),
        ));
        store
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = store_with_tuples();
        let version = SchemaVersion::new("v000001");

        let all_doc1 = store
            .query(
                &TupleFilter {
                    entity_type: "doc".to_string(),
                    entity_id: Some("1".to_string()),
                    relation: None,
                    subject: None,
                },
                &version,
            )
            .await
            .unwrap();
        assert_eq!(all_doc1.len(), 2);

        let owners = store
            .query(
                &TupleFilter::entity_relation(&EntityReference::new("doc", "1"), "owner"),
                &version,
            )
            .await
            .unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners.first().unwrap().subject, SubjectReference::user("1"));

        let by_subject = store
            .query(
                &TupleFilter {
                    entity_type: "doc".to_string(),
                    entity_id: None,
                    relation: None,
                    subject: Some(SubjectFilter {
                        subject_type: "user".to_string(),
                        id: Some("2".to_string()),
                        relation: None,
                    }),
                },
                &version,
            )
            .await
            .unwrap();
        assert_eq!(by_subject.len(), 2);
    }

    #[tokio::test]
    async fn test_query_order_is_stable() {
        let store = store_with_tuples();
        let version = SchemaVersion::new("v000001");
        let filter = TupleFilter {
            entity_type: "doc".to_string(),
            entity_id: None,
            relation: None,
            subject: None,
        };

        let first = store.query(&filter, &version).await.unwrap();
        let second = store.query(&filter, &version).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_entities_matching() {
        let store = store_with_tuples();

        let owned_by_2 = store.entities_matching(&LookupQuery::RelationContains {
            entity_type: "doc".to_string(),
            relation: "owner".to_string(),
            subject: SubjectReference::user("2"),
        });
        assert_eq!(owned_by_2, BTreeSet::from(["2".to_string()]));

        let union = store.entities_matching(&LookupQuery::Union(vec![
            LookupQuery::RelationContains {
                entity_type: "doc".to_string(),
                relation: "owner".to_string(),
                subject: SubjectReference::user("2"),
            },
            LookupQuery::RelationContains {
                entity_type: "doc".to_string(),
                relation: "viewer".to_string(),
                subject: SubjectReference::user("2"),
            },
        ]));
        assert_eq!(union, BTreeSet::from(["1".to_string(), "2".to_string()]));

        let via_userset = {
            let store = store_with_tuples();
            store.write_tuple(Tuple::new(
                EntityReference::new("doc", "3"),
                "owner",
                SubjectReference::userset("org", "acme", "admin"),
            ));
            store.write_tuple(Tuple::new(
                EntityReference::new("org", "acme"),
                "admin",
                SubjectReference::userset("team", "core", "member"),
            ));
            store.write_tuple(Tuple::new(
                EntityReference::new("team", "core"),
                "member",
                SubjectReference::user("2"),
            ));
            store.entities_matching(&LookupQuery::RelationContains {
                entity_type: "doc".to_string(),
                relation: "owner".to_string(),
                subject: SubjectReference::user("2"),
            })
        };
        // doc:2 grants user:2 directly; doc:3 through the org/team chain.
        assert_eq!(
            via_userset,
            BTreeSet::from(["2".to_string(), "3".to_string()])
        );

        let exclusion = store.entities_matching(&LookupQuery::Exclusion {
            include: Box::new(LookupQuery::Union(vec![
                LookupQuery::RelationContains {
                    entity_type: "doc".to_string(),
                    relation: "owner".to_string(),
                    subject: SubjectReference::user("2"),
                },
                LookupQuery::RelationContains {
                    entity_type: "doc".to_string(),
                    relation: "viewer".to_string(),
                    subject: SubjectReference::user("2"),
                },
            ])),
            exclude: Box::new(LookupQuery::RelationContains {
                entity_type: "doc".to_string(),
                relation: "owner".to_string(),
                subject: SubjectReference::user("2"),
            }),
        });
        assert_eq!(exclusion, BTreeSet::from(["1".to_string()]));
    }
}
