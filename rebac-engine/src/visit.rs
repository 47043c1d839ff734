use crate::models::{EntityReference, SubjectReference, Visit, VisitKind};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Memoization and cycle-guard key: one evaluation node per
/// (entity, relation-or-permission, subject).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitKey {
    pub entity: EntityReference,
    pub target: String,
    /// `None` for expansion nodes, which evaluate no particular subject.
    pub subject: Option<SubjectReference>,
}

impl VisitKey {
    pub fn new(entity: &EntityReference, target: &str, subject: &SubjectReference) -> Self {
        Self {
            entity: entity.clone(),
            target: target.to_string(),
            subject: Some(subject.clone()),
        }
    }

    pub fn expansion(entity: &EntityReference, target: &str) -> Self {
        Self {
            entity: entity.clone(),
            target: target.to_string(),
            subject: None,
        }
    }
}

/// State of a node in the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    /// Evaluation has started but not finished; seeing this again is a cycle.
    InProgress,
    /// Check finished the node with this boolean.
    Decided(bool),
    /// Expand finished materializing the node.
    Expanded,
}

/// Outcome of attempting to enter a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    /// First visit; the caller owns evaluation and must call `complete`.
    Entered,
    /// The node was already visited in this call.
    Revisit(VisitState),
}

/// Call-scoped visitation tracker: memoizes sub-results, guards against
/// cycles, and records the ordered trace returned with check decisions.
///
/// Created per call and discarded at call completion; internal locks exist
/// only so sibling branches evaluated concurrently within one call can share
/// it, and are never held across suspension points.
#[derive(Debug, Default)]
pub struct VisitTracker {
    nodes: Mutex<HashMap<VisitKey, VisitState>>,
    trace: Mutex<Vec<Visit>>,
}

impl VisitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, key: &VisitKey) -> EnterOutcome {
        let mut nodes = self.nodes.lock();
        if let Some(state) = nodes.get(key) {
            return EnterOutcome::Revisit(*state);
        }
        nodes.insert(key.clone(), VisitState::InProgress);
        EnterOutcome::Entered
    }

    pub fn complete(&self, key: &VisitKey, state: VisitState) {
        self.nodes.lock().insert(key.clone(), state);
    }

    pub fn record(&self, entity: &EntityReference, target: &str, kind: VisitKind) {
        self.trace.lock().push(Visit {
            entity: entity.clone(),
            target: target.to_string(),
            kind,
        });
    }

    pub fn into_trace(self) -> Vec<Visit> {
        self.trace.into_inner()
    }
}
