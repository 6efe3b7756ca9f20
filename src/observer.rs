//! Observer bookkeeping for the page runtime: mutation records and the
//! registries behind mutation and intersection observers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::dom::{Dom, NodeId};
use crate::page::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
}

/// One DOM change, delivered to observers as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    pub(crate) fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added_nodes: added,
            removed_nodes: removed,
            attribute_name: None,
            old_value: None,
        }
    }

    pub(crate) fn attributes(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub subtree: bool,
}

impl MutationObserverInit {
    pub fn subtree_child_list() -> Self {
        Self {
            child_list: true,
            attributes: false,
            subtree: true,
        }
    }

    pub fn attributes_only() -> Self {
        Self {
            child_list: false,
            attributes: true,
            subtree: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) usize);

pub(crate) type MutationCallback = Rc<RefCell<dyn FnMut(&mut Page, &[MutationRecord])>>;

struct MutationObservation {
    target: NodeId,
    options: MutationObserverInit,
    callback: MutationCallback,
}

/// Observations keyed by a monotonic id, so iteration follows registration
/// order and disconnected entries are dropped.
#[derive(Default)]
pub(crate) struct MutationObserverRegistry {
    next_id: usize,
    observations: BTreeMap<ObserverId, MutationObservation>,
}

impl MutationObserverRegistry {
    pub(crate) fn observe(
        &mut self,
        target: NodeId,
        options: MutationObserverInit,
        callback: MutationCallback,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observations.insert(
            id,
            MutationObservation {
                target,
                options,
                callback,
            },
        );
        id
    }

    pub(crate) fn disconnect(&mut self, id: ObserverId) -> bool {
        self.observations.remove(&id).is_some()
    }

    pub(crate) fn is_connected(&self, id: ObserverId) -> bool {
        self.observations.contains_key(&id)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.observations.len()
    }

    /// Splits a round of records into per-observer batches, in registration
    /// order. Observers with nothing relevant get no batch.
    pub(crate) fn batches(
        &self,
        dom: &Dom,
        records: &[MutationRecord],
    ) -> Vec<(ObserverId, MutationCallback, Vec<MutationRecord>)> {
        let mut out = Vec::new();
        for (id, observation) in &self.observations {
            let batch = records
                .iter()
                .filter(|record| observes(dom, observation, record))
                .cloned()
                .collect::<Vec<_>>();
            if !batch.is_empty() {
                out.push((*id, observation.callback.clone(), batch));
            }
        }
        out
    }
}

fn observes(dom: &Dom, observation: &MutationObservation, record: &MutationRecord) -> bool {
    let in_scope = record.target == observation.target
        || (observation.options.subtree && dom.contains(observation.target, record.target));
    if !in_scope {
        return false;
    }
    match record.kind {
        MutationKind::ChildList => observation.options.child_list,
        MutationKind::Attributes => observation.options.attributes,
    }
}

/// Intersection state change for an observed node. With a zero threshold
/// any visible pixel counts as intersecting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    pub target: NodeId,
    pub intersection_ratio: f64,
    pub is_intersecting: bool,
}

pub(crate) type IntersectionCallback = Rc<RefCell<dyn FnMut(&mut Page, &[IntersectionEntry])>>;

struct IntersectionObservation {
    target: NodeId,
    last_intersecting: Option<bool>,
    callback: IntersectionCallback,
}

#[derive(Default)]
pub(crate) struct IntersectionObserverRegistry {
    next_id: usize,
    observations: BTreeMap<ObserverId, IntersectionObservation>,
}

impl IntersectionObserverRegistry {
    pub(crate) fn observe(&mut self, target: NodeId, callback: IntersectionCallback) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observations.insert(
            id,
            IntersectionObservation {
                target,
                last_intersecting: None,
                callback,
            },
        );
        id
    }

    pub(crate) fn disconnect(&mut self, id: ObserverId) -> bool {
        self.observations.remove(&id).is_some()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.observations.len()
    }

    /// Collects entries for every observation whose intersecting state
    /// differs from what it last reported. The first evaluation after
    /// `observe` always reports.
    pub(crate) fn changed_entries(
        &mut self,
        ratio_of: impl Fn(NodeId) -> f64,
    ) -> Vec<(IntersectionCallback, IntersectionEntry)> {
        let mut out = Vec::new();
        for observation in self.observations.values_mut() {
            let ratio = ratio_of(observation.target);
            let intersecting = ratio > 0.0;
            if observation.last_intersecting == Some(intersecting) {
                continue;
            }
            observation.last_intersecting = Some(intersecting);
            out.push((
                observation.callback.clone(),
                IntersectionEntry {
                    target: observation.target,
                    intersection_ratio: ratio,
                    is_intersecting: intersecting,
                },
            ));
        }
        out
    }
}
