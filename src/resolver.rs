//! Element resolution against a page whose markup arrives at arbitrary times.
//!
//! A [`watch`] first queries the document. Anything not already there is
//! picked up from child-list mutation batches on the whole document, matching
//! only inside the subtrees that were added rather than re-scanning the page.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use crate::dom::NodeId;
use crate::observer::{MutationObserverInit, MutationRecord, ObserverId};
use crate::page::Page;
use crate::selector::Selector;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Deliver the first matching set, then stop watching.
    Once,
    /// Keep delivering every future match for the life of the page.
    Continuous,
}

#[derive(Debug)]
struct SubscriptionState {
    active: Cell<bool>,
    observer: Cell<Option<ObserverId>>,
}

/// Handle on a [`watch`]. Clones share the same underlying subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    state: Rc<SubscriptionState>,
}

impl Subscription {
    fn new() -> Self {
        Self {
            state: Rc::new(SubscriptionState {
                active: Cell::new(true),
                observer: Cell::new(None),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active.get()
    }

    /// The mutation observer backing this subscription, if one was needed.
    pub fn observer(&self) -> Option<ObserverId> {
        self.state.observer.get()
    }

    /// Stops delivery and disconnects the observer. Returns whether the
    /// subscription was still active.
    pub fn cancel(&self, page: &mut Page) -> bool {
        let was_active = self.state.active.replace(false);
        if let Some(id) = self.state.observer.take() {
            page.disconnect_observer(id);
        }
        was_active
    }

    fn finish(&self) {
        self.state.active.set(false);
    }
}

/// Invokes `on_match` for every element matching `selector`, now and as the
/// page adds more of them.
///
/// In [`WatchMode::Once`] a match already present at call time is delivered
/// synchronously and no observer is registered at all.
pub fn watch(
    page: &mut Page,
    selector: &str,
    mode: WatchMode,
    mut on_match: impl FnMut(&mut Page, NodeId) + 'static,
) -> Result<Subscription> {
    watch_batches(page, selector, mode, move |page, nodes| {
        for node in nodes {
            on_match(page, *node);
        }
    })
}

fn watch_batches(
    page: &mut Page,
    selector: &str,
    mode: WatchMode,
    mut on_batch: impl FnMut(&mut Page, &[NodeId]) + 'static,
) -> Result<Subscription> {
    let selector = Selector::parse(selector)?;
    let subscription = Subscription::new();

    let existing = page.find_all(&selector);
    if !existing.is_empty() {
        debug!(selector = selector.source(), count = existing.len(), "resolved immediately");
        page.trace_line(format!(
            "[resolver] {} matched {} existing",
            selector.source(),
            existing.len()
        ));
        if mode == WatchMode::Once {
            subscription.finish();
            on_batch(page, &existing);
            return Ok(subscription);
        }
        on_batch(page, &existing);
    }

    let handle = subscription.clone();
    let root = page.document();
    let id = page.observe_mutations(
        root,
        MutationObserverInit::subtree_child_list(),
        move |page, records| {
            if !handle.is_active() {
                return;
            }
            let matches = added_matches(page, &selector, records);
            if matches.is_empty() {
                return;
            }
            debug!(selector = selector.source(), count = matches.len(), "resolved from mutation batch");
            page.trace_line(format!(
                "[resolver] {} matched {} added",
                selector.source(),
                matches.len()
            ));
            if mode == WatchMode::Once {
                handle.cancel(page);
            }
            on_batch(page, &matches);
        },
    );
    subscription.state.observer.set(Some(id));
    Ok(subscription)
}

/// Matches within the subtrees added by `records` that are still attached,
/// deduplicated and in discovery order.
fn added_matches(page: &Page, selector: &Selector, records: &[MutationRecord]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for node in records.iter().flat_map(|record| record.added_nodes.iter()) {
        if !page.is_connected(*node) {
            continue;
        }
        for matched in page.find_all_from(*node, selector) {
            if seen.insert(matched) {
                out.push(matched);
            }
        }
    }
    out
}

type Waiter = Box<dyn FnOnce(&mut Page, &[NodeId])>;

#[derive(Default)]
struct WaitState {
    value: Option<Vec<NodeId>>,
    waiters: Vec<Waiter>,
}

/// A deferred element set, resolved exactly once by a one-shot watch.
///
/// Continuations registered with [`ElementWait::then`] run when the set
/// arrives, or immediately if it already has. A wait on elements that never
/// show up simply stays pending.
#[derive(Clone)]
pub struct ElementWait {
    state: Rc<RefCell<WaitState>>,
    subscription: Subscription,
}

impl ElementWait {
    pub fn is_resolved(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    pub fn value(&self) -> Option<Vec<NodeId>> {
        self.state.borrow().value.clone()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn then(&self, page: &mut Page, continuation: impl FnOnce(&mut Page, &[NodeId]) + 'static) {
        let resolved = self.state.borrow().value.clone();
        match resolved {
            Some(nodes) => continuation(page, &nodes),
            None => self.state.borrow_mut().waiters.push(Box::new(continuation)),
        }
    }

    fn resolve(state: &RefCell<WaitState>, page: &mut Page, nodes: &[NodeId]) {
        let waiters = {
            let mut state = state.borrow_mut();
            if state.value.is_some() {
                return;
            }
            state.value = Some(nodes.to_vec());
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            waiter(page, nodes);
        }
    }
}

impl std::fmt::Debug for ElementWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ElementWait")
            .field("value", &state.value)
            .field("waiters", &state.waiters.len())
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Resolves with every element matching `selector` in the first set found.
pub fn wait_for_elements(page: &mut Page, selector: &str) -> Result<ElementWait> {
    let state = Rc::new(RefCell::new(WaitState::default()));
    let sink = state.clone();
    let subscription = watch_batches(page, selector, WatchMode::Once, move |page, nodes| {
        ElementWait::resolve(&sink, page, nodes);
    })?;
    Ok(ElementWait {
        state,
        subscription,
    })
}
