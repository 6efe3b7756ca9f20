use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::trace;

use crate::dom::{Dom, NodeId};
use crate::html::{parse_fragment, parse_html};
use crate::observer::{
    IntersectionCallback, IntersectionEntry, IntersectionObserverRegistry, MutationCallback,
    MutationObserverInit, MutationObserverRegistry, MutationRecord, ObserverId,
};
use crate::selector::Selector;
use crate::storage::{MemoryStorage, Storage};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Document,
    Node(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventState {
    pub event_type: String,
    pub target: EventTarget,
    pub current_target: EventTarget,
    pub delta_y: f64,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl EventState {
    pub fn new(event_type: &str, target: EventTarget) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            delta_y: 0.0,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn wheel(target: EventTarget, delta_y: f64) -> Self {
        Self {
            delta_y,
            ..Self::new("wheel", target)
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

pub(crate) type EventCallback = Rc<RefCell<dyn FnMut(&mut Page, &mut EventState)>>;

#[derive(Default)]
struct ListenerStore {
    map: HashMap<EventTarget, HashMap<String, Vec<EventCallback>>>,
}

impl ListenerStore {
    fn add(&mut self, target: EventTarget, event: String, listener: EventCallback) {
        self.map
            .entry(target)
            .or_default()
            .entry(event)
            .or_default()
            .push(listener);
    }

    fn get(&self, target: EventTarget, event: &str) -> Vec<EventCallback> {
        self.map
            .get(&target)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }

    fn count(&self, target: EventTarget, event: &str) -> usize {
        self.map
            .get(&target)
            .and_then(|events| events.get(event))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

type TimerCallback = Box<dyn FnOnce(&mut Page)>;

struct ScheduledTask {
    id: i64,
    due_at: i64,
    order: i64,
    callback: TimerCallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
}

struct TraceState {
    enabled: bool,
    logs: VecDeque<String>,
    log_limit: usize,
}

impl Default for TraceState {
    fn default() -> Self {
        Self {
            enabled: false,
            logs: VecDeque::new(),
            log_limit: 10_000,
        }
    }
}

/// A deterministic, single-threaded host document.
///
/// Every host-side operation runs to completion and then settles the page:
/// pending mutation records are delivered to observers in rounds, and
/// intersection changes are reported, until nothing is left. Records created
/// by observer callbacks go out in a later round, never re-entrantly.
pub struct Page {
    dom: Dom,
    storage: Box<dyn Storage>,
    listeners: ListenerStore,
    mutation_observers: MutationObserverRegistry,
    intersection_observers: IntersectionObserverRegistry,
    intersection_ratios: HashMap<NodeId, f64>,
    fullscreen_element: Option<NodeId>,
    scroll_y: f64,
    task_queue: Vec<ScheduledTask>,
    now_ms: i64,
    next_timer_id: i64,
    next_task_order: i64,
    timer_step_limit: usize,
    delivery_round_limit: usize,
    settling: bool,
    trace: TraceState,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        Self::with_storage(html, MemoryStorage::new())
    }

    pub fn with_storage(html: &str, storage: impl Storage + 'static) -> Result<Self> {
        let dom = parse_html(html)?;
        Ok(Self {
            dom,
            storage: Box::new(storage),
            listeners: ListenerStore::default(),
            mutation_observers: MutationObserverRegistry::default(),
            intersection_observers: IntersectionObserverRegistry::default(),
            intersection_ratios: HashMap::new(),
            fullscreen_element: None,
            scroll_y: 0.0,
            task_queue: Vec::new(),
            now_ms: 0,
            next_timer_id: 1,
            next_task_order: 0,
            timer_step_limit: 10_000,
            delivery_round_limit: 1_000,
            settling: false,
            trace: TraceState::default(),
        })
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace.enabled = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        self.trace.logs.drain(..).collect()
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace.log_limit = max_entries;
        while self.trace.logs.len() > self.trace.log_limit {
            self.trace.logs.pop_front();
        }
        Ok(())
    }

    pub(crate) fn trace_line(&mut self, line: String) {
        trace!(target: "subtitle_area::page", "{line}");
        if !self.trace.enabled {
            return;
        }
        if self.trace.logs.len() == self.trace.log_limit {
            self.trace.logs.pop_front();
        }
        self.trace.logs.push_back(line);
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Runtime(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.timer_step_limit = max_steps;
        Ok(())
    }

    pub fn set_delivery_round_limit(&mut self, max_rounds: usize) -> Result<()> {
        if max_rounds == 0 {
            return Err(Error::Runtime(
                "set_delivery_round_limit requires at least 1 round".into(),
            ));
        }
        self.delivery_round_limit = max_rounds;
        Ok(())
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn Storage {
        self.storage.as_mut()
    }

    pub fn document(&self) -> NodeId {
        self.dom.root
    }

    // ----- queries -------------------------------------------------------

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.dom.query_selector(&selector))
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.dom.query_selector_all(&selector))
    }

    pub fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    pub(crate) fn find_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.dom.query_selector_all(selector)
    }

    pub(crate) fn find_all_from(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.dom.query_selector_all_from(root, selector)
    }

    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.dom.by_id(id)
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.dom.contains(ancestor, node)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.dom.is_connected(node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.dom.parent(node)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.dom.children(node).to_vec()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.dom.tag_name(node).map(ToOwned::to_owned)
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.dom.attr(node, name)
    }

    pub fn style(&self, node: NodeId, prop: &str) -> Result<String> {
        self.dom.style_get(node, prop)
    }

    pub fn is_disabled(&self, node: NodeId) -> bool {
        self.dom.disabled(node)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.dom.text_content(node)
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    // ----- host-side mutations ------------------------------------------

    pub fn create_element(&mut self, tag_name: &str) -> NodeId {
        self.dom.create_detached_element(tag_name, false)
    }

    pub fn create_svg_element(&mut self, tag_name: &str) -> NodeId {
        self.dom.create_detached_element(tag_name, true)
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.dom.set_attr(node, name, value)?;
        self.settle()
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<()> {
        self.dom.remove_attr(node, name)?;
        self.settle()
    }

    pub fn set_style(&mut self, node: NodeId, prop: &str, value: &str) -> Result<()> {
        self.dom.style_set(node, prop, value)?;
        self.settle()
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.dom.append_child(parent, child)?;
        self.settle()
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.dom.prepend_child(parent, child)?;
        self.settle()
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        self.dom.remove_node(node)?;
        self.intersection_ratios.remove(&node);
        self.settle()
    }

    /// Parses `html` and appends its top-level nodes to `parent`, like a page
    /// hydrating a chunk of markup. Returns the inserted top-level nodes.
    pub fn insert_html(&mut self, parent: NodeId, html: &str) -> Result<Vec<NodeId>> {
        let (fragment, top) = parse_fragment(html)?;
        let mut inserted = Vec::with_capacity(top.len());
        for node in top {
            let imported = self.dom.import_subtree(&fragment, node)?;
            self.dom.append_child(parent, imported)?;
            inserted.push(imported);
        }
        self.settle()?;
        Ok(inserted)
    }

    /// Appends markup under the first element matching `parent_selector`.
    pub fn insert_html_into(&mut self, parent_selector: &str, html: &str) -> Result<Vec<NodeId>> {
        let parent = self.select_one(parent_selector)?;
        self.insert_html(parent, html)
    }

    // ----- observers ----------------------------------------------------

    pub fn observe_mutations(
        &mut self,
        target: NodeId,
        options: MutationObserverInit,
        callback: impl FnMut(&mut Page, &[MutationRecord]) + 'static,
    ) -> ObserverId {
        let callback: MutationCallback = Rc::new(RefCell::new(callback));
        let id = self.mutation_observers.observe(target, options, callback);
        self.trace_line(format!("[observer] observe id={} target={}", id.0, target.0));
        id
    }

    pub fn disconnect_observer(&mut self, id: ObserverId) -> bool {
        let existed = self.mutation_observers.disconnect(id);
        if existed {
            self.trace_line(format!("[observer] disconnect id={}", id.0));
        }
        existed
    }

    pub fn is_observer_connected(&self, id: ObserverId) -> bool {
        self.mutation_observers.is_connected(id)
    }

    pub fn mutation_observer_count(&self) -> usize {
        self.mutation_observers.active_count()
    }

    /// Registers a zero-threshold intersection observer. Like browsers, the
    /// first entry is delivered as soon as the page settles.
    pub fn observe_intersection(
        &mut self,
        target: NodeId,
        callback: impl FnMut(&mut Page, &[IntersectionEntry]) + 'static,
    ) -> Result<ObserverId> {
        let callback: IntersectionCallback = Rc::new(RefCell::new(callback));
        let id = self.intersection_observers.observe(target, callback);
        self.trace_line(format!("[intersection] observe id={} target={}", id.0, target.0));
        self.settle()?;
        Ok(id)
    }

    pub fn disconnect_intersection(&mut self, id: ObserverId) -> bool {
        self.intersection_observers.disconnect(id)
    }

    pub fn intersection_observer_count(&self) -> usize {
        self.intersection_observers.active_count()
    }

    pub fn intersection_ratio(&self, node: NodeId) -> f64 {
        if !self.dom.is_connected(node) {
            return 0.0;
        }
        self.intersection_ratios.get(&node).copied().unwrap_or(1.0)
    }

    /// Sets how much of `node` is inside the viewport, in `[0, 1]`.
    pub fn set_intersection_ratio(&mut self, node: NodeId, ratio: f64) -> Result<()> {
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(Error::Runtime(format!(
                "intersection ratio must be within [0, 1], got {ratio}"
            )));
        }
        self.intersection_ratios.insert(node, ratio);
        self.settle()
    }

    // ----- events -------------------------------------------------------

    pub fn add_event_listener(
        &mut self,
        target: EventTarget,
        event: &str,
        callback: impl FnMut(&mut Page, &mut EventState) + 'static,
    ) {
        let callback: EventCallback = Rc::new(RefCell::new(callback));
        self.listeners.add(target, event.to_string(), callback);
    }

    pub fn listener_count(&self, target: EventTarget, event: &str) -> usize {
        self.listeners.count(target, event)
    }

    /// Dispatches at the target, then bubbles through the ancestors up to
    /// the document.
    pub fn dispatch_event(&mut self, mut event: EventState) -> Result<EventState> {
        let mut path = vec![event.target];
        if let EventTarget::Node(node) = event.target {
            let mut cursor = self.dom.parent(node);
            while let Some(current) = cursor {
                if current == self.dom.root {
                    break;
                }
                path.push(EventTarget::Node(current));
                cursor = self.dom.parent(current);
            }
            if self.dom.is_connected(node) {
                path.push(EventTarget::Document);
            }
        }

        self.trace_line(format!(
            "[event] {} target={:?}",
            event.event_type, event.target
        ));

        for current in path {
            event.current_target = current;
            for listener in self.listeners.get(current, &event.event_type) {
                match listener.try_borrow_mut() {
                    Ok(mut callback) => (&mut *callback)(self, &mut event),
                    Err(_) => self.trace_line(format!(
                        "[event] skipped re-entrant {} listener",
                        event.event_type
                    )),
                }
            }
            if event.propagation_stopped {
                break;
            }
        }

        self.settle()?;
        Ok(event)
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.click_node(target)
    }

    pub fn click_node(&mut self, target: NodeId) -> Result<()> {
        if self.dom.disabled(target) {
            return Ok(());
        }
        self.dispatch_event(EventState::new("click", EventTarget::Node(target)))?;
        Ok(())
    }

    /// Scrolls the wheel over the first match of `selector`. Returns whether
    /// a listener prevented the default scroll; if none did, the page
    /// scrolls by `delta_y`.
    pub fn wheel(&mut self, selector: &str, delta_y: f64) -> Result<bool> {
        let target = self.select_one(selector)?;
        self.wheel_node(target, delta_y)
    }

    pub fn wheel_node(&mut self, target: NodeId, delta_y: f64) -> Result<bool> {
        let outcome = self.dispatch_event(EventState::wheel(EventTarget::Node(target), delta_y))?;
        if outcome.default_prevented() {
            return Ok(true);
        }
        self.scroll_y = (self.scroll_y + delta_y).max(0.0);
        Ok(false)
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    // ----- fullscreen ---------------------------------------------------

    pub fn fullscreen_element(&self) -> Option<NodeId> {
        self.fullscreen_element
    }

    pub fn request_fullscreen(&mut self, node: NodeId) -> Result<()> {
        if !self.dom.is_connected(node) {
            return Err(Error::Runtime(
                "requestFullscreen target is not connected".into(),
            ));
        }
        if self.fullscreen_element == Some(node) {
            return Ok(());
        }
        self.fullscreen_element = Some(node);
        self.dispatch_event(EventState::new("fullscreenchange", EventTarget::Document))?;
        Ok(())
    }

    pub fn exit_fullscreen(&mut self) -> Result<()> {
        if self.fullscreen_element.take().is_none() {
            return Ok(());
        }
        self.dispatch_event(EventState::new("fullscreenchange", EventTarget::Document))?;
        Ok(())
    }

    // ----- timers -------------------------------------------------------

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn set_timeout(&mut self, delay_ms: i64, callback: impl FnOnce(&mut Page) + 'static) -> i64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        let due_at = self.now_ms.saturating_add(delay_ms.max(0));
        self.task_queue.push(ScheduledTask {
            id,
            due_at,
            order,
            callback: Box::new(callback),
        });
        self.trace_line(format!("[timer] schedule id={id} due_at={due_at}"));
        id
    }

    pub fn clear_timeout(&mut self, timer_id: i64) -> bool {
        let before = self.task_queue.len();
        self.task_queue.retain(|task| task.id != timer_id);
        before != self.task_queue.len()
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        let target = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_timer_queue(Some(target))?;
        self.now_ms = target;
        self.trace_line(format!(
            "[timer] advance delta_ms={delta_ms} from={from} to={} ran_due={ran}",
            self.now_ms
        ));
        Ok(())
    }

    /// Runs every pending timer, moving the clock forward as needed.
    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None)?;
        self.trace_line(format!(
            "[timer] flush from={from} to={} ran={ran}",
            self.now_ms
        ));
        Ok(())
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(Error::Runtime(format!(
                    "timer queue exceeded max steps: limit={}, now_ms={}, pending_tasks={}",
                    self.timer_step_limit,
                    self.now_ms,
                    self.task_queue.len()
                )));
            }
            let task = self.task_queue.remove(next_idx);
            if task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.trace_line(format!(
                "[timer] run id={} due_at={} now_ms={}",
                task.id, task.due_at, self.now_ms
            ));
            (task.callback)(self);
            self.settle()?;
        }
        Ok(steps)
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.task_queue
            .iter()
            .enumerate()
            .filter(|(_, task)| due_limit.is_none_or(|limit| task.due_at <= limit))
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    // ----- delivery -----------------------------------------------------

    /// Delivers pending mutation batches and intersection changes until the
    /// page is quiet. Nested calls from inside callbacks return immediately;
    /// the outer loop picks up whatever they produced.
    pub(crate) fn settle(&mut self) -> Result<()> {
        if self.settling {
            return Ok(());
        }
        self.settling = true;
        let result = self.settle_rounds();
        self.settling = false;
        result
    }

    fn settle_rounds(&mut self) -> Result<()> {
        let mut rounds = 0usize;
        loop {
            let records = self.dom.take_records();
            let entries = {
                let dom = &self.dom;
                let ratios = &self.intersection_ratios;
                self.intersection_observers.changed_entries(|node| {
                    if dom.is_connected(node) {
                        ratios.get(&node).copied().unwrap_or(1.0)
                    } else {
                        0.0
                    }
                })
            };
            if records.is_empty() && entries.is_empty() {
                return Ok(());
            }

            rounds += 1;
            if rounds > self.delivery_round_limit {
                return Err(Error::Runtime(format!(
                    "observer delivery exceeded max rounds (possible feedback loop): limit={}, pending_records={}",
                    self.delivery_round_limit,
                    records.len()
                )));
            }

            let batches = self.mutation_observers.batches(&self.dom, &records);
            for (id, callback, batch) in batches {
                // Disconnected by an earlier callback in this round.
                if !self.mutation_observers.is_connected(id) {
                    continue;
                }
                self.trace_line(format!(
                    "[observer] deliver id={} records={}",
                    id.0,
                    batch.len()
                ));
                match callback.try_borrow_mut() {
                    Ok(mut callback) => (&mut *callback)(self, &batch),
                    Err(_) => self.trace_line(format!("[observer] skipped re-entrant id={}", id.0)),
                }
            }

            for (callback, entry) in entries {
                self.trace_line(format!(
                    "[intersection] deliver target={} ratio={} intersecting={}",
                    entry.target.0, entry.intersection_ratio, entry.is_intersecting
                ));
                if let Ok(mut callback) = callback.try_borrow_mut() {
                    (&mut *callback)(self, &[entry]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const PLAYER_HTML: &str = r#"
        <div id='page'>
          <div id='player-container-inner'>
            <video class='video-stream html5-main-video' style='height: 500px;'></video>
          </div>
        </div>
    "#;

    #[test]
    fn subtree_observer_receives_one_batch_per_round() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let root = page.document();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        page.observe_mutations(root, MutationObserverInit::subtree_child_list(), move |_, records| {
            sink.borrow_mut().push(records.len());
        });

        page.insert_html_into("#page", "<div class='ytp-right-controls'></div><span></span>")?;
        assert_eq!(*batches.borrow(), vec![2]);
        Ok(())
    }

    #[test]
    fn records_from_callbacks_are_delivered_in_a_later_round() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let root = page.document();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        page.observe_mutations(root, MutationObserverInit::subtree_child_list(), move |page, records| {
            for record in records {
                for node in &record.added_nodes {
                    let tag = page.tag_name(*node).unwrap_or_default();
                    sink.borrow_mut().push(tag.clone());
                    if tag == "section" {
                        let child = page.create_element("p");
                        let _ = page.append_child(*node, child);
                    }
                }
            }
        });

        page.insert_html_into("#page", "<section></section>")?;
        assert_eq!(*seen.borrow(), vec!["section".to_string(), "p".to_string()]);
        Ok(())
    }

    #[test]
    fn feedback_loops_hit_the_round_limit() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        page.set_delivery_round_limit(10)?;
        let video = page.select_one("video")?;
        let counter = Rc::new(Cell::new(0u32));
        let tick = counter.clone();
        page.observe_mutations(video, MutationObserverInit::attributes_only(), move |page, _| {
            tick.set(tick.get() + 1);
            let _ = page.set_attribute(video, "data-tick", &tick.get().to_string());
        });

        match page.set_attribute(video, "data-tick", "0") {
            Err(Error::Runtime(msg)) => assert!(msg.contains("max rounds"), "{msg}"),
            other => panic!("expected round limit error, got {other:?}"),
        }
        assert_eq!(counter.get(), 10);
        Ok(())
    }

    #[test]
    fn disconnected_observer_gets_nothing() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let video = page.select_one("video")?;
        let hits = Rc::new(Cell::new(0u32));
        let tick = hits.clone();
        let id = page.observe_mutations(video, MutationObserverInit::attributes_only(), move |_, _| {
            tick.set(tick.get() + 1);
        });
        page.set_style(video, "height", "400px")?;
        assert!(page.disconnect_observer(id));
        assert!(!page.disconnect_observer(id));
        page.set_style(video, "height", "300px")?;
        assert_eq!(hits.get(), 1);
        assert_eq!(page.mutation_observer_count(), 0);
        Ok(())
    }

    #[test]
    fn intersection_reports_initially_and_on_flips_only() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let container = page.select_one("#player-container-inner")?;
        let entries = Rc::new(RefCell::new(Vec::new()));
        let sink = entries.clone();
        page.observe_intersection(container, move |_, batch| {
            sink.borrow_mut().extend(batch.iter().map(|entry| entry.is_intersecting));
        })?;

        page.set_intersection_ratio(container, 0.5)?;
        page.set_intersection_ratio(container, 0.0)?;
        page.set_intersection_ratio(container, 0.0)?;
        page.set_intersection_ratio(container, 0.01)?;
        assert_eq!(*entries.borrow(), vec![true, false, true]);
        assert!(page.set_intersection_ratio(container, 1.5).is_err());
        Ok(())
    }

    #[test]
    fn events_bubble_and_wheel_scrolls_unless_prevented() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let container = page.select_one("#player-container-inner")?;
        let video = page.select_one("video")?;
        let order = Rc::new(RefCell::new(Vec::new()));
        let sink = order.clone();
        page.add_event_listener(EventTarget::Node(video), "click", move |_, _| {
            sink.borrow_mut().push("video");
        });
        let sink = order.clone();
        page.add_event_listener(EventTarget::Document, "click", move |_, _| {
            sink.borrow_mut().push("document");
        });
        page.click("video")?;
        assert_eq!(*order.borrow(), vec!["video", "document"]);

        assert!(!page.wheel("video", 120.0)?);
        assert_eq!(page.scroll_y(), 120.0);

        page.add_event_listener(EventTarget::Node(container), "wheel", |_, event| {
            event.prevent_default();
        });
        assert!(page.wheel("video", 120.0)?);
        assert_eq!(page.scroll_y(), 120.0);
        Ok(())
    }

    #[test]
    fn disabled_elements_swallow_clicks() -> Result<()> {
        let mut page = Page::from_html("<button id='b' disabled></button>")?;
        let button = page.select_one("#b")?;
        let hits = Rc::new(Cell::new(0u32));
        let tick = hits.clone();
        page.add_event_listener(EventTarget::Node(button), "click", move |_, _| {
            tick.set(tick.get() + 1);
        });
        page.click("#b")?;
        page.remove_attribute(button, "disabled")?;
        page.click("#b")?;
        assert_eq!(hits.get(), 1);
        Ok(())
    }

    #[test]
    fn fullscreen_changes_dispatch_on_document() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let video = page.select_one("video")?;
        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = states.clone();
        page.add_event_listener(EventTarget::Document, "fullscreenchange", move |page, _| {
            sink.borrow_mut().push(page.fullscreen_element().is_some());
        });
        page.request_fullscreen(video)?;
        page.request_fullscreen(video)?;
        page.exit_fullscreen()?;
        page.exit_fullscreen()?;
        assert_eq!(*states.borrow(), vec![true, false]);
        Ok(())
    }

    #[test]
    fn timers_run_in_due_order_and_advance_clock() -> Result<()> {
        let mut page = Page::from_html("<div></div>")?;
        let order = Rc::new(RefCell::new(Vec::new()));
        for (delay, label) in [(200, "b"), (100, "a"), (200, "c")] {
            let sink = order.clone();
            page.set_timeout(delay, move |page| {
                sink.borrow_mut().push((label, page.now_ms()));
            });
        }
        page.advance_time(150)?;
        assert_eq!(*order.borrow(), vec![("a", 100)]);
        assert_eq!(page.now_ms(), 150);
        page.flush()?;
        assert_eq!(*order.borrow(), vec![("a", 100), ("b", 200), ("c", 200)]);
        assert!(page.pending_timers().is_empty());
        Ok(())
    }

    #[test]
    fn cleared_timer_never_fires() -> Result<()> {
        let mut page = Page::from_html("<div></div>")?;
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let id = page.set_timeout(1_000, move |_| flag.set(true));
        assert!(page.clear_timeout(id));
        assert!(!page.clear_timeout(id));
        page.advance_time(5_000)?;
        assert!(!fired.get());
        assert!(page.pending_timers().is_empty());
        Ok(())
    }

    fn reschedule_forever(page: &mut Page) {
        page.set_timeout(10, reschedule_forever);
    }

    #[test]
    fn runaway_timers_hit_the_step_limit() -> Result<()> {
        let mut page = Page::from_html("<div></div>")?;
        assert!(page.set_timer_step_limit(0).is_err());
        page.set_timer_step_limit(5)?;
        page.set_timeout(0, reschedule_forever);
        match page.flush() {
            Err(Error::Runtime(msg)) => assert!(msg.contains("max steps"), "{msg}"),
            other => panic!("expected step limit error, got {other:?}"),
        }
        assert_eq!(page.pending_timers().len(), 1);
        Ok(())
    }

    #[test]
    fn listener_count_tracks_target_and_event() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let video = page.select_one("video")?;
        let target = EventTarget::Node(video);
        assert_eq!(page.listener_count(target, "wheel"), 0);
        page.add_event_listener(target, "wheel", |_, _| {});
        page.add_event_listener(target, "wheel", |_, _| {});
        page.add_event_listener(target, "click", |_, _| {});
        assert_eq!(page.listener_count(target, "wheel"), 2);
        assert_eq!(page.listener_count(target, "click"), 1);
        assert_eq!(page.listener_count(EventTarget::Document, "wheel"), 0);
        Ok(())
    }

    #[test]
    fn disconnected_intersection_observer_stops_reporting() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let container = page.select_one("#player-container-inner")?;
        let entries = Rc::new(Cell::new(0u32));
        let tick = entries.clone();
        let id = page.observe_intersection(container, move |_, batch| {
            tick.set(tick.get() + batch.len() as u32);
        })?;
        assert_eq!(entries.get(), 1);
        assert_eq!(page.intersection_observer_count(), 1);

        assert!(page.disconnect_intersection(id));
        assert!(!page.disconnect_intersection(id));
        page.set_intersection_ratio(container, 0.0)?;
        assert_eq!(entries.get(), 1);
        assert_eq!(page.intersection_observer_count(), 0);
        Ok(())
    }

    #[test]
    fn observer_ids_are_not_reused_after_disconnect() -> Result<()> {
        let mut page = Page::from_html(PLAYER_HTML)?;
        let video = page.select_one("video")?;
        let first = page.observe_mutations(video, MutationObserverInit::attributes_only(), |_, _| {});
        assert!(page.disconnect_observer(first));
        let second = page.observe_mutations(video, MutationObserverInit::attributes_only(), |_, _| {});
        assert_ne!(first, second);
        assert!(!page.is_observer_connected(first));
        assert!(page.is_observer_connected(second));
        assert_eq!(page.mutation_observer_count(), 1);
        Ok(())
    }

    #[test]
    fn trace_log_is_bounded() -> Result<()> {
        let mut page = Page::from_html("<div></div>")?;
        page.enable_trace(true);
        page.set_trace_log_limit(2)?;
        for delay in 0..5 {
            page.set_timeout(delay, |_| {});
        }
        let logs = page.take_trace_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[1].contains("id=5"), "{logs:?}");
        Ok(())
    }
}
