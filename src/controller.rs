//! Wires the resolver, watchers, affordance and state machine onto a page.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::affordance::ControlAffordance;
use crate::attribute_watch::on_attribute_change;
use crate::config::ControllerConfig;
use crate::dom::NodeId;
use crate::expansion::{
    ExpandRate, ExpansionMachine, ExpansionState, LayoutOutcome, SuspensionSource, Transition,
    recompute,
};
use crate::page::Page;
use crate::resolver::{ElementWait, Subscription, WatchMode, wait_for_elements, watch};
use crate::storage::ParameterStore;
use crate::visibility::{watch_fullscreen, watch_scroll_out};
use crate::Result;

#[derive(Debug)]
struct ControllerState {
    config: ControllerConfig,
    rate_store: ParameterStore,
    machine: RefCell<ExpansionMachine>,
    affordance: Cell<Option<ControlAffordance>>,
    last_outcome: Cell<Option<LayoutOutcome>>,
}

/// Point-in-time view of the controller, for callers and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub intent: ExpansionState,
    pub user_intent: ExpansionState,
    pub effective_expanded: bool,
    pub rate: f64,
    pub fullscreen: bool,
    pub scrolled_out: bool,
    pub button: Option<NodeId>,
    pub button_disabled: bool,
}

#[derive(Debug, Clone)]
pub struct ControllerHandle {
    state: Rc<ControllerState>,
    anchor: Subscription,
    video: ElementWait,
    region: ElementWait,
    retry_timer: i64,
}

/// Installs the controller on `page`.
///
/// Loads the persisted rate, then starts: a one-shot watch for the controls
/// anchor plus a single deferred retry for it, an attribute watch on the
/// video once it appears, and both suspension sources. Nothing here fails
/// because elements are missing; they are picked up whenever they arrive.
pub fn install(page: &mut Page, config: ControllerConfig) -> Result<ControllerHandle> {
    config.validate()?;
    let rate_store = config.rate_store();
    let rate = ExpandRate::new(
        rate_store.load(page.storage()),
        config.min_rate,
        config.max_rate,
    );
    debug!(rate = rate.value(), key = rate_store.key(), "installing subtitle area controller");

    let state = Rc::new(ControllerState {
        config,
        rate_store,
        machine: RefCell::new(ExpansionMachine::new(rate)),
        affordance: Cell::new(None),
        last_outcome: Cell::new(None),
    });
    let config = &state.config;

    let shared = state.clone();
    let anchor = watch(page, &config.anchor_selector, WatchMode::Once, move |page, anchor| {
        ensure_affordance(page, &shared, Some(anchor));
    })?;

    let shared = state.clone();
    let retry_timer = page.set_timeout(config.initial_retry_delay_ms, move |page| {
        ensure_affordance(page, &shared, None);
    });

    let video = wait_for_elements(page, &config.video_selector)?;
    let shared = state.clone();
    video.then(page, move |page, nodes| {
        let Some(&video) = nodes.first() else {
            return;
        };
        debug!("video resolved, watching its attributes");
        on_attribute_change(page, video, move |page| {
            dispatch_logged(page, &shared, Transition::Refresh);
        });
    });

    let shared = state.clone();
    watch_fullscreen(page, move |page, active| {
        let transition = if active {
            Transition::Suspend(SuspensionSource::Fullscreen)
        } else {
            Transition::Resume(SuspensionSource::Fullscreen)
        };
        dispatch_logged(page, &shared, transition);
    });

    let shared = state.clone();
    let region = watch_scroll_out(page, &config.cinematic_container_selector, move |page, out| {
        let transition = if out {
            Transition::Suspend(SuspensionSource::ScrolledOut)
        } else {
            Transition::Resume(SuspensionSource::ScrolledOut)
        };
        dispatch_logged(page, &shared, transition);
    })?;

    Ok(ControllerHandle {
        state,
        anchor,
        video,
        region,
        retry_timer,
    })
}

impl ControllerHandle {
    pub fn config(&self) -> &ControllerConfig {
        &self.state.config
    }

    pub fn machine(&self) -> ExpansionMachine {
        self.state.machine.borrow().clone()
    }

    pub fn affordance(&self) -> Option<ControlAffordance> {
        self.state.affordance.get()
    }

    pub fn last_outcome(&self) -> Option<LayoutOutcome> {
        self.state.last_outcome.get()
    }

    pub fn anchor_subscription(&self) -> &Subscription {
        &self.anchor
    }

    pub fn video_wait(&self) -> &ElementWait {
        &self.video
    }

    pub fn region_wait(&self) -> &ElementWait {
        &self.region
    }

    pub fn retry_timer(&self) -> i64 {
        self.retry_timer
    }

    /// Feeds a transition in exactly as the page's own signals would.
    pub fn apply(&self, page: &mut Page, transition: Transition) -> Result<LayoutOutcome> {
        dispatch(page, &self.state, transition)
    }

    pub fn recompute(&self, page: &mut Page) -> Result<LayoutOutcome> {
        dispatch(page, &self.state, Transition::Refresh)
    }

    pub fn snapshot(&self, page: &Page) -> ControllerSnapshot {
        let machine = self.state.machine.borrow();
        let button = self.state.affordance.get();
        ControllerSnapshot {
            intent: machine.intent(),
            user_intent: machine.user_intent(),
            effective_expanded: machine.is_effectively_expanded(),
            rate: machine.rate().value(),
            fullscreen: machine.is_suspended_by(SuspensionSource::Fullscreen),
            scrolled_out: machine.is_suspended_by(SuspensionSource::ScrolledOut),
            button: button.map(|affordance| affordance.button()),
            button_disabled: button.is_some_and(|affordance| affordance.is_disabled(page)),
        }
    }
}

/// Installs the button unless one already exists. Reached from the anchor
/// watch (with the resolved anchor) and from the deferred retry (without).
fn ensure_affordance(page: &mut Page, state: &Rc<ControllerState>, anchor: Option<NodeId>) {
    let config = &state.config;
    if let Some(existing) = page.by_id(&config.button_id) {
        debug!(button_id = %config.button_id, "toggle button already present");
        if state.affordance.get().is_none() {
            state.affordance.set(ControlAffordance::find(page, &config.button_id));
        }
        page.trace_line(format!("[controller] button exists node={}", existing.0));
        return;
    }

    let anchor = match anchor.filter(|anchor| page.is_connected(*anchor)) {
        Some(anchor) => anchor,
        None => match page.query_selector(&config.anchor_selector) {
            Ok(Some(anchor)) => anchor,
            Ok(None) => {
                debug!(selector = %config.anchor_selector, "controls anchor not rendered yet");
                return;
            }
            Err(err) => {
                warn!(error = %err, "controls anchor lookup failed");
                return;
            }
        },
    };

    let on_click = {
        let state = state.clone();
        move |page: &mut Page| dispatch_logged(page, &state, Transition::Toggle)
    };
    let on_wheel = {
        let state = state.clone();
        move |page: &mut Page, delta_y: f64| {
            let delta = delta_y * state.config.wheel_step;
            dispatch_logged(page, &state, Transition::AdjustRate(delta));
        }
    };

    match ControlAffordance::install(page, anchor, &config.button_id, on_click, on_wheel) {
        Ok(affordance) => {
            state.affordance.set(Some(affordance));
            page.trace_line(format!("[controller] button installed node={}", affordance.button().0));
            sync_affordance(page, state);
        }
        Err(err) => warn!(error = %err, "failed to install toggle button"),
    }
}

fn dispatch_logged(page: &mut Page, state: &ControllerState, transition: Transition) {
    if let Err(err) = dispatch(page, state, transition) {
        warn!(?transition, error = %err, "subtitle area update failed");
    }
}

/// The single mutator: apply, persist a rate change, refresh the button,
/// then lay out again.
fn dispatch(page: &mut Page, state: &ControllerState, transition: Transition) -> Result<LayoutOutcome> {
    let machine = {
        let mut machine = state.machine.borrow_mut();
        let accepts_input = !machine.controls_disabled();
        machine.apply(transition);
        if matches!(transition, Transition::AdjustRate(_)) && accepts_input {
            let rate = machine.rate().value();
            debug!(rate, "expand rate adjusted");
            if let Err(err) = state.rate_store.save(page.storage_mut(), rate) {
                warn!(error = %err, "failed to persist expand rate");
            }
        }
        machine.clone()
    };
    page.trace_line(format!(
        "[controller] {transition:?} intent={:?} suspended={}",
        machine.intent(),
        machine.is_suspended()
    ));

    sync_affordance(page, state);
    let outcome = recompute(page, &machine, &state.config)?;
    state.last_outcome.set(Some(outcome));
    Ok(outcome)
}

fn sync_affordance(page: &mut Page, state: &ControllerState) {
    let Some(affordance) = state.affordance.get() else {
        return;
    };
    let (intent, disabled) = {
        let machine = state.machine.borrow();
        (machine.user_intent(), machine.controls_disabled())
    };
    let synced = affordance
        .show_intent(page, intent)
        .and_then(|()| affordance.set_disabled(page, disabled));
    if let Err(err) = synced {
        warn!(error = %err, "failed to refresh toggle button");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    const WATCH_PAGE: &str = r#"
        <div id='columns'>
          <div id='full-bleed-container'></div>
          <div id='player-container-inner'>
            <div id='movie_player'>
              <video class='video-stream html5-main-video' style='height: 500px;'></video>
              <div class='ytp-chrome-bottom'><div class='ytp-right-controls'></div></div>
            </div>
          </div>
        </div>
    "#;

    #[test]
    fn loads_persisted_rate_and_installs_button() -> Result<()> {
        let storage = MemoryStorage::new().with_item("EXPAND_RATE", "1.2");
        let mut page = Page::with_storage(WATCH_PAGE, storage)?;
        let handle = install(&mut page, ControllerConfig::default())?;

        let snapshot = handle.snapshot(&page);
        assert_eq!(snapshot.rate, 1.2);
        assert_eq!(snapshot.intent, ExpansionState::Idle);
        assert!(snapshot.button.is_some());
        assert!(!handle.anchor_subscription().is_active());
        assert!(handle.video_wait().is_resolved());
        Ok(())
    }

    #[test]
    fn retry_does_not_install_a_second_button() -> Result<()> {
        let mut page = Page::from_html(WATCH_PAGE)?;
        install(&mut page, ControllerConfig::default())?;
        page.advance_time(1_000)?;
        assert_eq!(page.query_selector_all("#ExpandAreaToggleButton")?.len(), 1);
        Ok(())
    }

    #[test]
    fn wheel_persists_every_adjustment() -> Result<()> {
        let mut page = Page::from_html(WATCH_PAGE)?;
        let handle = install(&mut page, ControllerConfig::default())?;
        assert!(page.wheel("#ExpandAreaToggleButton", 1_000.0)?);
        let rate = handle.snapshot(&page).rate;
        assert!((rate - 1.2).abs() < 1e-9);
        let stored = page.storage().get_item("EXPAND_RATE");
        assert_eq!(stored, Some(rate.to_string()));
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected_before_touching_the_page() -> Result<()> {
        let mut page = Page::from_html(WATCH_PAGE)?;
        let config = ControllerConfig {
            min_rate: 2.0,
            ..ControllerConfig::default()
        };
        assert!(install(&mut page, config).is_err());
        assert_eq!(page.mutation_observer_count(), 0);
        assert!(page.pending_timers().is_empty());
        Ok(())
    }
}
