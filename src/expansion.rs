//! Expansion state and the layout pass that applies it.
//!
//! All state lives in one [`ExpansionMachine`]; every input (click, wheel,
//! fullscreen, scroll-out, attribute change) becomes a [`Transition`] and is
//! followed by a [`recompute`]. The machine keeps
//! `effective expanded <=> intent Expanded and no suspension active`
//! by forcing the intent to Idle for as long as any suspension source is on.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::config::ControllerConfig;
use crate::dom::NodeId;
use crate::page::Page;
use crate::style::{format_px, parse_css_length};
use crate::Result;

/// Multiplier applied to the video height, always inside `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpandRate {
    value: f64,
    min: f64,
    max: f64,
}

impl ExpandRate {
    pub const DEFAULT: f64 = 1.1;
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 1.3;

    /// Clamps `value` into `[min, max]`. NaN lands on `min`.
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let value = if value.is_nan() { min } else { value.clamp(min, max) };
        Self { value, min, max }
    }

    pub fn value(self) -> f64 {
        self.value
    }

    pub fn min(self) -> f64 {
        self.min
    }

    pub fn max(self) -> f64 {
        self.max
    }

    pub fn adjusted(self, delta: f64) -> Self {
        Self::new(self.value + delta, self.min, self.max)
    }
}

impl Default for ExpandRate {
    fn default() -> Self {
        Self::new(Self::DEFAULT, Self::MIN, Self::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpansionState {
    #[default]
    Idle,
    Expanded,
}

impl ExpansionState {
    pub fn toggled(self) -> Self {
        match self {
            Self::Idle => Self::Expanded,
            Self::Expanded => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuspensionSource {
    Fullscreen,
    ScrolledOut,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Button click.
    Toggle,
    /// Wheel input, already scaled to a rate delta.
    AdjustRate(f64),
    Suspend(SuspensionSource),
    Resume(SuspensionSource),
    /// Nothing changed in the machine, but the page did.
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionMachine {
    intent: ExpansionState,
    reserved: Option<ExpansionState>,
    suspensions: BTreeSet<SuspensionSource>,
    rate: ExpandRate,
}

impl ExpansionMachine {
    pub fn new(rate: ExpandRate) -> Self {
        Self {
            intent: ExpansionState::Idle,
            reserved: None,
            suspensions: BTreeSet::new(),
            rate,
        }
    }

    /// The live state. Always Idle while suspended.
    pub fn intent(&self) -> ExpansionState {
        self.intent
    }

    /// Snapshot held while suspended, restored when the last source clears.
    pub fn reserved(&self) -> Option<ExpansionState> {
        self.reserved
    }

    /// What the user asked for, whether or not it is currently suspended.
    pub fn user_intent(&self) -> ExpansionState {
        self.reserved.unwrap_or(self.intent)
    }

    pub fn rate(&self) -> ExpandRate {
        self.rate
    }

    pub fn is_suspended(&self) -> bool {
        !self.suspensions.is_empty()
    }

    pub fn is_suspended_by(&self, source: SuspensionSource) -> bool {
        self.suspensions.contains(&source)
    }

    pub fn suspensions(&self) -> impl Iterator<Item = SuspensionSource> + '_ {
        self.suspensions.iter().copied()
    }

    /// Click and wheel are ignored while this holds.
    pub fn controls_disabled(&self) -> bool {
        self.is_suspended_by(SuspensionSource::Fullscreen)
    }

    pub fn is_effectively_expanded(&self) -> bool {
        self.intent == ExpansionState::Expanded && self.suspensions.is_empty()
    }

    /// Applies one transition. Returns whether any state changed.
    pub fn apply(&mut self, transition: Transition) -> bool {
        let before = self.clone();
        match transition {
            Transition::Toggle => {
                if self.controls_disabled() {
                    return false;
                }
                match self.reserved.as_mut() {
                    Some(reserved) => *reserved = reserved.toggled(),
                    None => self.intent = self.intent.toggled(),
                }
            }
            Transition::AdjustRate(delta) => {
                if self.controls_disabled() || !delta.is_finite() {
                    return false;
                }
                self.rate = self.rate.adjusted(delta);
            }
            Transition::Suspend(source) => {
                if self.suspensions.is_empty() {
                    self.reserved = Some(self.intent);
                    self.intent = ExpansionState::Idle;
                }
                self.suspensions.insert(source);
            }
            Transition::Resume(source) => {
                if self.suspensions.remove(&source) && self.suspensions.is_empty() {
                    self.intent = self.reserved.take().unwrap_or(self.intent);
                }
            }
            Transition::Refresh => {}
        }
        let changed = *self != before;
        trace!(?transition, changed, intent = ?self.intent, rate = self.rate.value, "transition");
        changed
    }
}

/// Result of one layout pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayoutOutcome {
    /// The video or a container is missing; the page was left untouched.
    Aborted,
    /// Heights cleared; expansion is not in effect.
    Cleared,
    /// Heights cleared but the video height could not be read.
    Unmeasured,
    /// `container` now has an explicit `height` in pixels.
    Applied { container: NodeId, height: f64 },
}

/// Re-derives container heights from the current page and machine state.
///
/// Both containers lose any explicit height first. When expanded, the
/// container currently holding the video gets it back: the cinematic one
/// grows to `h * rate`, the default one gets the `h * rate - h` margin. The
/// video's `top` is then pinned to zero. Values that did not change produce
/// no attribute mutation, so running this from an attribute observer on the
/// video settles.
pub fn recompute(
    page: &mut Page,
    machine: &ExpansionMachine,
    config: &ControllerConfig,
) -> Result<LayoutOutcome> {
    let video = page.query_selector(&config.video_selector)?;
    let cinematic = page.query_selector(&config.cinematic_container_selector)?;
    let default = page.query_selector(&config.default_container_selector)?;
    let (Some(video), Some(cinematic), Some(default)) = (video, cinematic, default) else {
        debug!(
            video = video.is_some(),
            cinematic = cinematic.is_some(),
            default = default.is_some(),
            "layout elements missing, skipping recompute"
        );
        return Ok(LayoutOutcome::Aborted);
    };

    page.set_style(cinematic, "height", "")?;
    page.set_style(default, "height", "")?;

    if !machine.is_effectively_expanded() {
        return Ok(LayoutOutcome::Cleared);
    }

    let Some(video_height) = video_height(page, video)? else {
        debug!("video height unreadable, leaving containers cleared");
        return Ok(LayoutOutcome::Unmeasured);
    };

    let cinematic_height = video_height * machine.rate().value();
    let margin_height = cinematic_height - video_height;
    let (container, height) = if page.contains(cinematic, video) {
        (cinematic, cinematic_height)
    } else {
        (default, margin_height)
    };
    page.set_style(container, "height", &format_px(height))?;
    page.set_style(video, "top", "0px")?;

    debug!(video_height, height, cinematic = container == cinematic, "applied expansion");
    Ok(LayoutOutcome::Applied { container, height })
}

fn video_height(page: &Page, video: NodeId) -> Result<Option<f64>> {
    let inline = page.style(video, "height")?;
    let height = parse_css_length(&inline)
        .or_else(|| page.attr(video, "height").as_deref().and_then(parse_css_length));
    Ok(height.filter(|height| *height >= 0.0))
}
