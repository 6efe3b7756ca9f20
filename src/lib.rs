//! Reactive layout controller that reserves a subtitle margin below an
//! embedded video player.
//!
//! The controller runs against a [`Page`], a deterministic single-threaded
//! host document with mutation observers, intersection observers, a
//! fullscreen state, timers and a key-value storage. It locates the player
//! elements whenever the host page happens to render them, installs a toggle
//! button, and keeps the container heights in sync with the video height,
//! the user's intent and the current suspension sources.

use std::error::Error as StdError;
use std::fmt;

mod affordance;
mod attribute_watch;
mod config;
mod controller;
mod dom;
mod expansion;
mod html;
mod observer;
mod page;
mod resolver;
mod selector;
mod storage;
mod style;
mod visibility;

pub use affordance::ControlAffordance;
pub use attribute_watch::on_attribute_change;
pub use config::ControllerConfig;
pub use controller::{ControllerHandle, ControllerSnapshot, install};
pub use dom::NodeId;
pub use expansion::{
    ExpandRate, ExpansionMachine, ExpansionState, LayoutOutcome, SuspensionSource, Transition,
    recompute,
};
pub use observer::{
    IntersectionEntry, MutationKind, MutationObserverInit, MutationRecord, ObserverId,
};
pub use page::{EventState, EventTarget, Page, PendingTimer};
pub use resolver::{ElementWait, Subscription, WatchMode, wait_for_elements, watch};
pub use storage::{FileStorage, MemoryStorage, ParameterStore, Storage};
pub use visibility::{watch_fullscreen, watch_scroll_out};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    UnsupportedSelector(String),
    SelectorNotFound(String),
    Runtime(String),
    Config(String),
    Storage(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl StdError for Error {}
