use tracing::trace;

use crate::dom::NodeId;
use crate::observer::{MutationObserverInit, ObserverId};
use crate::page::Page;

/// Calls `callback` whenever attributes of `node` change, once per delivered
/// batch. Which attribute changed is deliberately not passed on; callers
/// re-derive whatever they need from the page.
pub fn on_attribute_change(
    page: &mut Page,
    node: NodeId,
    mut callback: impl FnMut(&mut Page) + 'static,
) -> ObserverId {
    page.observe_mutations(node, MutationObserverInit::attributes_only(), move |page, records| {
        trace!(target: "subtitle_area::attribute_watch", records = records.len(), "attributes changed");
        callback(page);
    })
}
