//! The two independent signals that suspend expansion: the document entering
//! fullscreen, and the expandable region scrolling fully out of view.

use tracing::debug;

use crate::page::{EventTarget, Page};
use crate::resolver::{ElementWait, wait_for_elements};
use crate::Result;

/// Reports `true` when a fullscreen element becomes set and `false` when it
/// clears, for every `fullscreenchange` on the document.
pub fn watch_fullscreen(page: &mut Page, mut on_change: impl FnMut(&mut Page, bool) + 'static) {
    page.add_event_listener(EventTarget::Document, "fullscreenchange", move |page, _| {
        let active = page.fullscreen_element().is_some();
        debug!(active, "fullscreen changed");
        on_change(page, active);
    });
}

/// Once `selector` resolves, reports `true` when the first matching element
/// is entirely outside the viewport and `false` when any of it is visible.
/// The first report arrives as soon as observation starts.
pub fn watch_scroll_out(
    page: &mut Page,
    selector: &str,
    on_change: impl FnMut(&mut Page, bool) + 'static,
) -> Result<ElementWait> {
    let wait = wait_for_elements(page, selector)?;
    let target_selector = selector.to_string();
    wait.then(page, move |page, nodes| {
        let Some(&region) = nodes.first() else {
            return;
        };
        let mut on_change = on_change;
        let observed = page.observe_intersection(region, move |page, entries| {
            for entry in entries {
                let scrolled_out = !entry.is_intersecting;
                debug!(scrolled_out, ratio = entry.intersection_ratio, "intersection changed");
                on_change(page, scrolled_out);
            }
        });
        if let Err(err) = observed {
            debug!(selector = %target_selector, error = %err, "could not start intersection observer");
        }
    });
    Ok(wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<bool>>>, impl FnMut(&mut Page, bool) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |_: &mut Page, value: bool| sink.borrow_mut().push(value))
    }

    #[test]
    fn fullscreen_reports_enter_and_exit() -> Result<()> {
        let mut page = Page::from_html("<div id='movie_player'></div>")?;
        let player = page.select_one("#movie_player")?;
        let (seen, on_change) = recorder();
        watch_fullscreen(&mut page, on_change);

        page.request_fullscreen(player)?;
        page.exit_fullscreen()?;
        assert_eq!(*seen.borrow(), vec![true, false]);
        Ok(())
    }

    #[test]
    fn scroll_out_starts_once_region_appears() -> Result<()> {
        let mut page = Page::from_html("<div id='columns'></div>")?;
        let (seen, on_change) = recorder();
        let wait = watch_scroll_out(&mut page, "#full-bleed-container", on_change)?;
        assert!(!wait.is_resolved());
        assert_eq!(page.intersection_observer_count(), 0);

        page.insert_html_into("#columns", "<div id='full-bleed-container'></div>")?;
        assert_eq!(page.intersection_observer_count(), 1);
        assert_eq!(*seen.borrow(), vec![false]);

        let region = page.select_one("#full-bleed-container")?;
        page.set_intersection_ratio(region, 0.0)?;
        page.set_intersection_ratio(region, 0.3)?;
        assert_eq!(*seen.borrow(), vec![false, true, false]);
        Ok(())
    }
}
