use tracing::debug;

use crate::dom::NodeId;
use crate::expansion::ExpansionState;
use crate::page::{EventTarget, Page};
use crate::Result;

const INDICATOR_IDLE_Y: &str = "60%";
const INDICATOR_EXPANDED_Y: &str = "80%";

/// The toggle button hosted in the player controls bar.
///
/// Click toggles expansion, the wheel fine-tunes the rate. The icon is a
/// rounded rectangle (the player) with a horizontal line whose height shows
/// the user's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAffordance {
    button: NodeId,
    indicator: NodeId,
}

impl ControlAffordance {
    /// Builds the button and prepends it to `anchor`.
    ///
    /// `on_wheel` receives the raw `deltaY`. The default scroll is prevented
    /// unless the button is disabled, in which case the wheel is left to the
    /// page.
    pub fn install(
        page: &mut Page,
        anchor: NodeId,
        button_id: &str,
        mut on_click: impl FnMut(&mut Page) + 'static,
        mut on_wheel: impl FnMut(&mut Page, f64) + 'static,
    ) -> Result<Self> {
        let affordance = Self::build(page, button_id)?;
        let button = affordance.button;

        page.add_event_listener(EventTarget::Node(button), "click", move |page, _| {
            on_click(page);
        });
        page.add_event_listener(EventTarget::Node(button), "wheel", move |page, event| {
            if page.is_disabled(button) {
                return;
            }
            event.prevent_default();
            on_wheel(page, event.delta_y);
        });

        page.prepend_child(anchor, button)?;
        debug!(button_id, "toggle button installed");
        Ok(affordance)
    }

    fn build(page: &mut Page, button_id: &str) -> Result<Self> {
        let button = page.create_element("button");
        page.set_attribute(button, "id", button_id)?;
        page.set_style(button, "width", "48px")?;
        page.set_style(button, "height", "100%")?;
        page.set_style(button, "border", "none")?;
        page.set_style(button, "backgroundColor", "transparent")?;

        let svg = page.create_svg_element("svg");
        page.set_style(svg, "border", "none")?;
        page.set_attribute(svg, "width", "100%")?;
        page.set_attribute(svg, "height", "100%")?;

        let frame = page.create_svg_element("rect");
        for (name, value) in [
            ("x", "20%"),
            ("y", "30%"),
            ("rx", "5%"),
            ("ry", "5%"),
            ("width", "60%"),
            ("height", "40%"),
            ("fill", "none"),
            ("stroke", "white"),
            ("stroke-width", "2"),
        ] {
            page.set_attribute(frame, name, value)?;
        }

        let indicator = page.create_svg_element("line");
        for (name, value) in [
            ("x1", "30%"),
            ("y1", INDICATOR_IDLE_Y),
            ("x2", "70%"),
            ("y2", INDICATOR_IDLE_Y),
            ("stroke", "white"),
            ("stroke-width", "2"),
        ] {
            page.set_attribute(indicator, name, value)?;
        }

        page.append_child(svg, frame)?;
        page.append_child(svg, indicator)?;
        page.append_child(button, svg)?;
        Ok(Self { button, indicator })
    }

    /// Recovers a previously installed button by id.
    pub fn find(page: &Page, button_id: &str) -> Option<Self> {
        let button = page.by_id(button_id)?;
        let svg = page
            .children(button)
            .into_iter()
            .find(|child| page.tag_name(*child).as_deref() == Some("svg"))?;
        let indicator = page
            .children(svg)
            .into_iter()
            .find(|child| page.tag_name(*child).as_deref() == Some("line"))?;
        Some(Self { button, indicator })
    }

    pub fn button(&self) -> NodeId {
        self.button
    }

    pub fn indicator(&self) -> NodeId {
        self.indicator
    }

    pub fn show_intent(&self, page: &mut Page, intent: ExpansionState) -> Result<()> {
        let y = match intent {
            ExpansionState::Idle => INDICATOR_IDLE_Y,
            ExpansionState::Expanded => INDICATOR_EXPANDED_Y,
        };
        if page.attr(self.indicator, "y1").as_deref() == Some(y)
            && page.attr(self.indicator, "y2").as_deref() == Some(y)
        {
            return Ok(());
        }
        page.set_attribute(self.indicator, "y1", y)?;
        page.set_attribute(self.indicator, "y2", y)
    }

    pub fn set_disabled(&self, page: &mut Page, disabled: bool) -> Result<()> {
        match (disabled, page.is_disabled(self.button)) {
            (true, false) => page.set_attribute(self.button, "disabled", ""),
            (false, true) => page.remove_attribute(self.button, "disabled"),
            _ => Ok(()),
        }
    }

    pub fn is_disabled(&self, page: &Page) -> bool {
        page.is_disabled(self.button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn controls_page() -> Result<(Page, NodeId)> {
        let page = Page::from_html(
            "<div class='ytp-right-controls'><button class='ytp-settings-button'></button></div>",
        )?;
        let anchor = page.select_one(".ytp-right-controls")?;
        Ok((page, anchor))
    }

    #[test]
    fn button_is_prepended_with_icon() -> Result<()> {
        let (mut page, anchor) = controls_page()?;
        let affordance = ControlAffordance::install(&mut page, anchor, "ExpandAreaToggleButton", |_| {}, |_, _| {})?;

        assert_eq!(page.children(anchor).first(), Some(&affordance.button()));
        let button = page.select_one("#ExpandAreaToggleButton")?;
        assert_eq!(button, affordance.button());
        assert_eq!(page.style(button, "width")?, "48px");
        assert_eq!(page.style(button, "background-color")?, "transparent");
        assert_eq!(page.query_selector_all("#ExpandAreaToggleButton svg rect")?.len(), 1);
        assert_eq!(page.attr(affordance.indicator(), "y1").as_deref(), Some("60%"));
        assert_eq!(ControlAffordance::find(&page, "ExpandAreaToggleButton"), Some(affordance));
        Ok(())
    }

    #[test]
    fn indicator_and_disabled_state_follow_calls() -> Result<()> {
        let (mut page, anchor) = controls_page()?;
        let affordance = ControlAffordance::install(&mut page, anchor, "toggle", |_| {}, |_, _| {})?;

        affordance.show_intent(&mut page, ExpansionState::Expanded)?;
        assert_eq!(page.attr(affordance.indicator(), "y2").as_deref(), Some("80%"));
        affordance.show_intent(&mut page, ExpansionState::Idle)?;
        assert_eq!(page.attr(affordance.indicator(), "y1").as_deref(), Some("60%"));

        affordance.set_disabled(&mut page, true)?;
        assert!(affordance.is_disabled(&page));
        affordance.set_disabled(&mut page, false)?;
        assert!(!affordance.is_disabled(&page));
        Ok(())
    }

    #[test]
    fn wheel_is_consumed_only_while_enabled() -> Result<()> {
        let (mut page, anchor) = controls_page()?;
        let deltas = Rc::new(RefCell::new(Vec::new()));
        let clicks = Rc::new(Cell::new(0u32));
        let sink = deltas.clone();
        let tick = clicks.clone();
        let affordance = ControlAffordance::install(
            &mut page,
            anchor,
            "toggle",
            move |_| tick.set(tick.get() + 1),
            move |_, delta| sink.borrow_mut().push(delta),
        )?;

        assert!(page.wheel("#toggle", -500.0)?);
        page.click("#toggle")?;
        assert_eq!(page.scroll_y(), 0.0);

        affordance.set_disabled(&mut page, true)?;
        assert!(!page.wheel("#toggle", 300.0)?);
        page.click("#toggle")?;
        assert_eq!(page.scroll_y(), 300.0);

        assert_eq!(*deltas.borrow(), vec![-500.0]);
        assert_eq!(clicks.get(), 1);
        Ok(())
    }
}
