use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseError, TestCaseResult};
use subtitle_area::{
    ControllerConfig, ExpandRate, ExpansionMachine, ExpansionState, Page, SuspensionSource,
    Transition, install, recompute,
};

const EXPANSION_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/expansion_property_test.txt";
const DEFAULT_EXPANSION_PROPTEST_CASES: u32 = 128;

const PLAYER_HTML: &str = r#"
<div id="full-bleed-container"></div>
<div id="player-container-inner">
  <div id="movie_player">
    <video class="video-stream html5-main-video" style="height: 500px; top: 0px;"></video>
    <div class="ytp-right-controls"></div>
  </div>
</div>
"#;

fn expansion_proptest_cases() -> u32 {
    std::env::var("SUBTITLE_AREA_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_EXPANSION_PROPTEST_CASES)
}

fn fail(err: subtitle_area::Error) -> TestCaseError {
    TestCaseError::fail(format!("{err:?}"))
}

fn source_strategy() -> BoxedStrategy<SuspensionSource> {
    prop_oneof![
        Just(SuspensionSource::Fullscreen),
        Just(SuspensionSource::ScrolledOut),
    ]
    .boxed()
}

fn transition_strategy() -> BoxedStrategy<Transition> {
    prop_oneof![
        4 => Just(Transition::Toggle),
        3 => (-3_000.0f64..3_000.0).prop_map(|delta_y| Transition::AdjustRate(delta_y * 0.0001)),
        2 => source_strategy().prop_map(Transition::Suspend),
        2 => source_strategy().prop_map(Transition::Resume),
        1 => Just(Transition::Refresh),
    ]
    .boxed()
}

#[derive(Clone, Debug)]
enum PageAction {
    Click,
    Wheel(f64),
    EnterFullscreen,
    ExitFullscreen,
    ScrollOut,
    ScrollIn(f64),
    ResizeVideo(u32),
}

fn page_action_strategy() -> BoxedStrategy<PageAction> {
    prop_oneof![
        4 => Just(PageAction::Click),
        3 => (-2_000.0f64..2_000.0).prop_map(PageAction::Wheel),
        1 => Just(PageAction::EnterFullscreen),
        1 => Just(PageAction::ExitFullscreen),
        1 => Just(PageAction::ScrollOut),
        1 => (0.01f64..=1.0).prop_map(PageAction::ScrollIn),
        2 => (100u32..1_200).prop_map(PageAction::ResizeVideo),
    ]
    .boxed()
}

fn run_page_action(page: &mut Page, action: &PageAction) -> subtitle_area::Result<()> {
    match action {
        PageAction::Click => page.click("#ExpandAreaToggleButton"),
        PageAction::Wheel(delta_y) => page.wheel("#ExpandAreaToggleButton", *delta_y).map(|_| ()),
        PageAction::EnterFullscreen => {
            let player = page.select_one("#movie_player")?;
            page.request_fullscreen(player)
        }
        PageAction::ExitFullscreen => page.exit_fullscreen(),
        PageAction::ScrollOut => {
            let region = page.select_one("#full-bleed-container")?;
            page.set_intersection_ratio(region, 0.0)
        }
        PageAction::ScrollIn(ratio) => {
            let region = page.select_one("#full-bleed-container")?;
            page.set_intersection_ratio(region, *ratio)
        }
        PageAction::ResizeVideo(height) => {
            let video = page.select_one("video")?;
            page.set_style(video, "height", &format!("{height}px"))
        }
    }
}

fn assert_invariant(machine: &ExpansionMachine) -> TestCaseResult {
    let expected = machine.intent() == ExpansionState::Expanded
        && !machine.is_suspended_by(SuspensionSource::Fullscreen)
        && !machine.is_suspended_by(SuspensionSource::ScrolledOut);
    prop_assert_eq!(machine.is_effectively_expanded(), expected);
    prop_assert!(!(machine.is_suspended() && machine.intent() == ExpansionState::Expanded));
    let rate = machine.rate().value();
    prop_assert!((1.0..=1.3).contains(&rate), "rate {} escaped bounds", rate);
    Ok(())
}

fn assert_page_sequence_keeps_layout_consistent(actions: &[PageAction]) -> TestCaseResult {
    let mut page = Page::from_html(PLAYER_HTML).map_err(fail)?;
    let handle = install(&mut page, ControllerConfig::default()).map_err(fail)?;
    let default = page.select_one("#player-container-inner").map_err(fail)?;
    let cinematic = page.select_one("#full-bleed-container").map_err(fail)?;

    for (step, action) in actions.iter().enumerate() {
        run_page_action(&mut page, action)
            .map_err(|err| TestCaseError::fail(format!("step {step} {action:?}: {err:?}")))?;

        let snapshot = handle.snapshot(&page);
        assert_invariant(&handle.machine())?;
        prop_assert_eq!(snapshot.button_disabled, snapshot.fullscreen);

        let default_height = page.style(default, "height").map_err(fail)?;
        let cinematic_height = page.style(cinematic, "height").map_err(fail)?;
        prop_assert_eq!(cinematic_height, "");
        prop_assert_eq!(
            !default_height.is_empty(),
            snapshot.effective_expanded,
            "step {}: {:?} left height {:?}",
            step,
            action,
            default_height
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: expansion_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(EXPANSION_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn clamping_lands_inside_and_is_identity_inside(value in -10.0f64..10.0) {
        let rate = ExpandRate::new(value, 1.0, 1.3).value();
        prop_assert!((1.0..=1.3).contains(&rate));
        if (1.0..=1.3).contains(&value) {
            prop_assert_eq!(rate, value);
        }
    }

    #[test]
    fn recompute_twice_equals_recompute_once(
        rate in 1.0f64..=1.3,
        height in 1u32..2_000,
        cinematic in any::<bool>(),
        expanded in any::<bool>(),
    ) {
        let video = format!(
            r#"<video class="video-stream html5-main-video" style="height: {height}px;"></video>"#
        );
        let html = if cinematic {
            format!(r#"<div id="full-bleed-container">{video}</div><div id="player-container-inner"></div>"#)
        } else {
            format!(r#"<div id="full-bleed-container"></div><div id="player-container-inner">{video}</div>"#)
        };
        let mut page = Page::from_html(&html).map_err(fail)?;
        let config = ControllerConfig::default();
        let mut machine = ExpansionMachine::new(ExpandRate::new(rate, 1.0, 1.3));
        if expanded {
            machine.apply(Transition::Toggle);
        }

        let first = recompute(&mut page, &machine, &config).map_err(fail)?;
        let once = page.dump_dom("#player-container-inner").map_err(fail)?
            + &page.dump_dom("#full-bleed-container").map_err(fail)?;
        let second = recompute(&mut page, &machine, &config).map_err(fail)?;
        let twice = page.dump_dom("#player-container-inner").map_err(fail)?
            + &page.dump_dom("#full-bleed-container").map_err(fail)?;
        prop_assert_eq!(first, second);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn invariant_holds_after_every_transition(transitions in vec(transition_strategy(), 1..=40)) {
        let mut machine = ExpansionMachine::new(ExpandRate::default());
        for transition in transitions {
            machine.apply(transition);
            assert_invariant(&machine)?;
        }
    }

    #[test]
    fn fullscreen_round_trip_restores_prior_state(
        prefix in vec(transition_strategy(), 0..=20),
    ) {
        let mut machine = ExpansionMachine::new(ExpandRate::default());
        for transition in prefix {
            machine.apply(transition);
        }
        prop_assume!(!machine.is_suspended_by(SuspensionSource::Fullscreen));

        let before = machine.clone();
        machine.apply(Transition::Suspend(SuspensionSource::Fullscreen));
        machine.apply(Transition::Resume(SuspensionSource::Fullscreen));
        prop_assert_eq!(machine, before);
    }

    #[test]
    fn page_driven_sequences_keep_layout_consistent(
        actions in vec(page_action_strategy(), 1..=24),
    ) {
        assert_page_sequence_keeps_layout_consistent(&actions)?;
    }
}
