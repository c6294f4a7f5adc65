//! Property tests for the pure reducer and classifier, driven by the oracle.

use chainview_core::commands::AgentConfig;
use chainview_core::{classify, clamp_weeks, reduce, SessionState, TickMessage, DEFAULT_WEEKS};
use chainview_sim::Oracle;
use proptest::prelude::*;

fn oracle_ticks(seed: u64, count: usize) -> Vec<TickMessage> {
    let mut oracle = Oracle::new(seed, "prop", AgentConfig::default());
    (0..count).map(|_| oracle.step()).collect()
}

fn state_with_history(seed: u64, count: usize) -> SessionState {
    let mut oracle = Oracle::new(seed, "prop", AgentConfig::default());
    let mut state = SessionState::new();
    for frame in std::iter::once(oracle.session_frame()).chain((0..count).map(|_| {
        serde_json::to_string(&oracle.step()).unwrap()
    })) {
        state = reduce(state, classify(&frame).unwrap());
    }
    state
}

proptest! {
    #[test]
    fn prop_ticks_appended_in_delivery_order(seed in any::<u64>(), count in 0usize..40) {
        let ticks = oracle_ticks(seed, count);
        let mut state = SessionState::new();
        for tick in &ticks {
            let frame = serde_json::to_string(tick).unwrap();
            state = reduce(state, classify(&frame).unwrap());
        }
        prop_assert_eq!(state.tick_history(), ticks.as_slice());
    }

    #[test]
    fn prop_duplicates_are_kept(seed in any::<u64>(), copies in 1usize..5) {
        let tick = oracle_ticks(seed, 1).remove(0);
        let frame = serde_json::to_string(&tick).unwrap();
        let mut state = SessionState::new();
        for _ in 0..copies {
            state = reduce(state, classify(&frame).unwrap());
        }
        prop_assert_eq!(state.tick_history().len(), copies);
    }

    #[test]
    fn prop_garbage_never_classifies(text in "[^{]*") {
        // Nothing without an opening brace is a JSON object.
        prop_assert!(classify(&text).is_err());
    }

    #[test]
    fn prop_objects_without_markers_are_malformed(
        keys in proptest::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..6)
    ) {
        prop_assume!(!keys.contains_key("agents") && !keys.contains_key("type"));
        let frame = serde_json::to_string(&keys).unwrap();
        prop_assert!(classify(&frame).is_err());
    }

    #[test]
    fn prop_malformed_leaves_state_unchanged(seed in any::<u64>(), count in 0usize..10, key in "[a-z]{1,8}") {
        prop_assume!(key != "agents" && key != "type");
        let before = state_with_history(seed, count);
        let frame = format!(r#"{{"{key}":1}}"#);
        let after = match classify(&frame) {
            Ok(message) => reduce(before.clone(), message),
            Err(_) => before.clone(),
        };
        prop_assert_eq!(after, before);
    }

    #[test]
    fn prop_start_always_clears(seed in any::<u64>(), count in 0usize..20) {
        let mut state = state_with_history(seed, count);
        state.begin_run();
        prop_assert!(state.tick_history().is_empty());
        prop_assert!(state.event_log().is_empty());
        prop_assert!(state.summary().is_none());
    }

    #[test]
    fn prop_weeks_always_positive(requested in any::<i64>()) {
        let weeks = clamp_weeks(requested);
        prop_assert!(weeks > 0);
        if requested <= 0 {
            prop_assert_eq!(weeks, DEFAULT_WEEKS);
        }
    }
}
