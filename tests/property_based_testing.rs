//! Property-based tests for result recovery, interpretation and gating.
//!
//! These use proptest to check invariants that must hold for any model
//! output or feedback text, not just the handful of cases in unit tests.

mod helpers;

use feedback_triage::extraction::interpreter::interpret;
use feedback_triage::extraction::models::ServiceCategory;
use feedback_triage::extraction::{recover, Recovery};
use feedback_triage::{MatchPolicy, MockInferenceClient};
use helpers::fixtures::{submission, Harness};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

prop_compose! {
    fn arb_title()(title in "[A-Za-z][A-Za-z0-9 ]{0,30}") -> String {
        title.trim().to_string()
    }
}

prop_compose! {
    fn arb_finding()(
        titles in prop::collection::vec(arb_title(), 1..5),
        description in "[A-Za-z0-9 .]{0,80}",
        category in prop::sample::select(vec!["ATM", "OnlineBanking", "CoreBanking"]),
        confidence in prop::sample::select(vec![0.0f64, 0.25, 0.5, 0.75, 0.9, 1.0]),
    ) -> Map<String, Value> {
        let value = json!({
            "titles": titles,
            "description": description,
            "category": category,
            "confidence_score": confidence,
            "resolution": "Investigate and follow up with the customer",
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }
}

prop_compose! {
    fn arb_chatter()(chatter in "[A-Za-z ,.:]{0,60}") -> String {
        chatter
    }
}

proptest! {
    #[test]
    fn recover_never_panics(raw in any::<String>()) {
        let _ = recover(&raw);
    }

    #[test]
    fn recover_finds_object_inside_chatter_and_fences(
        finding in arb_finding(),
        before in arb_chatter(),
        after in arb_chatter(),
    ) {
        let raw = format!(
            "{before}\n```json\n{}\n```\n{after}",
            serde_json::to_string_pretty(&finding).unwrap()
        );
        prop_assert_eq!(recover(&raw), Recovery::Object(finding));
    }

    #[test]
    fn recover_repairs_missing_closing_brace(finding in arb_finding()) {
        let full = serde_json::to_string(&finding).unwrap();
        let truncated = full.strip_suffix('}').unwrap();
        prop_assert_eq!(recover(truncated), Recovery::Object(finding));
    }

    #[test]
    fn joined_titles_split_in_order(titles in prop::collection::vec(arb_title(), 1..6)) {
        let object = match json!({
            "title": titles.join(", "),
            "description": "shared",
            "category": "ATM",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let (finding, candidates) = interpret(&object, ServiceCategory::CoreBanking).unwrap();
        let split: Vec<String> = candidates.iter().map(|c| c.title.clone()).collect();
        let expected: Vec<String> = titles.into_iter().filter(|t| !t.is_empty()).collect();

        prop_assert_eq!(&split, &expected);
        prop_assert_eq!(finding.titles, expected);
        prop_assert!(candidates.iter().all(|c| c.description == "shared"));
        prop_assert!(candidates.iter().all(|c| c.category == ServiceCategory::Atm));
    }

    #[test]
    fn confidence_is_always_within_unit_range(raw in any::<f64>()) {
        let object = match json!({ "title": "Anything", "confidence_score": raw }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let (finding, _) = interpret(&object, ServiceCategory::Atm).unwrap();
        prop_assert!((0.0..=1.0).contains(&finding.confidence_score));
    }

    #[test]
    fn match_fragment_never_exceeds_limit(text in any::<String>(), limit in 1usize..80) {
        let policy = MatchPolicy { fragment_chars: limit, limit: 5 };
        let fragment = policy.fragment(&text);
        prop_assert!(fragment.chars().count() <= limit);
        prop_assert!(text.starts_with(fragment.as_str()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn high_ratings_never_prompt_for_issues(
        text in "[A-Za-z ]{10,120}",
        rating in 4i32..=5,
    ) {
        prop_assume!(text.trim().chars().count() >= 10);

        let harness = Harness::new(MockInferenceClient::always("null"));
        let outcome = tokio_test::block_on(
            harness
                .pipeline
                .submit_feedback(submission(ServiceCategory::Atm, &text, rating)),
        )
        .unwrap();

        prop_assert!(outcome.issue_ids.is_empty());
        let prompts = harness.client.prompts();
        prop_assert_eq!(prompts.len(), 1);
        prop_assert!(!prompts[0].contains("banking issue detection expert"));
    }
}
