//! Filter pipeline: ordering, short-circuit and fail-open behavior.

use std::sync::Arc;

use channel_relay::routing::filter::{FilterAction, FilterPipeline, FilterRule};

use crate::support::StubEvaluator;

fn rules(names: &[&str]) -> Vec<FilterRule> {
    names
        .iter()
        .map(|name| FilterRule {
            name: (*name).to_owned(),
            prompt: format!("Skip {name}."),
        })
        .collect()
}

#[tokio::test]
async fn empty_text_forwards_without_evaluating() {
    let evaluator = Arc::new(StubEvaluator::new().skip("ads", "advert"));
    let pipeline = FilterPipeline::new(rules(&["ads"]), Arc::clone(&evaluator) as _);

    let verdict = pipeline.evaluate("   \n").await;
    assert_eq!(verdict.action, FilterAction::Forward);
    assert_eq!(verdict.rule, "none");
    assert_eq!(verdict.reason, "No text to analyze");
    assert!(evaluator.calls().is_empty());
}

#[tokio::test]
async fn no_rules_forwards_without_evaluating() {
    let evaluator = Arc::new(StubEvaluator::new());
    let pipeline = FilterPipeline::new(Vec::new(), Arc::clone(&evaluator) as _);

    let verdict = pipeline.evaluate("hello").await;
    assert!(!verdict.is_skip());
    assert_eq!(verdict.reason, "No filters configured");
    assert!(evaluator.calls().is_empty());
}

#[tokio::test]
async fn first_skip_wins_and_stops_evaluation() {
    let evaluator = Arc::new(
        StubEvaluator::new()
            .skip("ads", "looks like an advert")
            .skip("politics", "political"),
    );
    let pipeline = FilterPipeline::new(
        rules(&["spam", "ads", "politics"]),
        Arc::clone(&evaluator) as _,
    );

    let verdict = pipeline.evaluate("Buy now!").await;
    assert!(verdict.is_skip());
    assert_eq!(verdict.rule, "ads");
    assert_eq!(verdict.reason, "looks like an advert");
    assert_eq!(evaluator.rules_called(), vec!["spam", "ads"]);
}

#[tokio::test]
async fn all_passing_rules_forward() {
    let evaluator = Arc::new(StubEvaluator::new());
    let pipeline = FilterPipeline::new(rules(&["spam", "ads"]), Arc::clone(&evaluator) as _);

    let verdict = pipeline.evaluate("Weather is nice").await;
    assert_eq!(verdict.action, FilterAction::Forward);
    assert_eq!(verdict.rule, "all");
    assert_eq!(verdict.reason, "Passed all filters");
    assert_eq!(evaluator.rules_called(), vec!["spam", "ads"]);
}

#[tokio::test]
async fn evaluator_error_fails_open_and_continues() {
    let evaluator = Arc::new(StubEvaluator::new().error("spam").skip("ads", "advert"));
    let pipeline = FilterPipeline::new(rules(&["spam", "ads"]), Arc::clone(&evaluator) as _);

    let verdict = pipeline.evaluate("Buy now!").await;
    assert!(verdict.is_skip());
    assert_eq!(verdict.rule, "ads");
    assert_eq!(evaluator.rules_called(), vec!["spam", "ads"]);
}

#[tokio::test]
async fn only_failing_rules_still_forward() {
    let evaluator = Arc::new(StubEvaluator::new().error("spam"));
    let pipeline = FilterPipeline::new(rules(&["spam"]), Arc::clone(&evaluator) as _);

    let verdict = pipeline.evaluate("anything").await;
    assert_eq!(verdict.action, FilterAction::Forward);
    assert_eq!(verdict.rule, "all");
}

#[tokio::test]
async fn evaluator_receives_the_text_verbatim() {
    let evaluator = Arc::new(StubEvaluator::new());
    let pipeline = FilterPipeline::new(rules(&["spam"]), Arc::clone(&evaluator) as _);

    pipeline.evaluate("  spaced text  ").await;
    assert_eq!(
        evaluator.calls(),
        vec![("spam".to_owned(), "  spaced text  ".to_owned())]
    );
}
