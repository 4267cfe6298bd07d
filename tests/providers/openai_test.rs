//! OpenAI-compatible rule evaluator: wire format and live round-trip against a fake server.

use serde_json::json;

use channel_relay::providers::openai::{
    build_request, chat_completions_url, parse_response, OpenAiRuleEvaluator,
};
use channel_relay::routing::filter::{FilterAction, FilterError, RuleEvaluator};

use crate::fake_server::serve_once;

fn completion(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

#[test]
fn url_tolerates_trailing_slash() {
    assert_eq!(
        chat_completions_url("https://api.openai.com/v1/"),
        "https://api.openai.com/v1/chat/completions"
    );
    assert_eq!(
        chat_completions_url("http://localhost:1234/v1"),
        "http://localhost:1234/v1/chat/completions"
    );
}

#[test]
fn request_embeds_rule_prompt_and_text() {
    let request = build_request("gpt-4o-mini", "Skip advertisements.", "Buy now!");
    assert_eq!(request.model, "gpt-4o-mini");
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].role, "system");
    let system = request.messages[0].content.as_deref().unwrap_or_default();
    assert!(system.ends_with("Skip advertisements."));
    assert!(system.contains("forwarded or skipped"));
    assert_eq!(request.messages[1].role, "user");
    assert_eq!(request.messages[1].content.as_deref(), Some("Buy now!"));
}

#[test]
fn request_constrains_output_to_the_decision_schema() {
    let request = build_request("m", "p", "t");
    let value = match serde_json::to_value(&request) {
        Ok(value) => value,
        Err(err) => panic!("request should serialize: {err}"),
    };
    let format = &value["response_format"];
    assert_eq!(format["type"], "json_schema");
    assert_eq!(format["json_schema"]["name"], "filter_decision");
    assert_eq!(format["json_schema"]["strict"], true);
    assert_eq!(
        format["json_schema"]["schema"]["properties"]["action"]["enum"],
        json!(["FORWARD", "SKIP"])
    );
}

#[test]
fn parses_skip_and_forward_decisions() {
    let skip = parse_response(&completion(r#"{"action":"SKIP","reason":"advert"}"#));
    let skip = match skip {
        Ok(decision) => decision,
        Err(err) => panic!("skip should parse: {err}"),
    };
    assert_eq!(skip.action, FilterAction::Skip);
    assert_eq!(skip.reason, "advert");

    let forward = parse_response(&completion(" {\"action\":\"FORWARD\",\"reason\":\"news\"}\n"));
    assert!(forward.is_ok_and(|d| d.action == FilterAction::Forward));
}

#[test]
fn malformed_content_is_a_parse_error() {
    for body in [
        completion("I think this should be skipped"),
        completion(r#"{"action":"MAYBE","reason":"?"}"#),
        json!({ "choices": [] }).to_string(),
        json!({ "choices": [{ "message": { "role": "assistant", "content": null } }] }).to_string(),
        "not json".to_owned(),
    ] {
        assert!(
            matches!(parse_response(&body), Err(FilterError::Parse(_))),
            "body should not parse: {body}"
        );
    }
}

#[tokio::test]
async fn evaluator_posts_to_chat_completions_with_bearer_auth() {
    let (base, captured) =
        serve_once("200 OK", &completion(r#"{"action":"SKIP","reason":"promo"}"#)).await;
    let evaluator = OpenAiRuleEvaluator::new(
        &format!("{base}/v1"),
        "sk-test-key".to_owned(),
        "gpt-4o-mini".to_owned(),
    );

    let decision = match evaluator.evaluate("ads", "Skip ads.", "50% off today").await {
        Ok(decision) => decision,
        Err(err) => panic!("evaluation should succeed: {err}"),
    };
    assert_eq!(decision.action, FilterAction::Skip);
    assert_eq!(decision.reason, "promo");

    let request = match captured.await {
        Ok(request) => request,
        Err(err) => panic!("server should capture the request: {err}"),
    };
    assert_eq!(request.request_line, "POST /v1/chat/completions HTTP/1.1");
    assert!(request.headers.contains("authorization: bearer sk-test-key"));
    let body = request.body_json();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][1]["content"], "50% off today");
}

#[tokio::test]
async fn evaluator_maps_error_status_to_http_error() {
    let (base, _captured) = serve_once(
        "500 Internal Server Error",
        r#"{"error":{"message":"overloaded"}}"#,
    )
    .await;
    let evaluator = OpenAiRuleEvaluator::new(&base, "sk-test".to_owned(), "m".to_owned());

    let result = evaluator.evaluate("ads", "Skip ads.", "text").await;
    assert!(matches!(result, Err(FilterError::Http(_))));
}
