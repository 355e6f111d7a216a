use super::*;

use serde::Deserialize;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Payload {
    entities: Vec<Item>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    name: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[test]
fn parses_clean_json() {
    let raw = r#"{"entities": [{"name": "Acme", "confidence": 0.9}]}"#;
    let parsed: Payload = parse_model_json(raw).expect("clean JSON should parse");
    assert_eq!(parsed.entities.len(), 1);
    assert_eq!(parsed.entities[0].name, "Acme");
}

#[test]
fn strips_markdown_code_fences() {
    let raw = "```json\n{\"entities\": [{\"name\": \"Acme\"}]}\n```";
    let parsed: Payload = parse_model_json(raw).expect("fenced JSON should parse");
    assert_eq!(parsed.entities[0].name, "Acme");
}

#[test]
fn strips_bare_code_fences() {
    let raw = "```\n{\"entities\": []}\n```";
    let parsed: Payload = parse_model_json(raw).expect("fenced JSON should parse");
    assert!(parsed.entities.is_empty());
}

#[test]
fn repairs_unterminated_string() {
    let raw = r#"{"entities": [{"name": "Acme Corporat"#;
    let parsed: Payload = parse_model_json(raw).expect("should repair truncated string");
    assert_eq!(parsed.entities[0].name, "Acme Corporat");
}

#[test]
fn repairs_unbalanced_brackets() {
    let raw = r#"{"entities": [{"name": "Acme", "confidence": 0.9}"#;
    let parsed: Payload = parse_model_json(raw).expect("should balance brackets");
    assert_eq!(parsed.entities.len(), 1);
    assert_eq!(parsed.entities[0].confidence, Some(0.9));
}

#[test]
fn drops_trailing_incomplete_pair() {
    // Cut mid-key: balancing alone yields a key with no value, so the repair
    // falls back to dropping the fragment after the last comma.
    let raw = r#"{"entities": [{"name": "A"}, {"name": "B", "conf"#;
    let parsed: Payload = parse_model_json(raw).expect("should drop trailing fragment");
    let names: Vec<&str> = parsed.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[test]
fn repairs_dangling_separator() {
    let raw = r#"{"entities": [{"name": "A"},"#;
    let parsed: Payload = parse_model_json(raw).expect("should drop dangling comma");
    assert_eq!(parsed.entities.len(), 1);
}

#[test]
fn unrepairable_input_fails_with_preview() {
    let raw = "definitely not json ".repeat(50);
    let err = parse_model_json::<Payload>(&raw).expect_err("should fail");
    let message = err.to_string();
    assert!(message.contains("not valid JSON"));
    // The preview is truncated, not the full kilobyte of garbage.
    assert!(message.len() < 300);
}

#[test]
fn commas_inside_strings_are_not_cut_points() {
    let raw = r#"{"entities": [{"name": "Acme, Inc.", "confidence": 0.8}]}"#;
    let parsed: Payload = parse_model_json(raw).expect("commas in strings are data");
    assert_eq!(parsed.entities[0].name, "Acme, Inc.");
}

#[tokio::test]
async fn chat_client_parses_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "response_format": { "type": "json_object" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gpt-4o-mini-2024",
            "choices": [
                { "message": { "role": "assistant", "content": "{\"entities\": []}" } }
            ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })))
        .mount(&server)
        .await;

    let base = Url::parse(&format!("{}/", server.uri())).expect("mock server URL");
    let client = OpenAiChatClient::new(
        base,
        "test-key".to_string(),
        "gpt-4o-mini".to_string(),
        Duration::from_secs(5),
    )
    .expect("client should build");

    let response = client
        .complete_json(&CompletionRequest {
            system_prompt: "You extract entities.".to_string(),
            user_prompt: "Analyze this.".to_string(),
            max_tokens: 2000,
        })
        .await
        .expect("completion should succeed");

    assert_eq!(response.content, "{\"entities\": []}");
    assert_eq!(response.tokens_used, 15);
    assert_eq!(response.model, "gpt-4o-mini-2024");
    assert_eq!(response.provider, "openai");
}

#[tokio::test]
async fn chat_client_surfaces_http_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
        .mount(&server)
        .await;

    let base = Url::parse(&format!("{}/", server.uri())).expect("mock server URL");
    let client = OpenAiChatClient::new(
        base,
        "test-key".to_string(),
        "gpt-4o-mini".to_string(),
        Duration::from_secs(5),
    )
    .expect("client should build");

    let result = client
        .complete_json(&CompletionRequest {
            system_prompt: String::new(),
            user_prompt: "x".to_string(),
            max_tokens: 100,
        })
        .await;

    assert!(matches!(result, Err(KbError::LanguageModel(_))));
}

#[tokio::test]
async fn chat_client_rejects_empty_choices() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": []
        })))
        .mount(&server)
        .await;

    let base = Url::parse(&format!("{}/", server.uri())).expect("mock server URL");
    let client = OpenAiChatClient::new(
        base,
        "test-key".to_string(),
        "gpt-4o-mini".to_string(),
        Duration::from_secs(5),
    )
    .expect("client should build");

    let result = client
        .complete_json(&CompletionRequest {
            system_prompt: String::new(),
            user_prompt: "x".to_string(),
            max_tokens: 100,
        })
        .await;

    assert!(matches!(result, Err(KbError::LanguageModel(_))));
}
