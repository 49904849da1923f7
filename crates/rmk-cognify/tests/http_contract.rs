//! Contract tests for the Cognifier HTTP client against a mock server.

use rmk_cognify::client::Cognifier;
use rmk_cognify::{
    CognifyItem, CommunitySummaryRequest, GlobalOverviewRequest, HttpCognifier,
};
use rmk_core::Error;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn item(source_id: &str, content: &str) -> CognifyItem {
    CognifyItem {
        source_id: source_id.to_string(),
        source_table: "transcript_events".to_string(),
        content: content.to_string(),
        raw_data: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_cognify_batch_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cognify-batch"))
        .and(body_partial_json(json!({
            "items": [{"source_id": "ev1", "source_table": "transcript_events"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "source_id": "ev1",
            "entities": [
                {"name": "Acme", "type": "Entity", "description": "employer", "tags": ["company"]},
                {"name": "Bob", "type": "Entity"}
            ],
            "relations": [
                {"from_name": "alice", "to_name": "Acme", "type": "WORKS_AT"}
            ],
            "summary": "Alice works at Acme with Bob."
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri()).unwrap();
    let results = client
        .cognify_batch(&[item("ev1", "I work at Acme with Bob")])
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entities.len(), 2);
    assert_eq!(results[0].entities[0].name, "Acme");
    assert_eq!(results[0].relations[0].relation_type, "WORKS_AT");
    assert_eq!(results[0].summary, "Alice works at Acme with Bob.");
}

#[tokio::test]
async fn test_cognify_batch_server_error_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cognify-batch"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri()).unwrap();
    let err = client.cognify_batch(&[item("ev1", "x")]).await.unwrap_err();
    assert!(matches!(err, Error::CognifierUnavailable(_)));
}

#[tokio::test]
async fn test_cognify_batch_timeout_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cognify-batch"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri())
        .unwrap()
        .with_timeout(Duration::from_millis(100));
    let err = client.cognify_batch(&[item("ev1", "x")]).await.unwrap_err();
    assert!(matches!(err, Error::CognifierUnavailable(_)));
}

#[tokio::test]
async fn test_summarize_community() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/summarize-community"))
        .and(body_partial_json(json!({"community_name": "engineering"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "community_name": "engineering",
            "summary": "A tight-knit engineering group.",
            "confidence": 0.9
        })))
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri()).unwrap();
    let summary = client
        .summarize_community(&CommunitySummaryRequest {
            community_name: "engineering".to_string(),
            community_type: "department".to_string(),
            entities: vec!["alice".to_string(), "bob".to_string()],
            max_summary_length: 400,
        })
        .await
        .unwrap();
    assert_eq!(summary.summary, "A tight-knit engineering group.");
    assert_eq!(summary.confidence, Some(0.9));
}

#[tokio::test]
async fn test_summarize_global() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/summarize-global"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "namespace": "user_alice",
            "overview": "Work-centric memory with two communities.",
            "themes": ["work", "health"]
        })))
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri()).unwrap();
    let overview = client
        .summarize_global(&GlobalOverviewRequest {
            namespace: "user_alice".to_string(),
            community_summaries: vec!["engineering".to_string()],
            total_entities: 12,
        })
        .await
        .unwrap();
    assert_eq!(overview.themes, vec!["work", "health"]);
}

#[tokio::test]
async fn test_embed_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [0.25, -0.5, 0.75]
        })))
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri()).unwrap();
    let embedding = client.embed("Alice works at Acme").await.unwrap();
    assert_eq!(embedding, Some(vec![0.25, -0.5, 0.75]));
}

#[tokio::test]
async fn test_embed_degrades_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpCognifier::new(server.uri()).unwrap();
    let embedding = client.embed("text").await.unwrap();
    assert_eq!(embedding, None);
}
