//! Integration tests for model discovery

use llm_chat_stream::backend::{BackendRegistry, HttpClients, ModelCatalog, Protocol, TlsPolicy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog() -> ModelCatalog {
    let clients = HttpClients::new(TlsPolicy::Verify, Duration::from_secs(1)).unwrap();
    ModelCatalog::new(clients, Arc::new(BackendRegistry::new()), Duration::from_secs(2))
}

#[tokio::test]
async fn test_ollama_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3:8b", "size": 4661224676u64},
                {"name": "llava:latest"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let models = catalog().list_models(Protocol::Ollama, &server.uri(), None).await;
    assert_eq!(models, vec!["llama3:8b", "llava:latest"]);
}

#[tokio::test]
async fn test_openai_models_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "qwen2-7b-instruct", "object": "model"},
                {"id": "mistral-7b", "object": "model"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = format!("{}/v1/", server.uri());
    let models = catalog().list_models(Protocol::LmStudio, &base_url, None).await;
    assert_eq!(models, vec!["qwen2-7b-instruct", "mistral-7b"]);
}

#[tokio::test]
async fn test_hugging_face_uses_configured_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let models = catalog()
        .list_models(Protocol::HuggingFace, &server.uri(), Some("hf_token"))
        .await;
    assert!(models.contains(&"minimaxai/minimax-m1-80k".to_string()));
}

#[tokio::test]
async fn test_failure_falls_back_to_configured_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let models = catalog().list_models(Protocol::Ollama, &server.uri(), None).await;
    assert!(models.is_empty());

    let models = catalog()
        .list_models(Protocol::LmStudio, "http://127.0.0.1:1/v1", None)
        .await;
    assert!(models.is_empty());
}

#[tokio::test]
async fn test_malformed_listing_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let models = catalog().list_models(Protocol::Ollama, &server.uri(), None).await;
    assert!(models.is_empty());
}
