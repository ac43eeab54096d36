//! Integration tests for streaming chat against mock backends

use futures::StreamExt;
use llm_chat_stream::backend::{BackendRegistry, HttpClients, Protocol, TlsPolicy};
use llm_chat_stream::chat::{
    check_model, collect_reply, Attachment, ChatClient, CheckStatus, GenerationRequest, StreamEnd,
    StreamEvent, Turn,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NDJSON_BODY: &str = "{\"message\":{\"content\":\"Hi\"}}\n{\"message\":{\"content\":\" there\"},\"done\":true}\n";
const SSE_BODY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n";

fn client() -> ChatClient {
    let clients = HttpClients::new(TlsPolicy::Verify, Duration::from_secs(2)).unwrap();
    ChatClient::new(clients, Arc::new(BackendRegistry::new())).with_idle_timeout(Some(Duration::from_secs(5)))
}

async fn events(client: &ChatClient, request: GenerationRequest) -> Vec<StreamEvent> {
    client.stream_chat(request).collect().await
}

/// Accept one connection, read the request, optionally write `response`,
/// then hold the socket open without sending anything else
async fn stalling_backend(response: Option<&'static [u8]>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16 * 1024];
        let _ = socket.read(&mut buf).await;
        if let Some(response) = response {
            socket.write_all(response).await.unwrap();
            socket.flush().await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    format!("http://{}", addr)
}

fn client_with_idle(idle: Option<Duration>) -> ChatClient {
    let clients = HttpClients::new(TlsPolicy::Verify, Duration::from_secs(2)).unwrap();
    ChatClient::new(clients, Arc::new(BackendRegistry::new())).with_idle_timeout(idle)
}

async fn last_request_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests.last().expect("no request received");
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn test_ollama_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON_BODY, "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::new(Protocol::Ollama, server.uri(), "llama3", "Hello")
        .with_system_prompt("Be brief.");
    let events = events(&client(), request).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("Hi".to_string()),
            StreamEvent::Delta(" there".to_string()),
            StreamEvent::End(StreamEnd::Done),
        ]
    );
}

#[tokio::test]
async fn test_lm_studio_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = format!("{}/v1/", server.uri());
    let request = GenerationRequest::new(Protocol::LmStudio, base_url, "qwen2", "Hello");
    let (reply, end) = collect_reply(client().stream_chat(request)).await;

    assert_eq!(reply, "Hi");
    assert_eq!(end, StreamEnd::Done);
}

#[tokio::test]
async fn test_hugging_face_uses_url_verbatim_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/novita/v3/openai/chat/completions"))
        .and(header("authorization", "Bearer hf_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = format!("{}/novita/v3/openai/chat/completions", server.uri());
    let request = GenerationRequest::new(Protocol::HuggingFace, base_url, "minimaxai/minimax-m1-80k", "Hello")
        .with_api_key("hf_secret");
    let (reply, end) = collect_reply(client().stream_chat(request)).await;

    assert_eq!(reply, "Hi");
    assert_eq!(end, StreamEnd::Done);
}

#[tokio::test]
async fn test_local_backends_send_no_authorization() {
    let server = MockServer::start().await;
    Mock::given(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON_BODY, "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::new(Protocol::Ollama, server.uri(), "llama3", "Hello").with_api_key("unused");
    let (reply, _) = collect_reply(client().stream_chat(request)).await;

    assert_eq!(reply, "Hi there");
}

#[tokio::test]
async fn test_request_body_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON_BODY, "application/x-ndjson"))
        .mount(&server)
        .await;

    let mut request = GenerationRequest::new(Protocol::Ollama, server.uri(), "llama3", "And now?")
        .with_system_prompt("System says hi.")
        .with_history(vec![
            Turn::user("First question"),
            Turn::assistant("First answer"),
            Turn::assistant(""),
        ]);
    request.sampling.temperature = 0.4;
    request.sampling.context_length = 500_000;
    let _ = events(&client(), request).await;

    let body = last_request_body(&server).await;
    assert_eq!(body["model"], "llama3");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 128_000);
    assert_eq!(body["top_p"].as_f64().map(|v| (v * 100.0).round()), Some(95.0));

    let roles: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(body["messages"][0]["content"], "System says hi.");
    assert_eq!(body["messages"][3]["content"], "And now?");
}

#[tokio::test]
async fn test_hugging_face_caps_max_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&server)
        .await;

    let mut request = GenerationRequest::new(Protocol::HuggingFace, server.uri(), "m", "Hello");
    request.sampling.context_length = 128_000;
    let _ = events(&client(), request).await;

    let body = last_request_body(&server).await;
    assert_eq!(body["max_tokens"], 40_000);
}

#[tokio::test]
async fn test_attachment_encoding_follows_framing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON_BODY, "application/x-ndjson"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client();
    let image = Attachment::png(vec![1, 2, 3]);

    let request = GenerationRequest::new(Protocol::Ollama, server.uri(), "llava", "What is this?")
        .with_attachment(image.clone());
    let _ = events(&client, request).await;
    let body = last_request_body(&server).await;
    assert_eq!(body["messages"][1]["images"][0], "AQID");

    let request = GenerationRequest::new(Protocol::LmStudio, server.uri(), "llava", "What is this?")
        .with_attachment(image);
    let _ = events(&client, request).await;
    let body = last_request_body(&server).await;
    let parts = body["messages"][1]["content"].as_array().unwrap();
    assert_eq!(parts[0], json!({"type": "text", "text": "What is this?"}));
    assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AQID");
}

#[tokio::test]
async fn test_error_status_yields_single_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest::new(Protocol::Ollama, server.uri(), "missing", "Hello");
    let events = events(&client(), request).await;

    assert_eq!(
        events,
        vec![StreamEvent::End(StreamEnd::Status {
            code: 404,
            body: "model not found".to_string()
        })]
    );

    let StreamEvent::End(end) = &events[0] else { unreachable!() };
    assert!(end.user_message().unwrap().contains("Status 404"));
    assert_eq!(
        end.diagnostic().unwrap(),
        "API Error: Status 404 - model not found"
    );
}

#[tokio::test]
async fn test_empty_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let request = GenerationRequest::new(Protocol::LmStudio, server.uri(), "m", "Hello");
    let events = events(&client(), request).await;

    assert_eq!(events, vec![StreamEvent::End(StreamEnd::Empty)]);
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let request = GenerationRequest::new(Protocol::Ollama, "http://127.0.0.1:1", "m", "Hello");
    let events = events(&client(), request).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::End(StreamEnd::Network(_)) => {}
        other => panic!("expected network error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_before_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(NDJSON_BODY, "application/x-ndjson")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let request = GenerationRequest::new(Protocol::Ollama, server.uri(), "m", "Hello");
    let stream = client().stream_chat_with_cancel(request, cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let events: Vec<_> = stream.collect().await;
    canceller.await.unwrap();

    assert_eq!(events, vec![StreamEvent::End(StreamEnd::Cancelled)]);
}

#[tokio::test]
async fn test_each_call_is_a_fresh_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON_BODY, "application/x-ndjson"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client();
    let request = GenerationRequest::new(Protocol::Ollama, server.uri(), "llama3", "Hello");
    let (first, _) = collect_reply(client.stream_chat(request.clone())).await;
    let (second, _) = collect_reply(client.stream_chat(request)).await;

    assert_eq!(first, "Hi there");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_check_model_classification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON_BODY, "application/x-ndjson"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = client();

    let ok = check_model(
        &client,
        GenerationRequest::new(Protocol::Ollama, server.uri(), "llama3", "ignored"),
    )
    .await;
    assert_eq!(ok.status, CheckStatus::Success);
    assert_eq!(ok.response, "Hi there");
    let body = last_request_body(&server).await;
    assert_eq!(body["messages"].as_array().unwrap().last().unwrap()["content"], "Hello");

    let empty = check_model(
        &client,
        GenerationRequest::new(Protocol::LmStudio, format!("{}/v1", server.uri()), "m", "ignored"),
    )
    .await;
    assert_eq!(empty.status, CheckStatus::EmptySuccess);

    let failed = check_model(
        &client,
        GenerationRequest::new(Protocol::HuggingFace, format!("{}/broken", server.uri()), "m", "ignored"),
    )
    .await;
    assert_eq!(failed.status, CheckStatus::Failure);
    assert!(failed.response.contains("Status 500"));
}

const STALLED_ERROR: &[u8] =
    b"HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\ncontent-length: 100\r\n\r\npartial";

#[tokio::test]
async fn test_cancel_while_error_body_stalls() {
    let base_url = stalling_backend(Some(STALLED_ERROR)).await;
    let cancel = CancellationToken::new();
    let request = GenerationRequest::new(Protocol::Ollama, base_url, "m", "Hello");
    let stream = client_with_idle(None).stream_chat_with_cancel(request, cancel.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });
    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
        .await
        .expect("stream did not end after cancellation");

    assert_eq!(events, vec![StreamEvent::End(StreamEnd::Cancelled)]);
}

#[tokio::test]
async fn test_stalled_error_body_reports_status() {
    let base_url = stalling_backend(Some(STALLED_ERROR)).await;
    let request = GenerationRequest::new(Protocol::Ollama, base_url, "m", "Hello");
    let stream = client_with_idle(Some(Duration::from_millis(200))).stream_chat(request);

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
        .await
        .expect("stream did not end after the idle timeout");

    assert_eq!(
        events,
        vec![StreamEvent::End(StreamEnd::Status {
            code: 500,
            body: String::new()
        })]
    );
}

#[tokio::test]
async fn test_silent_backend_times_out_waiting_for_headers() {
    let base_url = stalling_backend(None).await;
    let idle = Duration::from_millis(200);
    let request = GenerationRequest::new(Protocol::LmStudio, base_url, "m", "Hello");
    let stream = client_with_idle(Some(idle)).stream_chat(request);

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
        .await
        .expect("stream did not end after the idle timeout");

    assert_eq!(events, vec![StreamEvent::End(StreamEnd::Timeout { idle })]);
}

#[tokio::test]
async fn test_check_model_fails_on_silent_backend() {
    let base_url = stalling_backend(None).await;
    let request = GenerationRequest::new(Protocol::Ollama, base_url, "m", "ignored");

    let check = tokio::time::timeout(
        Duration::from_secs(2),
        check_model(&client_with_idle(Some(Duration::from_millis(200))), request),
    )
    .await
    .expect("health check did not finish");

    assert_eq!(check.status, CheckStatus::Failure);
    assert!(check.response.contains("stopped responding"));
}
