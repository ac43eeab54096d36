//! Unit tests for the protocol registry

use llm_chat_stream::backend::{
    BackendRegistry, EndpointRule, Framing, ModelListing, ProbeMethod, Protocol, ProtocolDescriptor,
};
use llm_chat_stream::AppError;

#[test]
fn test_registry_holds_all_protocols() {
    let registry = BackendRegistry::new();
    assert_eq!(
        registry.protocols(),
        vec![Protocol::LmStudio, Protocol::Ollama, Protocol::HuggingFace]
    );
}

#[test]
fn test_descriptor_table() {
    let registry = BackendRegistry::new();

    let lm = registry.get(Protocol::LmStudio);
    assert_eq!(lm.default_base_url, "http://127.0.0.1:1234/v1");
    assert_eq!(lm.framing, Framing::ServerSentEvents);
    assert_eq!(lm.probe_method, ProbeMethod::Get);
    assert_eq!(lm.model_listing, ModelListing::OpenAiModels);
    assert!(!lm.requires_api_key);

    let ollama = registry.get(Protocol::Ollama);
    assert_eq!(ollama.default_base_url, "http://127.0.0.1:11434");
    assert_eq!(ollama.framing, Framing::NdJson);
    assert_eq!(ollama.endpoint, EndpointRule::Append("/api/chat"));

    let hf = registry.get(Protocol::HuggingFace);
    assert!(hf.requires_api_key);
    assert_eq!(hf.probe_method, ProbeMethod::ChatPost);
    assert_eq!(hf.endpoint, EndpointRule::Verbatim);
    assert_eq!(hf.max_context_tokens, 40_000);
}

#[test]
fn test_chat_endpoints() {
    let registry = BackendRegistry::new();

    assert_eq!(
        registry.get(Protocol::LmStudio).chat_endpoint("http://localhost:1234/v1/"),
        "http://localhost:1234/v1/chat/completions"
    );
    assert_eq!(
        registry.get(Protocol::Ollama).chat_endpoint("http://gpu-box:11434"),
        "http://gpu-box:11434/api/chat"
    );
    assert_eq!(
        registry
            .get(Protocol::HuggingFace)
            .chat_endpoint("https://example.test/custom/path"),
        "https://example.test/custom/path"
    );
}

#[test]
fn test_clamp_max_tokens() {
    let hf = ProtocolDescriptor::builtin(Protocol::HuggingFace);
    assert_eq!(hf.clamp_max_tokens(128_000), 40_000);
    assert_eq!(hf.clamp_max_tokens(8_000), 8_000);

    let ollama = ProtocolDescriptor::builtin(Protocol::Ollama);
    assert_eq!(ollama.clamp_max_tokens(40_000), 40_000);
}

#[test]
fn test_lookup_by_name() {
    let registry = BackendRegistry::new();

    for name in ["LM Studio", "lm_studio", "lmstudio", "OpenAI"] {
        assert_eq!(registry.lookup(name).unwrap().protocol, Protocol::LmStudio);
    }
    assert_eq!(registry.lookup("Ollama").unwrap().protocol, Protocol::Ollama);
    assert_eq!(registry.lookup("Hugging Face").unwrap().protocol, Protocol::HuggingFace);
    assert_eq!(registry.lookup("hf").unwrap().protocol, Protocol::HuggingFace);
}

#[test]
fn test_unknown_protocol_is_rejected() {
    let registry = BackendRegistry::new();
    match registry.lookup("gemini") {
        Err(AppError::UnknownProtocol(name)) => assert_eq!(name, "gemini"),
        other => panic!("expected unknown protocol error, got {:?}", other.map(|d| d.protocol)),
    }
}

#[test]
fn test_custom_registry_falls_back_to_builtin() {
    let mut ollama = ProtocolDescriptor::builtin(Protocol::Ollama);
    ollama.default_base_url = "http://10.0.0.5:11434".to_string();
    let registry = BackendRegistry::with_descriptors([ollama]);

    assert_eq!(registry.protocols(), vec![Protocol::Ollama]);
    assert_eq!(registry.get(Protocol::Ollama).default_base_url, "http://10.0.0.5:11434");
    assert_eq!(
        registry.get(Protocol::LmStudio).default_base_url,
        "http://127.0.0.1:1234/v1"
    );
}

#[test]
fn test_protocol_display_roundtrips_through_parse() {
    for protocol in Protocol::ALL {
        let parsed: Protocol = protocol.to_string().parse().unwrap();
        assert_eq!(parsed, protocol);
    }
}
