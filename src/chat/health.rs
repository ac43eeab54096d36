//! End-to-end model health check

use serde::Serialize;
use tracing::info;

use crate::chat::event::StreamEnd;
use crate::chat::stream::{collect_reply, ChatClient};
use crate::chat::types::GenerationRequest;

/// Prompt sent by the health check
pub const CHECK_PROMPT: &str = "Hello";

/// Classification of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    /// Content received, no error
    Success,
    /// No content, but no error either
    EmptySuccess,
    Failure,
}

/// Outcome of [`check_model`]
#[derive(Debug, Clone, Serialize)]
pub struct ModelCheck {
    pub status: CheckStatus,
    /// Concatenated reply, or the user-facing error text
    pub response: String,
}

/// Run one short generation through the full streaming path and classify it.
///
/// `request` supplies the backend, model and credentials; its prompt and
/// history are replaced by a fixed trivial prompt.
pub async fn check_model(client: &ChatClient, request: GenerationRequest) -> ModelCheck {
    let model = request.model.clone();
    let request = GenerationRequest {
        prompt: CHECK_PROMPT.to_string(),
        history: vec![],
        attachment: None,
        ..request
    };

    let (reply, end) = collect_reply(client.stream_chat(request)).await;
    let check = classify(reply, &end);

    info!(model = %model, status = ?check.status, "Model test completed");
    check
}

fn classify(reply: String, end: &StreamEnd) -> ModelCheck {
    if end.is_error() || *end == StreamEnd::Cancelled {
        let message = end.user_message().unwrap_or_default();
        return ModelCheck {
            status: CheckStatus::Failure,
            response: if reply.is_empty() {
                message
            } else {
                format!("{}{}", reply, message)
            },
        };
    }

    if reply.is_empty() {
        ModelCheck {
            status: CheckStatus::EmptySuccess,
            response: "No content received.".to_string(),
        }
    } else {
        ModelCheck {
            status: CheckStatus::Success,
            response: reply,
        }
    }
}
