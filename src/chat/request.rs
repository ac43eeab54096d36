//! Wire format of chat requests and their assembly from a `GenerationRequest`

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::backend::protocol::{Framing, ProtocolDescriptor};
use crate::chat::types::{Attachment, GenerationRequest, Role, Turn};

/// Chat message as sent to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Base64 images, NDJSON backends only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Plain text, or content parts for messages carrying an image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// Streaming chat completion request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

impl ChatMessage {
    fn from_parts(role: Role, content: &str, attachment: Option<&Attachment>, framing: Framing) -> Self {
        let Some(attachment) = attachment else {
            return Self {
                role,
                content: MessageContent::Text(content.to_string()),
                images: None,
            };
        };

        let encoded = STANDARD.encode(&attachment.data);
        match framing {
            Framing::NdJson => Self {
                role,
                content: MessageContent::Text(content.to_string()),
                images: Some(vec![encoded]),
            },
            Framing::ServerSentEvents => Self {
                role,
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: content.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", attachment.mime_type, encoded),
                        },
                    },
                ]),
                images: None,
            },
        }
    }

    fn from_turn(turn: &Turn, framing: Framing) -> Self {
        Self::from_parts(turn.role, &turn.content, turn.attachment.as_ref(), framing)
    }
}

/// Build the wire request: system turn, history, then the new user turn
pub fn build_chat_request(request: &GenerationRequest, descriptor: &ProtocolDescriptor) -> ChatCompletionRequest {
    let framing = descriptor.framing;
    let mut messages = Vec::with_capacity(request.history.len() + 2);

    messages.push(ChatMessage::from_parts(Role::System, &request.system_prompt, None, framing));
    messages.extend(
        request
            .history
            .iter()
            .filter(|turn| turn.is_sendable())
            .map(|turn| ChatMessage::from_turn(turn, framing)),
    );
    messages.push(ChatMessage::from_parts(
        Role::User,
        &request.prompt,
        request.attachment.as_ref(),
        framing,
    ));

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        max_tokens: descriptor.clamp_max_tokens(request.sampling.context_length),
        temperature: request.sampling.temperature,
        top_p: request.sampling.top_p,
        stream: true,
    }
}
