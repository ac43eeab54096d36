//! Chat module - conversation model, request assembly, stream decoding and the client

pub mod decode;
pub mod error_log;
pub mod event;
pub mod health;
pub mod request;
pub mod stream;
pub mod types;

pub use decode::{decode_body, DecodeOptions, FrameDecoder, LineDecoder, LineOutcome};
pub use error_log::{ErrorEntry, ErrorLog};
pub use event::{StreamEnd, StreamEvent, EMPTY_RESPONSE};
pub use health::{check_model, CheckStatus, ModelCheck};
pub use request::{build_chat_request, ChatCompletionRequest, ChatMessage, MessageContent};
pub use stream::{collect_reply, ChatClient, ChatStream};
pub use types::{Attachment, GenerationRequest, Role, SamplingParams, Transcript, Turn, DEFAULT_HISTORY_WINDOW};
