//! Items produced by a chat stream

use std::fmt;
use std::time::Duration;

/// Text shown for a stream that ended without content
pub const EMPTY_RESPONSE: &str = "[Empty response]";

/// One item of a chat stream.
///
/// A stream yields any number of `Delta`s followed by exactly one `End`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of assistant text, in arrival order
    Delta(String),
    /// Terminal status; nothing follows it
    End(StreamEnd),
}

impl StreamEvent {
    pub fn as_delta(&self) -> Option<&str> {
        match self {
            StreamEvent::Delta(text) => Some(text),
            StreamEvent::End(_) => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StreamEvent::End(_))
    }
}

/// How a chat stream finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Completion marker received, or the body ended after content
    Done,
    /// The body ended without producing any content
    Empty,
    /// The backend answered with a non-success status
    Status { code: u16, body: String },
    /// Transport failure while connecting or reading the body
    Network(String),
    /// No body chunk arrived within the idle timeout
    Timeout { idle: Duration },
    /// The caller cancelled the generation
    Cancelled,
    /// Anything else; the detail is for logs only
    Unexpected(String),
}

impl StreamEnd {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StreamEnd::Status { .. }
                | StreamEnd::Network(_)
                | StreamEnd::Timeout { .. }
                | StreamEnd::Unexpected(_)
        )
    }

    /// Text for the end user, if this ending warrants one
    pub fn user_message(&self) -> Option<String> {
        match self {
            StreamEnd::Done => None,
            StreamEnd::Empty => Some(EMPTY_RESPONSE.to_string()),
            StreamEnd::Status { code, .. } => Some(format!(
                "Error from AI provider (Status {}). Check logs.",
                code
            )),
            StreamEnd::Network(e) => Some(format!("Network error: {}. Please check connection.", e)),
            StreamEnd::Timeout { idle } => Some(format!(
                "The AI provider stopped responding (no data for {}s).",
                idle.as_secs()
            )),
            StreamEnd::Cancelled => Some("[Cancelled]".to_string()),
            StreamEnd::Unexpected(_) => {
                Some("The assistant encountered an unexpected problem. Details have been logged.".to_string())
            }
        }
    }

    /// Line for the error log, for endings that are errors
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            StreamEnd::Status { code, body } => Some(format!("API Error: Status {} - {}", code, body)),
            StreamEnd::Network(e) => Some(format!("Network error: {}", e)),
            StreamEnd::Timeout { idle } => Some(format!("Stream idle for more than {:?}", idle)),
            StreamEnd::Unexpected(detail) => Some(format!("Unexpected error: {}", detail)),
            StreamEnd::Done | StreamEnd::Empty | StreamEnd::Cancelled => None,
        }
    }
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_message() {
            Some(message) => f.write_str(&message),
            None => f.write_str("done"),
        }
    }
}
