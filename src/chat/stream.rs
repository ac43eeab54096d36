//! Streaming chat client

use futures::{Stream, StreamExt};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::backend::http::{request_headers, HttpClients};
use crate::backend::protocol::BackendRegistry;
use crate::chat::decode::{decode_body, DecodeOptions};
use crate::chat::event::{StreamEnd, StreamEvent};
use crate::chat::request::build_chat_request;
use crate::chat::types::GenerationRequest;

/// Forward-only stream of chat events. Each call to
/// [`ChatClient::stream_chat`] performs a fresh network exchange.
pub type ChatStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Client issuing streaming chat requests against any registered backend
#[derive(Clone)]
pub struct ChatClient {
    clients: HttpClients,
    registry: Arc<BackendRegistry>,
    idle_timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(clients: HttpClients, registry: Arc<BackendRegistry>) -> Self {
        Self {
            clients,
            registry,
            idle_timeout: None,
        }
    }

    /// Give up when the response headers or the next body chunk take longer
    /// than `idle`
    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Stream a reply to `request`
    pub fn stream_chat(&self, request: GenerationRequest) -> ChatStream {
        self.stream_chat_with_cancel(request, CancellationToken::new())
    }

    /// Stream a reply to `request`, ending early with
    /// [`StreamEnd::Cancelled`] once `cancel` fires
    pub fn stream_chat_with_cancel(&self, request: GenerationRequest, cancel: CancellationToken) -> ChatStream {
        let descriptor = self.registry.get(request.protocol);
        let endpoint = descriptor.chat_endpoint(&request.base_url);
        let body = build_chat_request(&request, &descriptor);
        let http = self
            .clients
            .for_url(&endpoint)
            .post(&endpoint)
            .headers(request_headers(&descriptor, request.api_key.as_deref()))
            .json(&body);
        let framing = descriptor.framing;
        let idle_timeout = self.idle_timeout;

        let span = info_span!(
            "stream_chat",
            request_id = %Uuid::new_v4(),
            backend = %request.protocol,
            model = %request.model,
        );

        let events = async_stream::stream! {
            info!(
                endpoint = %endpoint,
                temperature = body.temperature,
                max_tokens = body.max_tokens,
                history = request.history.len(),
                "Sending chat request"
            );

            let response = match bounded(http.send(), idle_timeout, &cancel).await {
                Waited::Cancelled => {
                    yield StreamEvent::End(StreamEnd::Cancelled);
                    return;
                }
                Waited::Idle(idle) => {
                    error!(endpoint = %endpoint, idle = ?idle, "No response from backend");
                    yield StreamEvent::End(StreamEnd::Timeout { idle });
                    return;
                }
                Waited::Ready(Err(e)) => {
                    let end = if e.is_builder() {
                        StreamEnd::Unexpected(format!("{:?}", e))
                    } else {
                        StreamEnd::Network(e.to_string())
                    };
                    error!(endpoint = %endpoint, error = ?e, "Chat request failed");
                    yield StreamEvent::End(end);
                    return;
                }
                Waited::Ready(Ok(response)) => response,
            };

            let status = response.status();
            info!(endpoint = %endpoint, status = %status, "Received response");

            if !status.is_success() {
                let body = match bounded(response.text(), idle_timeout, &cancel).await {
                    Waited::Ready(Ok(text)) => text,
                    Waited::Ready(Err(e)) => {
                        warn!(endpoint = %endpoint, error = %e, "Failed to read error body");
                        String::new()
                    }
                    Waited::Idle(idle) => {
                        warn!(endpoint = %endpoint, idle = ?idle, "Error body stalled, reporting status only");
                        String::new()
                    }
                    Waited::Cancelled => {
                        yield StreamEvent::End(StreamEnd::Cancelled);
                        return;
                    }
                };
                let end = StreamEnd::Status {
                    code: status.as_u16(),
                    body,
                };
                error!(endpoint = %endpoint, diagnostic = ?end.diagnostic(), "Non-success response");
                yield StreamEvent::End(end);
                return;
            }

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
            let options = DecodeOptions {
                idle_timeout,
                cancel,
                ..DecodeOptions::default()
            };

            for await event in decode_body(body, framing, options) {
                if let StreamEvent::End(end) = &event {
                    if let Some(diagnostic) = end.diagnostic() {
                        error!(endpoint = %endpoint, diagnostic = %diagnostic, "Stream ended with error");
                    }
                }
                yield event;
            }
        };

        let mut events = Box::pin(events);
        Box::pin(futures::stream::poll_fn(move |cx| {
            let _entered = span.enter();
            events.as_mut().poll_next(cx)
        }))
    }
}

enum Waited<T> {
    Ready(T),
    Idle(Duration),
    Cancelled,
}

/// Await `fut` unless `cancel` fires first or it outlasts `idle`
async fn bounded<F: Future>(fut: F, idle: Option<Duration>, cancel: &CancellationToken) -> Waited<F::Output> {
    let timed = async {
        match idle {
            Some(idle) => tokio::time::timeout(idle, fut).await.map_err(|_| idle),
            None => Ok(fut.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Waited::Cancelled,
        out = timed => match out {
            Ok(value) => Waited::Ready(value),
            Err(idle) => Waited::Idle(idle),
        },
    }
}

/// Drain a chat stream into the full reply text and its ending
pub async fn collect_reply(mut stream: ChatStream) -> (String, StreamEnd) {
    let mut reply = String::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Delta(text) => reply.push_str(&text),
            StreamEvent::End(end) => return (reply, end),
        }
    }
    (reply, StreamEnd::Unexpected("stream ended without a terminal status".to_string()))
}
