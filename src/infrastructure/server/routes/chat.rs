use super::super::dto::ErrorResponse;
use super::super::error::chat_error_response;
use super::super::state::ServerState;
use crate::application::chat::history::ChatPayload;
use crate::infrastructure::model::ModelProvider;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};

type ChatSse = Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>;

/// Streamed chat. The body may be the full message-history JSON, a
/// single-message shorthand, a form post, or plain text; an unusable body
/// degrades to an empty history rather than failing. The response is an SSE
/// stream of tagged chat events ending with `done`.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = String,
    responses(
        (status = 200, description = "Chat event stream", content_type = "text/event-stream", body = String),
        (status = 500, description = "No usable model could be resolved", body = ErrorResponse)
    )
)]
pub async fn chat_handler<P: ModelProvider + 'static>(
    State(state): State<Arc<ServerState<P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ChatSse, (StatusCode, Json<ErrorResponse>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let payload = ChatPayload::from_request_bytes(content_type, &body);
    info!(
        messages = payload.messages.len(),
        model = payload.model.as_deref(),
        namespace = payload.server_namespace.as_deref(),
        "Received /chat request"
    );

    let manager = state.connect_manager().await;
    let stream = state
        .orchestrator()
        .handle(payload, manager)
        .await
        .map_err(|err| {
            error!(%err, "Rejecting /chat request");
            chat_error_response(&err)
        })?;

    let events = stream
        .map(|event| {
            let sse_event = Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data(r#"{"type":"error"}"#));
            Ok::<_, Infallible>(sse_event)
        })
        .boxed();
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
