//! Chat streaming endpoint: POST /chat/stream
//!
//! Pre-flight failures (unknown conversation, denied access, bad request)
//! come back as plain HTTP statuses; once streaming starts, every frame is
//! `data: <chunk>\n\n`, ending with `data: [DONE]` on success or
//! `data: [ERROR: <msg>]` on mid-stream failure. A dropped client cancels
//! the upstream provider and discards partial output.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use confab_chat::ChatEvent;

use crate::app::AppState;
use crate::error::HttpError;
use crate::extract::Auth;

#[derive(Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(alias = "conversationId")]
    pub conversation_id: String,
    #[serde(default, alias = "promptCustomization")]
    pub prompt_customization: Option<String>,
}

pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Auth(principal): Auth,
    Json(req): Json<ChatStreamRequest>,
) -> Result<Response, HttpError> {
    let cancel = CancellationToken::new();
    let mut events = state
        .engine
        .stream(
            &req.message,
            &req.conversation_id,
            &principal,
            req.prompt_customization,
            cancel.clone(),
        )
        .await?;

    // Dropping the response body (client disconnect) drops the guard,
    // which cancels the engine's relay and the provider stream with it.
    let guard = cancel.drop_guard();
    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Chunk(text) => {
                    yield Ok::<_, Infallible>(Event::default().data(text));
                }
                ChatEvent::Done => {
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                ChatEvent::Error(message) => {
                    yield Ok(Event::default().data(format!("[ERROR: {}]", message)));
                    break;
                }
            }
        }
    };

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    // Tell intermediary proxies (nginx) not to buffer the stream.
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}
