//! # Prompt Streaming Endpoint
//!
//! `POST /prompt-stream` with `{"uuid": "...", "message": "..."}`.
//!
//! Validation failures are answered with a 400 JSON error before anything is sent
//! upstream. Otherwise the response is `text/event-stream`: one `data: <event>` frame
//! per relay event, ending when the turn is over.

use crate::error::{AppError, AppResult};
use crate::relay::{run_turn, RelayEvent};
use crate::state::AppState;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Inbound turn. `conversationId` is accepted in place of `uuid`.
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    #[serde(default, alias = "conversationId")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PromptRequest {
    /// Returns `(conversation_id, message)`, rejecting missing or empty fields.
    /// Whitespace is content and goes upstream untouched.
    pub fn validate(self) -> Result<(String, String), AppError> {
        let uuid = self
            .uuid
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| AppError::ValidationError("Uuid is required".to_string()))?;
        let message = self
            .message
            .filter(|message| !message.is_empty())
            .ok_or_else(|| AppError::ValidationError("Message is required".to_string()))?;
        Ok((uuid, message))
    }
}

/// Body extractor config: malformed JSON is a validation error, not actix's plain-text 400.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        warn!(error = %err, "Rejected prompt body");
        AppError::ValidationError(format!("Invalid request body: {}", err)).into()
    })
}

pub async fn prompt_stream(
    state: web::Data<AppState>,
    body: web::Json<PromptRequest>,
) -> AppResult<HttpResponse> {
    let (conversation_id, message) = body.into_inner().validate()?;
    debug!(conversation_id = %conversation_id, message_len = message.len(), "Prompt accepted");

    let (tx, rx) = mpsc::channel::<RelayEvent>(state.config().relay.channel_capacity);
    let relay_state = state.get_ref().clone();

    // The turn owns the sender; the stream ends when the turn does
    actix_web::rt::spawn(async move {
        let _ = run_turn(relay_state, conversation_id, message, tx).await;
    });

    let events = ReceiverStream::new(rx).map(|event| Ok::<_, actix_web::Error>(event.to_sse_frame()));

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::ScriptedTranscoder;
    use crate::chat::fake::ScriptedChat;
    use crate::chat::MessageSegment;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use std::sync::Arc;

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(crate::handlers::configure),
            )
            .await
        };
    }

    fn post(uri: &str, body: Value) -> test::TestRequest {
        test::TestRequest::post().uri(uri).set_json(body)
    }

    #[actix_web::test]
    async fn test_missing_uuid_rejected_before_upstream() {
        let chat = Arc::new(ScriptedChat::new());
        let app = app!(test_state(chat.clone(), Arc::new(ScriptedTranscoder::new())));

        let resp = test::call_service(&app, post("/prompt-stream", json!({"message": "hi"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");
        assert_eq!(body["error"]["message"], "Uuid is required");
        assert_eq!(chat.start_calls() + chat.continue_calls(), 0);
    }

    #[actix_web::test]
    async fn test_empty_message_rejected() {
        let chat = Arc::new(ScriptedChat::new());
        let app = app!(test_state(chat.clone(), Arc::new(ScriptedTranscoder::new())));

        let resp = test::call_service(
            &app,
            post("/api/v1/prompt-stream", json!({"uuid": "conv-1", "message": ""})).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["message"], "Message is required");
        assert_eq!(chat.start_calls(), 0);
    }

    #[actix_web::test]
    async fn test_whitespace_message_is_forwarded() {
        let chat = Arc::new(ScriptedChat::new().on_start("sess-1", vec![MessageSegment::text("ok")]));
        let app = app!(test_state(chat.clone(), Arc::new(ScriptedTranscoder::new())));

        let resp = test::call_service(
            &app,
            post("/prompt-stream", json!({"uuid": "conv-1", "message": "  "})).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        test::read_body(resp).await;
        assert_eq!(chat.start_calls(), 1);
    }

    #[actix_web::test]
    async fn test_malformed_json_is_validation_error() {
        let app = app!(test_state(Arc::new(ScriptedChat::new()), Arc::new(ScriptedTranscoder::new())));

        let req = test::TestRequest::post()
            .uri("/prompt-stream")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{\"uuid\": ")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[actix_web::test]
    async fn test_text_reply_streams_one_event() {
        let chat = Arc::new(ScriptedChat::new().on_start("sess-1", vec![MessageSegment::text("hello")]));
        let app = app!(test_state(chat, Arc::new(ScriptedTranscoder::new())));

        let resp = test::call_service(
            &app,
            post("/prompt-stream", json!({"uuid": "conv-1", "message": "hi"})).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");

        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"data: {\"type\":\"text\",\"content\":\"hello\"}\n\n");
    }

    #[actix_web::test]
    async fn test_second_turn_continues_session() {
        let chat = Arc::new(
            ScriptedChat::new()
                .on_start("sess-1", vec![MessageSegment::text("Welcome")])
                .on_continue(vec![MessageSegment::text("Noted")]),
        );
        let app = app!(test_state(chat.clone(), Arc::new(ScriptedTranscoder::new())));

        for message in ["first", "second"] {
            let resp = test::call_service(
                &app,
                post("/prompt-stream", json!({"conversationId": "conv-7", "message": message})).to_request(),
            )
            .await;
            test::read_body(resp).await;
        }

        assert_eq!(chat.start_calls(), 1);
        assert_eq!(chat.continued_with(), vec![("sess-1".to_string(), "second".to_string())]);
    }

    #[actix_web::test]
    async fn test_audio_failure_streams_error_event() {
        let chat = Arc::new(ScriptedChat::new().on_start(
            "sess-1",
            vec![MessageSegment::audio("https://cdn/missing.mp3"), MessageSegment::text("unreached")],
        ));
        let app = app!(test_state(chat, Arc::new(ScriptedTranscoder::new())));

        let resp = test::call_service(
            &app,
            post("/prompt-stream", json!({"uuid": "conv-1", "message": "play"})).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).unwrap();
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 1);

        let event: Value = serde_json::from_str(frames[0].trim_start_matches("data: ")).unwrap();
        assert_eq!(event["type"], "error");
        assert_eq!(event["content"]["kind"], "resource_fetch_error");
    }
}
