use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. The bot id is the public one, so nothing here is secret.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "upstream": {
                "base_url": config.upstream.base_url,
                "bot_id": config.upstream.bot_id,
                "request_timeout_secs": config.upstream.request_timeout_secs,
                "prefill_first_message": config.upstream.prefill_first_message
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels,
                "bit_depth": 16,
                "chunk_bytes": config.audio.chunk_bytes,
                "connect_timeout_secs": config.audio.connect_timeout_secs,
                "idle_timeout_secs": config.audio.idle_timeout_secs,
                "channel_capacity": config.audio.channel_capacity
            },
            "sessions": {
                "ttl_secs": config.sessions.ttl_secs,
                "max_sessions": config.sessions.max_sessions,
                "sweep_interval_secs": config.sessions.sweep_interval_secs
            },
            "relay": {
                "channel_capacity": config.relay.channel_capacity
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::ScriptedTranscoder;
    use crate::chat::fake::ScriptedChat;
    use crate::state::tests::test_state;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_get_config() {
        let state = test_state(Arc::new(ScriptedChat::new()), Arc::new(ScriptedTranscoder::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["server"]["port"], 6005);
        assert_eq!(body["config"]["upstream"]["bot_id"], "bot-1");
        assert_eq!(body["config"]["audio"]["sample_rate"], 8000);
        assert_eq!(body["config"]["audio"]["chunk_bytes"], 3200);
    }
}
