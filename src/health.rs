use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.config();
    let uptime_seconds = state.get_uptime_seconds();
    let sessions = state.sessions.summary();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_relays": metrics.active_relays
        },
        "sessions": sessions,
        "upstream": {
            "base_url": config.upstream.base_url,
            "bot_id": config.upstream.bot_id
        },
        "memory": get_memory_info(),
        "system": get_system_status(sessions.total_sessions, sessions.max_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let finished_turns = metrics.turns_completed + metrics.turns_failed;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "relay": {
            "active_relays": metrics.active_relays,
            "turns_completed": metrics.turns_completed,
            "turns_failed": metrics.turns_failed,
            "turn_failure_rate": if finished_turns > 0 {
                metrics.turns_failed as f64 / finished_turns as f64
            } else {
                0.0
            }
        },
        "sessions": state.sessions.summary(),
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Load level from session registry usage. An unbounded registry is always "normal".
fn get_system_status(current_sessions: usize, max_sessions: usize) -> serde_json::Value {
    let session_usage = if max_sessions > 0 {
        current_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": current_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["Session registry nearly full - least recently used conversations will be evicted"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::ScriptedTranscoder;
    use crate::chat::fake::ScriptedChat;
    use crate::session::SessionHandle;
    use crate::state::tests::test_state;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_sessions() {
        let state = test_state(Arc::new(ScriptedChat::new()), Arc::new(ScriptedTranscoder::new()));
        state.sessions.set("conv-1", SessionHandle::new("sess-1"));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"]["total_sessions"], 1);
        assert_eq!(body["metrics"]["active_relays"], 0);
        assert_eq!(body["upstream"]["bot_id"], "bot-1");
    }

    #[actix_web::test]
    async fn test_metrics_reports_turns() {
        let state = test_state(Arc::new(ScriptedChat::new()), Arc::new(ScriptedTranscoder::new()));
        state.record_turn(true);
        state.record_turn(false);
        state.record_endpoint_request("POST /prompt-stream", 12, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["relay"]["turns_completed"], 1);
        assert_eq!(body["relay"]["turns_failed"], 1);
        assert_eq!(body["relay"]["turn_failure_rate"], 0.5);
        assert_eq!(body["endpoints"][0]["endpoint"], "POST /prompt-stream");
    }

    #[actix_web::test]
    async fn test_system_status_levels() {
        assert_eq!(get_system_status(10, 100)["status"], "normal");
        assert_eq!(get_system_status(80, 100)["status"], "moderate_load");
        assert_eq!(get_system_status(95, 100)["status"], "high_load");
        assert_eq!(get_system_status(5000, 0)["status"], "normal");
    }
}
