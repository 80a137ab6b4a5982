pub mod config;
pub mod prompt;

pub use config::*;
pub use prompt::*;

use crate::error::{AppError, AppResult};
use crate::health;
use actix_web::{web, HttpRequest, HttpResponse};

/// Route table shared by `main` and the handler tests.
///
/// The prompt and health endpoints are served both at the root (where existing
/// clients call them) and under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(prompt::json_config())
        .service(
            web::scope("/api/v1")
                .route("/prompt-stream", web::post().to(prompt_stream))
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(get_config)),
        )
        .route("/prompt-stream", web::post().to(prompt_stream))
        .route("/health", web::get().to(health::health_check));
}

/// Fallback for unknown routes: JSON 404 in the same shape as every other error.
pub async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_unknown_route_is_json_404() {
        let app = test::init_service(App::new().default_service(web::to(not_found))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/nope").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
        assert_eq!(body["error"]["message"], "No route for GET /nope");
    }
}
