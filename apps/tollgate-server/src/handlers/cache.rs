//! Cache inspection and invalidation endpoints.

use actix_web::{HttpResponse, web};
use tollgate_shared::ApiResponse;
use tollgate_shared::dto::{InvalidateRequest, InvalidateResponse};

use super::health::cache_stats;
use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/invalidate
///
/// Evicts locally and broadcasts on the bus. An omitted pattern clears
/// everything; an empty one is rejected so a blank form field cannot.
pub async fn invalidate(
    state: web::Data<AppState>,
    body: web::Json<InvalidateRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    if req.pattern.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "pattern must not be empty; omit it to clear everything".to_string(),
        ));
    }

    let evicted = state.coordinator.invalidate(req.pattern.as_deref()).await;
    tracing::info!(pattern = ?req.pattern, evicted, "Manual invalidation");

    Ok(HttpResponse::Ok().json(ApiResponse::ok(InvalidateResponse { evicted })))
}

/// GET /api/cache/stats
pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(cache_stats(&state.coordinator.stats())))
}

#[cfg(test)]
mod tests {
    use actix_web::{App, http::StatusCode, test};
    use serde_json::json;
    use tollgate_core::ports::Cache;

    use super::*;
    use crate::handlers::{configure_routes, test_support};

    #[actix_web::test]
    async fn test_invalidate_evicts_matching_keys() {
        let state = test_support::state().await;
        let cache = state.coordinator.cache();
        cache.set("orders:1", json!({"id": 1}), None).await;
        cache.set("orders:2", json!({"id": 2}), None).await;
        cache.set("customers:1", json!({"id": 1}), None).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/invalidate")
            .set_json(json!({"pattern": "orders"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["evicted"], 2);

        let req = test::TestRequest::get().uri("/api/cache/stats").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["size"], 1);

        state.coordinator.shutdown().await;
    }

    #[actix_web::test]
    async fn test_blank_pattern_is_rejected() {
        let state = test_support::state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/invalidate")
            .set_json(json!({"pattern": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        state.coordinator.shutdown().await;
    }
}
