//! Health check endpoint.

use actix_web::{HttpResponse, web};
use tollgate_core::domain::HealthStatus;
use tollgate_core::ports::CacheStats;
use tollgate_infra::HealthReport;
use tollgate_shared::dto::{
    CacheStatsResponse, ComponentHealth, HealthResponse, SubscriptionResponse,
};

use crate::state::AppState;

fn status_str(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    }
}

pub(crate) fn cache_stats(stats: &CacheStats) -> CacheStatsResponse {
    CacheStatsResponse {
        size: stats.size,
        hits: stats.hits,
        misses: stats.misses,
        hit_rate: stats.hit_rate,
        evictions: stats.evictions,
        expirations: stats.expirations,
    }
}

fn health_response(report: HealthReport) -> HealthResponse {
    HealthResponse {
        status: status_str(report.status).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        checks: report
            .checks
            .into_iter()
            .map(|c| ComponentHealth {
                component: c.component,
                status: status_str(c.status).to_string(),
                message: c.message,
            })
            .collect(),
        subscription: report.subscription.map(|s| SubscriptionResponse {
            status: format!("{:?}", s.status).to_lowercase(),
            attempt: s.attempt,
            next_retry_at: s.next_retry_at,
            exhausted: s.exhausted,
        }),
        cache: cache_stats(&report.cache),
    }
}

/// Health check endpoint.
///
/// GET /api/health
///
/// A degraded change feed still answers 200; only an unreachable attempt log
/// turns the endpoint into a 503.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let report = state.coordinator.health().await;
    let unhealthy = report.status == HealthStatus::Unhealthy;
    let body = health_response(report);

    if unhealthy {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, http::StatusCode, test};

    use super::*;
    use crate::handlers::{configure_routes, test_support};

    #[actix_web::test]
    async fn test_health_reports_components() {
        let state = test_support::state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: HealthResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "healthy");
        assert!(body.subscription.is_none());
        assert!(body.checks.iter().any(|c| c.component == "attempt_log"));

        state.coordinator.shutdown().await;
    }
}
