//! HTTP handlers and route configuration.

mod cache;
mod guard;
mod health;

use actix_web::web;

use crate::middleware::error::AppError;

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::BadRequest(err.to_string()).into()
    }))
    .service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            // Rate limiting
            .route("/guard", web::post().to(guard::guard))
            .route("/outcome", web::post().to(guard::outcome))
            // Cache
            .route("/invalidate", web::post().to(cache::invalidate))
            .route("/cache/stats", web::get().to(cache::stats)),
    );
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tollgate_infra::{Collaborators, Coordinator, CoordinatorConfig};

    use crate::state::AppState;

    pub async fn state() -> AppState {
        let coordinator = Coordinator::start(CoordinatorConfig::default(), Collaborators::in_memory())
            .await
            .unwrap();

        AppState {
            coordinator: Arc::new(coordinator),
            #[cfg(feature = "rate-limit")]
            ingress: Arc::new(
                tollgate_infra::IngressLimiter::new(&tollgate_infra::IngressConfig::default())
                    .unwrap(),
            ),
        }
    }
}
