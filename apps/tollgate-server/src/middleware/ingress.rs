//! Ingress flood guard middleware.
//!
//! Rejects a peer with 429 once it exceeds the governor quota, before the
//! request reaches any handler or the attempt log.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;

use tollgate_infra::IngressLimiter;
use tollgate_shared::ErrorResponse;

use crate::middleware::error::retry_after_secs;

/// Ingress limiting middleware factory.
pub struct IngressMiddleware {
    limiter: Arc<IngressLimiter>,
}

impl IngressMiddleware {
    pub fn new(limiter: Arc<IngressLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IngressMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = IngressMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IngressMiddlewareService {
            service,
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct IngressMiddlewareService<S> {
    service: S,
    limiter: Arc<IngressLimiter>,
}

impl<S, B> Service<ServiceRequest> for IngressMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Socket peer only; forwarded headers are client-controlled
        let key = req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        match self.limiter.check(&key) {
            Err(wait) => {
                tracing::warn!(peer = %key, wait = ?wait, "Ingress limit exceeded");

                let retry_after = retry_after_secs(wait);
                let error = ErrorResponse::too_many_requests(format!(
                    "Request rate exceeded. Try again in {} seconds.",
                    retry_after
                ))
                .with_instance(req.path());

                let response = HttpResponse::TooManyRequests()
                    .insert_header(("Retry-After", retry_after.to_string()))
                    .json(error);

                let (http_req, _payload) = req.into_parts();
                let srv_response = ServiceResponse::new(http_req, response);

                Box::pin(async move { Ok(srv_response.map_into_right_body()) })
            }
            Ok(()) => {
                let fut = self.service.call(req);
                Box::pin(async move {
                    let res = fut.await?;
                    Ok(res.map_into_left_body())
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actix_web::{App, http::StatusCode, test, web};
    use tollgate_infra::IngressConfig;

    use super::*;

    #[actix_web::test]
    async fn test_peer_over_quota_is_rejected() {
        let limiter = IngressLimiter::new(&IngressConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
        })
        .unwrap();

        let app = test::init_service(
            App::new()
                .wrap(IngressMiddleware::new(Arc::new(limiter)))
                .route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for _ in 0..2 {
            let req = test::TestRequest::get().uri("/ping").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get().uri("/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("Retry-After"));
    }
}
