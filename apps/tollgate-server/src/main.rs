//! # Tollgate Server
//!
//! Actix-web front end for the Tollgate coordinator: progressive rate
//! limiting plus cache invalidation over HTTP.

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

#[cfg(feature = "scheduler")]
mod background;
mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env()?;

    tracing::info!(
        "Starting Tollgate server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::build(&config).await?;

    #[cfg(feature = "scheduler")]
    let mut maintenance = background::Maintenance::start(&state, &config.scheduler).await?;

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        let app = App::new()
            .app_data(web::Data::new(app_state.clone()))
            .configure(handlers::configure_routes);

        #[cfg(feature = "rate-limit")]
        let app = app.wrap(middleware::ingress::IngressMiddleware::new(
            app_state.ingress.clone(),
        ));

        app.wrap(TracingLogger::default())
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    let result = server.await;

    #[cfg(feature = "scheduler")]
    {
        if let Err(e) = maintenance.shutdown().await {
            tracing::warn!(error = %e, "Scheduler did not stop cleanly");
        }
    }
    state.coordinator.shutdown().await;

    result?;
    Ok(())
}
