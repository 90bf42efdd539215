//! Service entry-point: migrates the database, opens the pool, and serves
//! health probes.

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use ortho_config::OrthoConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use bookshelf::config::PostgresSettings;
use bookshelf::inbound::http::health::{HealthState, live, ready};
use bookshelf::outbound::persistence::TracingQueryObserver;
use bookshelf::startup::prepare_database;

/// Application bootstrap.
#[actix_web::main]
async fn main() -> io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = PostgresSettings::load_from_iter([OsString::from("bookshelf")])
        .map_err(|e| io::Error::other(format!("load database settings: {e}")))?;
    info!(?settings, "database settings loaded");

    let pool = prepare_database(&settings, Some(Arc::new(TracingQueryObserver)))
        .await
        .map_err(|e| {
            error!(error = %e, "startup failed");
            io::Error::other(e.to_string())
        })?;
    let health_check = pool.spawn_health_check();

    let health_state = web::Data::new(HealthState::new());
    health_state.attach_pool(pool);
    // Clone for server factory so readiness probe remains accessible.
    let server_health_state = health_state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(server_health_state.clone())
            .service(ready)
            .service(live)
    })
    .bind(("0.0.0.0", 8080))?;

    health_state.mark_ready();
    let result = server.run().await;
    health_state.mark_unhealthy();
    health_check.abort();
    result
}
