use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use gridshare::rate_limit::RateLimiterFacade;
use gridshare::repo::Repo;
use gridshare::{config, AdminGate, AppState};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Environment variables come from the shell, systemd or Docker; `.env` is
    // only picked up in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Bootstrapping gridshare server");
    info!(
        "Frontend URL: {}",
        std::env::var("FRONTEND_URL").unwrap_or_else(|_| "(not set)".to_string())
    );

    #[cfg(feature = "postgres-store")]
    let (repo, db): (Arc<dyn Repo>, _) = {
        use gridshare::db::{ConnectionManager, PgConnector};
        use gridshare::repo::pg::PgRepo;
        let db = Arc::new(ConnectionManager::new(PgConnector::from_env()?));
        // not fatal: the store retries on the first request that needs it
        if let Err(e) = db.acquire().await {
            tracing::warn!("database not reachable at startup: {e}");
        }
        info!("Using Postgres repository backend");
        let repo: Arc<dyn Repo> = Arc::new(PgRepo::new(db.clone()));
        (repo, db)
    };

    #[cfg(not(feature = "postgres-store"))]
    let repo: Arc<dyn Repo> = {
        info!("Using in-memory repository backend");
        Arc::new(gridshare::repo::inmem::InMemRepo::new())
    };

    let state = AppState::new(repo).with_rate_limiter(RateLimiterFacade::from_env());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(AdminGate)
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
    })
    .bind(bind_addr.as_str())?;

    info!("Listening on http://{bind_addr}");

    server.run().await?;

    #[cfg(feature = "postgres-store")]
    db.shutdown().await;

    Ok(())
}

/// Refuse to start without a usable signing secret.
fn validate_env_vars() -> anyhow::Result<()> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set; copy .env.example to .env and configure it"))?;
    if secret.len() < 32 {
        anyhow::bail!("JWT_SECRET must be at least 32 characters long");
    }
    Ok(())
}
