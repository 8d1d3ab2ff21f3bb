//! sage-pp - Property Profile Service
//!
//! Accepts a property identifier, runs the reconciliation pipeline
//! against the county, GIS, imagery, and classifier services, and
//! answers with the merged profile plus a per-provider status report.

use anyhow::Result;
use chrono::Utc;
use sage_common::Settings;
use sage_pp::pipeline::{MergePolicy, Orchestrator};
use sage_pp::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting sage-pp (Property Profile Service)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!("Database: {}", settings.database_path.display());

    let db_pool = sage_common::db::init_database_pool(&settings.database_path).await?;
    sage_pp::db::init_schema(&db_pool).await?;

    let client = sage_pp::providers::build_http_client(&settings)?;
    let resolver = sage_pp::providers::resolver_provider(&settings, client.clone());
    let providers = sage_pp::providers::standard_providers(&settings, client);
    info!("Registered {} providers", providers.len());

    let orchestrator = Orchestrator::new(
        resolver,
        providers,
        MergePolicy::standard(),
        db_pool.clone(),
        settings.max_concurrency,
        Duration::from_secs(settings.run_deadline_secs),
    )
    .map_err(|e| anyhow::anyhow!("Provider graph rejected: {}", e))?;

    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        db: db_pool,
        startup_time: Utc::now(),
    });
    let app = sage_pp::build_router(state);

    let addr = format!("127.0.0.1:{}", settings.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
