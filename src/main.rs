use anyhow::Result;
use monitor_feed::db::{establish_pool, run_migrations};
use monitor_feed::ingest::{run_ingest, IngestPlan};
use monitor_feed::pledge::StripeClient;
use monitor_feed::server::{serve, AppState};
use monitor_feed::settings::settings;
use monitor_feed::utils::junkipedia::JunkipediaClient;
use monitor_feed::utils::logs::{
    log_db_ready, log_ingest_report, log_ingest_start, log_server_starting, log_startup_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    monitor_feed::init_tracing()?;

    let s = settings();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(s.server.port);
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "monitor.db".to_string());

    log_startup_config(port, &database_url, s.server.ingest_on_start);

    let pool = establish_pool(&database_url)?;
    {
        let mut conn = pool.get()?;
        let applied = run_migrations(&mut conn)?;
        log_db_ready(applied);
    }

    if s.server.ingest_on_start {
        let plan = IngestPlan::from_settings();
        match JunkipediaClient::from_env() {
            Ok(client) => {
                log_ingest_start(&plan.channel, plan.queries().len());
                match run_ingest(&pool, &client, &plan).await {
                    Ok(report) => log_ingest_report(&report),
                    Err(e) => tracing::error!("ingest failed: {e}"),
                }
            }
            Err(e) => tracing::warn!("skipping ingest: {e}"),
        }
    }

    let stripe = match StripeClient::from_env() {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!("pledges disabled: {e}");
            None
        }
    };

    log_server_starting(port);
    serve(AppState::new(pool, stripe), port).await
}
