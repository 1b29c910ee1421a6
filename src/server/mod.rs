mod handlers;

use crate::db::DbPool;
use crate::error::Result;
use crate::pledge::StripeClient;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    /// `None` when `STRIPE_SECRET_KEY` is absent; pledge creation then answers 503.
    pub stripe: Option<Arc<StripeClient>>,
}

impl AppState {
    pub fn new(pool: DbPool, stripe: Option<StripeClient>) -> Self {
        Self {
            pool,
            stripe: stripe.map(Arc::new),
        }
    }

    /// Runs diesel work off the async executor.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut diesel::SqliteConnection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/posts", get(handlers::list_posts))
        .route("/api/posts/{id}", get(handlers::get_post))
        .route("/api/pledge-stats", get(handlers::pledge_stats))
        .route(
            "/api/recent-public-pledgers",
            get(handlers::recent_public_pledgers),
        )
        .route("/api/create-pledge", post(handlers::create_pledge))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
