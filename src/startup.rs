use crate::config::{Config, LiveConfig};
use crate::db::connection::{DbPool, get_pool_stats, init_db};
use crate::db::{MemoryPollRepository, PgPollRepository, PollRepository};
use crate::polls;
use crate::realtime::{
    SubscriberRegistry, UpdateDispatcher, live_updates_sse, live_updates_ws, poll_updates_sse,
};
use crate::store::PollStore;
use crate::votes::{PollLocks, VoteMutator};
use axum::{
    Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: PollStore,
    pub votes: Arc<VoteMutator>,
    pub registry: Arc<SubscriberRegistry>,
    pub dispatcher: Arc<UpdateDispatcher>,
}

impl AppState {
    pub fn new(repo: Arc<dyn PollRepository>, live: &LiveConfig) -> Self {
        let locks = Arc::new(PollLocks::default());
        let registry = Arc::new(SubscriberRegistry::new(
            live.subscriber_queue_capacity,
            live.send_timeout,
        ));
        let dispatcher = Arc::new(UpdateDispatcher::new(registry.clone(), live));
        let votes = Arc::new(VoteMutator::new(
            repo.clone(),
            locks.clone(),
            dispatcher.clone(),
        ));

        AppState {
            store: PollStore::new(repo, locks),
            votes,
            registry,
            dispatcher,
        }
    }
}

/// Picks the repository named by the config: Postgres when a URL is set,
/// otherwise process memory.
pub async fn connect_repository(
    config: &Config,
) -> Result<(Arc<dyn PollRepository>, Option<DbPool>), sqlx::Error> {
    match &config.database_url {
        Some(url) => {
            let pool = init_db(url, config.database_max_connections).await?;
            info!("connected to postgres; {}", get_pool_stats(&pool));
            Ok((Arc::new(PgPollRepository::new(pool.clone())), Some(pool)))
        }
        None => {
            warn!("DATABASE_URL not set, polls are kept in memory only");
            Ok((Arc::new(MemoryPollRepository::new()), None))
        }
    }
}

pub fn spawn_pool_health_check(pool: DbPool) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match pool.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", get_pool_stats(&pool));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    });
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(polls::health))
        .route("/polls", get(polls::list_polls).post(polls::create_poll))
        .route("/polls/:id", get(polls::get_poll).delete(polls::delete_poll))
        .route("/polls/:id/vote", post(polls::vote_on_poll))
        .route("/polls/:id/stats", get(polls::poll_stats))
        .route("/polls/:id/events", get(poll_updates_sse))
        .route("/init-data", post(polls::init_data))
        .route("/ws", get(live_updates_ws))
        .route("/events", get(live_updates_sse))
        .layer(Extension(app_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .fallback(handler_404)
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
