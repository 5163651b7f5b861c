use crate::config::Config;
use crate::utils::clock::{Clock, MonotonicClock};
use crate::utils::retry::RetryConfig;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use catalog::InMemoryCatalog;
use expiration_sweeper::ExpirationSweeper;
use mongo_store::{MongoCatalog, MongoSessionStore};
use scorer::Scorer;
use session_service::SessionService;
use session_store::InMemorySessionStore;

pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionService>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let store = Arc::new(MongoSessionStore::new(mongo.clone()));
        store.ensure_indexes().await?;
        let catalog = Arc::new(MongoCatalog::new(mongo.clone()));

        let redis = match &config.redis_uri {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::info!("REDIS_URI not set, sweepers run without a lease");
                None
            }
        };

        let sessions = Arc::new(SessionService::new(
            store.clone(),
            catalog.clone(),
            store,
            Scorer::new(catalog),
            Arc::new(MonotonicClock::new()),
            RetryConfig::for_conflicts(config.sessions.conflict_retries),
        ));
        let sweeper = Arc::new(ExpirationSweeper::new(
            sessions.clone(),
            redis.clone(),
            config.sessions.clone(),
        ));

        Ok(Self {
            config,
            sessions,
            sweeper,
            mongo: Some(mongo),
            redis,
        })
    }

    /// State backed by in-memory storage, for tests and local experiments.
    pub fn in_memory(config: Config, catalog: Arc<InMemoryCatalog>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            catalog.clone(),
            store,
            Scorer::new(catalog),
            clock,
            RetryConfig::for_conflicts(config.sessions.conflict_retries),
        ));
        let sweeper = Arc::new(ExpirationSweeper::new(
            sessions.clone(),
            None,
            config.sessions.clone(),
        ));

        Self {
            config,
            sessions,
            sweeper,
            mongo: None,
            redis: None,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");
    let client = redis::Client::open(uri)?;

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

pub mod answer_ledger;
pub mod catalog;
pub mod expiration_sweeper;
pub mod mongo_store;
pub mod scorer;
pub mod session_machine;
pub mod session_service;
pub mod session_store;
pub mod sync_reconciler;
