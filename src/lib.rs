//! Order, wallet and moderation service for the Kaung Computer shop.

mod api;
pub mod chat;
pub mod checkout;
pub mod config;
pub mod deposits;
pub mod error;
pub mod ledger;
pub mod moderation;
pub mod orders;
pub mod policy;
pub mod preferences;
pub mod quick_buy;
pub mod realtime;
pub mod reports;
pub mod responses;
pub mod storage;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};

pub use api::{AppState, CurrentUser, IdempotencyKey, PageQuery, init_router};
pub use error::ServiceError;

use crate::config::{Config, DEV_SIGNING_SECRET, StoreBackend};
use crate::realtime::OrderEvents;
use crate::storage::{LocalFileStorage, UrlSigner};
use crate::store::{MemoryStore, PgStore, Store};

/// Initializes the database pool.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}

/// Local file storage configured from `config`.
pub fn file_storage(config: &Config) -> LocalFileStorage {
    let signer = UrlSigner::new(
        config.url_signing_secret.clone(),
        config.public_base_url.clone(),
        config.signed_url_ttl(),
    );
    LocalFileStorage::new(
        config.storage_root.clone(),
        signer,
        config.max_upload_bytes,
    )
}

/// Wires the state around an already constructed store.
pub fn state_with_store(config: Config, store: Arc<dyn Store>) -> AppState {
    AppState {
        store,
        storage: Arc::new(file_storage(&config)),
        events: OrderEvents::new(config.event_buffer),
        config,
    }
}

/// Builds the application state for the configured backend.
pub async fn build_state(config: Config) -> Result<AppState> {
    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Memory => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let store = PgStore::new(init_pool(url, config.database_max_connections).await?);
            if config.run_migrations {
                store.migrate().await.context("Failed to run migrations")?;
                info!("migrations applied");
            }
            Arc::new(store)
        }
    };

    if config.url_signing_secret == DEV_SIGNING_SECRET {
        warn!("URL_SIGNING_SECRET is not set, using the development secret");
    }
    Ok(state_with_store(config, store))
}
