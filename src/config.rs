use std::path::PathBuf;

use serde::Deserialize;

/// Which persistence backend the service runs against.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    /// Process-local state, for development and tests.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub store_backend: StoreBackend,
    pub run_migrations: bool,
    pub storage_root: PathBuf,
    /// Base for signed download links, without a trailing slash.
    pub public_base_url: String,
    pub url_signing_secret: String,
    pub signed_url_ttl_secs: i64,
    pub max_upload_bytes: usize,
    pub temporary_ban_hours: i64,
    pub event_buffer: usize,
}

pub const DEV_SIGNING_SECRET: &str = "dev-only-url-signing-secret";

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("database_max_connections", 8)?
            .set_default("store_backend", "postgres")?
            .set_default("run_migrations", true)?
            .set_default("storage_root", "./storage")?
            .set_default("public_base_url", "http://localhost:8000")?
            .set_default("url_signing_secret", DEV_SIGNING_SECRET)?
            .set_default("signed_url_ttl_secs", 3600)?
            .set_default("max_upload_bytes", 5 * 1024 * 1024)?
            .set_default("temporary_ban_hours", 72)?
            .set_default("event_buffer", 256)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        config.try_deserialize()
    }

    pub fn signed_url_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signed_url_ttl_secs)
    }

    pub fn temporary_ban(&self) -> chrono::Duration {
        chrono::Duration::hours(self.temporary_ban_hours)
    }

    /// Defaults suitable for tests and local runs against the memory store.
    pub fn for_memory(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            server_port: 0,
            database_url: None,
            database_max_connections: 1,
            store_backend: StoreBackend::Memory,
            run_migrations: false,
            storage_root: storage_root.into(),
            public_base_url: "http://localhost:8000".to_string(),
            url_signing_secret: DEV_SIGNING_SECRET.to_string(),
            signed_url_ttl_secs: 3600,
            max_upload_bytes: 5 * 1024 * 1024,
            temporary_ban_hours: 72,
            event_buffer: 64,
        }
    }
}
