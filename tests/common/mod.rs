#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use kaung_commerce::config::Config;
use kaung_commerce::policy::Actor;
use kaung_commerce::realtime::OrderEvents;
use kaung_commerce::storage::LocalFileStorage;
use kaung_commerce::store::MemoryStore;
use kaung_commerce::types::{Product, ProductCategory, Profile, Role};
use kaung_commerce::{AppState, file_storage, state_with_store};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

pub struct Fixture {
    pub store: MemoryStore,
    pub storage: LocalFileStorage,
    pub events: OrderEvents,
    pub config: Config,
    // Keeps the storage root alive for the test's duration.
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::for_memory(dir.path());
        Self {
            store: MemoryStore::new(),
            storage: file_storage(&config),
            events: OrderEvents::new(64),
            config,
            dir,
        }
    }

    pub fn state(&self) -> AppState {
        state_with_store(self.config.clone(), Arc::new(self.store.clone()))
    }

    pub fn customer(&self, wallet: i64) -> Profile {
        let mut profile = Profile::new(Uuid::new_v4(), "Aung Aung");
        profile.wallet_balance = Decimal::from(wallet);
        self.store.insert_profile(profile.clone());
        profile
    }

    pub fn premium_customer(&self, wallet: i64) -> Profile {
        let mut profile = self.customer(wallet);
        profile.premium_until = Some(Utc::now() + Duration::days(30));
        self.store.insert_profile(profile.clone());
        profile
    }

    pub fn admin(&self) -> Profile {
        let mut profile = Profile::new(Uuid::new_v4(), "Shop Admin");
        profile.role = Role::Admin;
        self.store.insert_profile(profile.clone());
        profile
    }

    pub fn product(&self, name: &str, category: ProductCategory, price: i64, points: i64) -> Product {
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category,
            price: Decimal::from(price),
            points_price: 0,
            points_value: points,
            stock_quantity: None,
            is_premium: false,
            is_active: true,
        };
        self.store.insert_product(product.clone());
        product
    }
}

pub fn actor(profile: &Profile) -> Actor {
    Actor::from_profile(profile, Utc::now())
}

pub fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}
