//! HTTP surface.

mod account;
mod admin;
mod chat;
mod extract;
mod files;
mod shop;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
};
use serde::Deserialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::Config;
use crate::error::{ApiErrorWithMeta, ServiceError};
use crate::realtime::OrderEvents;
use crate::responses::{RequestMeta, meta_middleware};
use crate::storage::FileStorage;
use crate::store::Store;
use crate::types::Page;

pub use extract::{CurrentUser, IdempotencyKey};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn FileStorage>,
    /// Order change feed shared by every request.
    pub events: OrderEvents,
    pub config: Config,
}

/// `?page=&per_page=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.page.unwrap_or(default.page),
            self.per_page.unwrap_or(default.per_page),
        )
    }
}

/// Attaches the request meta to a domain failure.
pub(crate) trait WithMeta<T> {
    fn with_meta(self, meta: &RequestMeta) -> Result<T, ApiErrorWithMeta>;
}

impl<T> WithMeta<T> for Result<T, ServiceError> {
    fn with_meta(self, meta: &RequestMeta) -> Result<T, ApiErrorWithMeta> {
        self.map_err(|e| e.with_meta(meta.clone()))
    }
}

pub fn init_router(state: AppState) -> Router {
    // Uploads travel base64-encoded inside JSON bodies.
    let body_limit = state.config.max_upload_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/me", get(account::me).patch(account::update_me))
        .route("/me/avatar", put(account::upload_avatar))
        .route("/me/ledger", get(account::ledger))
        .route(
            "/me/preferences/{key}",
            get(account::get_preference).put(account::put_preference),
        )
        .route("/checkout", post(shop::checkout))
        .route("/quick-buy", post(shop::quick_buy))
        .route("/orders", get(shop::list_orders))
        .route("/orders/{id}", get(shop::get_order))
        .route("/orders/{id}/proof", get(shop::order_proof))
        .route("/deposits", post(shop::submit_deposit).get(shop::list_deposits))
        .route("/reports", post(shop::file_report))
        .route("/messages", post(chat::send))
        .route("/messages/{id}", patch(chat::edit).delete(chat::delete))
        .route("/messages/{id}/read", post(chat::mark_read))
        .route("/messages/{id}/reactions", post(chat::react))
        .route("/messages/{id}/media", get(chat::media))
        .route("/conversations/{id}/messages", get(chat::history))
        .route("/admin/orders", get(admin::list_orders))
        .route("/admin/orders/bulk-status", post(admin::bulk_status))
        .route("/admin/orders/events", get(admin::order_events))
        .route("/admin/orders/{id}/status", post(admin::set_status))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/reports", get(admin::list_reports))
        .route("/admin/reports/{id}/action", post(admin::report_action))
        .route("/admin/deposits", get(admin::list_deposits))
        .route("/admin/deposits/{id}/approve", post(admin::approve_deposit))
        .route("/admin/deposits/{id}/reject", post(admin::reject_deposit))
        .route("/admin/users/{id}/status", put(admin::set_user_status))
        .route("/files/{bucket}/{*path}", get(files::download))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}
