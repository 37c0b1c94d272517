//! Order lookups for buyers and the admin dashboard.

use uuid::Uuid;

use crate::error::ServiceError;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::realtime::{self, DashboardView};
use crate::storage::{Bucket, FileStorage, SignedUrl};
use crate::store::Store;
use crate::types::{Order, OrderFilter, Page};

/// The caller's own orders, newest first.
pub async fn list_own(
    store: &dyn Store,
    actor: &Actor,
    page: Page,
) -> Result<(Vec<Order>, u64), ServiceError> {
    let filter = OrderFilter {
        user_id: Some(actor.user_id),
        ..Default::default()
    };
    store.list_orders(&filter, page.normalized()).await
}

/// Every order matching `filter`, for admins.
pub async fn list_all(
    store: &dyn Store,
    actor: &Actor,
    filter: &OrderFilter,
    page: Page,
) -> Result<(Vec<Order>, u64), ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(ServiceError::Validation("`from` must not be after `to`".into()));
        }
    }
    store.list_orders(filter, page.normalized()).await
}

pub async fn get(store: &dyn Store, actor: &Actor, order_id: Uuid) -> Result<Order, ServiceError> {
    let order = store
        .get_order(order_id)
        .await?
        .ok_or(ServiceError::NotFound("order"))?;
    authorize(actor, Action::View, Resource::Order(&order)).into_result()?;
    Ok(order)
}

/// A fresh signed link to an order's payment proof.
pub async fn proof_url(
    store: &dyn Store,
    storage: &dyn FileStorage,
    actor: &Actor,
    order_id: Uuid,
) -> Result<SignedUrl, ServiceError> {
    let order = get(store, actor, order_id).await?;
    let path = order
        .payment_proof_path
        .as_deref()
        .ok_or(ServiceError::NotFound("payment proof"))?;
    storage.create_signed_url(Bucket::PaymentProofs, path)
}

pub async fn dashboard(
    store: &dyn Store,
    actor: &Actor,
    days: i64,
) -> Result<DashboardView, ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;
    if !(1..=90).contains(&days) {
        return Err(ServiceError::Validation("days must be between 1 and 90".into()));
    }
    realtime::load_dashboard(store, days).await
}
