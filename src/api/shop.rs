use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, CurrentUser, IdempotencyKey, PageQuery, WithMeta};
use crate::checkout::{self, CheckoutRequest, Receipt};
use crate::deposits::{self, DepositRequest};
use crate::error::ApiErrorWithMeta;
use crate::orders;
use crate::quick_buy::{self, QuickBuyReceipt, QuickBuyRequest};
use crate::reports::{self, ReportRequest};
use crate::responses::{ApiOk, Pagination, RequestMeta};
use crate::storage::SignedUrl;
use crate::store::DepositFilter;
use crate::types::{Deposit, DepositStatus, Order, Report};

pub async fn checkout(
    State(st): State<AppState>,
    user: CurrentUser,
    key: IdempotencyKey,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CheckoutRequest>,
) -> Result<ApiOk<Receipt>, ApiErrorWithMeta> {
    let receipt = checkout::checkout(
        st.store.as_ref(),
        st.storage.as_ref(),
        &st.events,
        &user.actor,
        req,
        key.as_deref(),
    )
    .await
    .with_meta(&meta)?;

    if receipt.replayed {
        Ok(ApiOk::ok("order already placed", receipt, meta))
    } else {
        Ok(ApiOk::created("order placed", receipt, meta))
    }
}

pub async fn quick_buy(
    State(st): State<AppState>,
    user: CurrentUser,
    key: IdempotencyKey,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<QuickBuyRequest>,
) -> Result<ApiOk<QuickBuyReceipt>, ApiErrorWithMeta> {
    let receipt = quick_buy::quick_buy(
        st.store.as_ref(),
        &st.events,
        &user.actor,
        req,
        key.as_deref(),
    )
    .await
    .with_meta(&meta)?;

    if receipt.replayed {
        Ok(ApiOk::ok("purchase already completed", receipt, meta))
    } else {
        Ok(ApiOk::created("purchase completed", receipt, meta))
    }
}

pub async fn list_orders(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<PageQuery>,
) -> Result<ApiOk<Vec<Order>>, ApiErrorWithMeta> {
    let page = q.page();
    let (orders, total) = orders::list_own(st.store.as_ref(), &user.actor, page)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::paginated(
        "orders fetched",
        orders,
        Pagination::new(page, total),
        meta,
    ))
}

pub async fn get_order(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Order>, ApiErrorWithMeta> {
    let order = orders::get(st.store.as_ref(), &user.actor, id)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("order fetched", order, meta))
}

pub async fn order_proof(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<SignedUrl>, ApiErrorWithMeta> {
    let url = orders::proof_url(st.store.as_ref(), st.storage.as_ref(), &user.actor, id)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("proof link issued", url, meta))
}

pub async fn submit_deposit(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<DepositRequest>,
) -> Result<ApiOk<Deposit>, ApiErrorWithMeta> {
    let deposit = deposits::submit(st.store.as_ref(), st.storage.as_ref(), &user.actor, req)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::created("deposit submitted", deposit, meta))
}

#[derive(Debug, Deserialize)]
pub struct DepositQuery {
    pub status: Option<DepositStatus>,
    pub user_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl DepositQuery {
    pub fn split(self) -> (DepositFilter, PageQuery) {
        (
            DepositFilter {
                user_id: self.user_id,
                status: self.status,
            },
            PageQuery {
                page: self.page,
                per_page: self.per_page,
            },
        )
    }
}

pub async fn list_deposits(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<DepositQuery>,
) -> Result<ApiOk<Vec<Deposit>>, ApiErrorWithMeta> {
    let (filter, page) = q.split();
    let page = page.page();
    let (items, total) = deposits::list(st.store.as_ref(), &user.actor, filter, page)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::paginated(
        "deposits fetched",
        items,
        Pagination::new(page, total),
        meta,
    ))
}

pub async fn file_report(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ReportRequest>,
) -> Result<ApiOk<Report>, ApiErrorWithMeta> {
    let report = reports::file_report(st.store.as_ref(), &user.actor, req)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::created("report filed", report, meta))
}
