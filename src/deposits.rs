//! Wallet top-ups reviewed by an admin.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::checkout::parse_transaction_id;
use crate::error::ServiceError;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::storage::{self, Bucket, FileStorage, Upload};
use crate::store::{DepositFilter, DepositOutcome, DepositResolution, Store};
use crate::types::{Deposit, DepositStatus, NewDeposit, Page, PaymentMethod};

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_id: String,
    pub screenshot: Upload,
}

pub async fn submit(
    store: &dyn Store,
    storage: &dyn FileStorage,
    actor: &Actor,
    req: DepositRequest,
) -> Result<Deposit, ServiceError> {
    if req.amount <= Decimal::ZERO {
        return Err(ServiceError::Validation("amount must be positive".into()));
    }
    if matches!(
        req.payment_method,
        PaymentMethod::Wallet | PaymentMethod::CashOnDelivery
    ) {
        return Err(ServiceError::Validation(format!(
            "deposits cannot be paid with {}",
            req.payment_method
        )));
    }
    let transaction_id = parse_transaction_id(&req.transaction_id)?;

    let screenshot_path = req
        .screenshot
        .store(storage, Bucket::DepositScreenshots, actor.user_id)
        .await?;
    let created = store
        .create_deposit(NewDeposit {
            user_id: actor.user_id,
            amount: req.amount,
            payment_method: req.payment_method,
            transaction_id,
            screenshot_path: screenshot_path.clone(),
        })
        .await;

    match created {
        Ok(deposit) => {
            info!(deposit_id = %deposit.id, user_id = %actor.user_id, amount = %deposit.amount, "deposit submitted");
            Ok(deposit)
        }
        Err(e) => {
            storage::discard(storage, Bucket::DepositScreenshots, &screenshot_path).await;
            Err(e)
        }
    }
}

/// The caller's own deposits, or any deposits for an admin.
pub async fn list(
    store: &dyn Store,
    actor: &Actor,
    mut filter: DepositFilter,
    page: Page,
) -> Result<(Vec<Deposit>, u64), ServiceError> {
    if !actor.is_admin() {
        filter.user_id = Some(actor.user_id);
    }
    store.list_deposits(&filter, page.normalized()).await
}

pub async fn resolve(
    store: &dyn Store,
    actor: &Actor,
    deposit_id: Uuid,
    approve: bool,
) -> Result<DepositOutcome, ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;
    let outcome = store
        .resolve_deposit(DepositResolution {
            deposit_id,
            approve,
            resolved_by: actor.user_id,
            resolved_at: Utc::now(),
        })
        .await?;
    info!(
        %deposit_id,
        admin = %actor.user_id,
        approved = outcome.deposit.status == DepositStatus::Approved,
        balance_after = ?outcome.balance_after,
        "deposit resolved"
    );
    Ok(outcome)
}
