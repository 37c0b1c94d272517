//! Balance arithmetic and ledger entry construction shared by the stores.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::store::Store;
use crate::types::{BalanceKind, LedgerEntry, LedgerType, Order, Page, Product};

/// One balance change about to be recorded.
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub user_id: Uuid,
    pub kind: BalanceKind,
    pub amount: Decimal,
    pub transaction_type: LedgerType,
    pub order_id: Option<Uuid>,
    pub description: Option<String>,
}

impl BalanceChange {
    pub fn wallet_purchase(order: &Order, description: String) -> Self {
        Self {
            user_id: order.user_id,
            kind: BalanceKind::Wallet,
            amount: -order.price,
            transaction_type: LedgerType::Purchase,
            order_id: Some(order.id),
            description: Some(description),
        }
    }

    pub fn wallet_refund(order: &Order) -> Self {
        Self {
            user_id: order.user_id,
            kind: BalanceKind::Wallet,
            amount: order.price,
            transaction_type: LedgerType::Refund,
            order_id: Some(order.id),
            description: Some(format!("Refund for order {}", order.id)),
        }
    }

    pub fn order_reward(order: &Order, points: i64) -> Self {
        Self {
            user_id: order.user_id,
            kind: BalanceKind::Points,
            amount: Decimal::from(points),
            transaction_type: LedgerType::OrderReward,
            order_id: Some(order.id),
            description: Some(format!("Points for order {}", order.id)),
        }
    }

    pub fn deposit(user_id: Uuid, amount: Decimal, deposit_id: Uuid) -> Self {
        Self {
            user_id,
            kind: BalanceKind::Wallet,
            amount,
            transaction_type: LedgerType::Deposit,
            order_id: None,
            description: Some(format!("Deposit {deposit_id}")),
        }
    }

    /// Freezes the change into a ledger row carrying the resulting balance.
    pub fn into_entry(self, balance_after: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            balance_after,
            transaction_type: self.transaction_type,
            order_id: self.order_id,
            description: self.description,
            created_at: Utc::now(),
        }
    }
}

/// Balance left after taking `amount`, refusing to go below zero.
pub fn debit(balance: Decimal, amount: Decimal) -> Result<Decimal, ServiceError> {
    if amount > balance {
        return Err(ServiceError::InsufficientBalance {
            available: balance,
            required: amount,
        });
    }
    Ok(balance - amount)
}

/// Points earned when an order for `quantity` units finishes.
pub fn reward_points(points_value: i64, quantity: i32) -> i64 {
    points_value.saturating_mul(i64::from(quantity)).max(0)
}

pub fn purchase_description(product: &Product, quantity: i32) -> String {
    format!("Purchase: {} x{}", product.name, quantity)
}

/// Net effect of a set of entries on the balance they belong to.
pub fn net_change<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries.into_iter().map(|e| e.amount).sum()
}

/// A user's own ledger history, newest first.
pub async fn history(
    store: &dyn Store,
    user_id: Uuid,
    kind: BalanceKind,
    page: Page,
) -> Result<(Vec<LedgerEntry>, u64), ServiceError> {
    store.list_ledger(user_id, kind, page.normalized()).await
}
