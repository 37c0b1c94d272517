//! Persistence seam.
//!
//! Each method that touches more than one row is a single unit of work: the
//! Postgres store runs it inside one transaction, the memory store under one
//! lock. Callers never compose balance changes out of separate reads and
//! writes.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::ServiceError;
use crate::types::{
    AccountStatus, BalanceKind, DailyTotal, Deposit, DepositStatus, LedgerEntry, Message,
    MessageChange, ModerationAction, NewDeposit, NewMessage, NewOrder, NewReport, Order,
    OrderFilter, OrderStats, OrderStatus, Page, PaymentMethod, Product, Profile, ProfileUpdate,
    ReactionCount, ReactionKind, Report, ReportStatus,
};

/// Result of inserting a checkout's order lines.
#[derive(Debug, Clone)]
pub struct CreatedOrders {
    pub orders: Vec<Order>,
    /// The idempotency key matched an earlier submission; nothing was inserted.
    pub replayed: bool,
}

/// A wallet-funded purchase: debit, order insert and ledger entry together.
#[derive(Debug, Clone)]
pub struct WalletPurchase {
    pub order: NewOrder,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct WalletPurchaseOutcome {
    pub order: Order,
    pub balance_after: Decimal,
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    pub previous: OrderStatus,
    /// Points credited to the buyer by this transition.
    pub points_awarded: Option<i64>,
    /// Wallet amount returned to the buyer by this transition.
    pub refunded: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct ReportResolution {
    pub report_id: Uuid,
    pub action: ModerationAction,
    pub resolved_by: Uuid,
    pub resolved_at: DateTime<Utc>,
    /// Expiry stamped on the reported account for temporary bans.
    pub status_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ResolvedReport {
    pub report: Report,
    /// The reported account after the action, when the action changed it.
    pub reported_profile: Option<Profile>,
}

#[derive(Debug, Clone)]
pub struct DepositResolution {
    pub deposit_id: Uuid,
    pub approve: bool,
    pub resolved_by: Uuid,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DepositOutcome {
    pub deposit: Deposit,
    pub balance_after: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct DepositFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<DepositStatus>,
}

const KEY_REUSED: &str = "idempotency key was used for a different request";

/// Earlier orders under a checkout's idempotency key. A key that placed a
/// wallet purchase cannot be replayed as a checkout.
pub(crate) fn checkout_replay(existing: Vec<Order>) -> Result<Option<Vec<Order>>, ServiceError> {
    if existing.is_empty() {
        return Ok(None);
    }
    if existing
        .iter()
        .any(|o| o.payment_method == PaymentMethod::Wallet)
    {
        return Err(ServiceError::Conflict(KEY_REUSED.into()));
    }
    Ok(Some(existing))
}

/// Earlier orders under a quick-buy's idempotency key. Only the same wallet
/// purchase of the same product replays.
pub(crate) fn wallet_replay(
    existing: Vec<Order>,
    product_id: Uuid,
) -> Result<Option<Order>, ServiceError> {
    let mut existing = existing.into_iter();
    match (existing.next(), existing.next()) {
        (None, _) => Ok(None),
        (Some(order), None)
            if order.payment_method == PaymentMethod::Wallet && order.product_id == product_id =>
        {
            Ok(Some(order))
        }
        _ => Err(ServiceError::Conflict(KEY_REUSED.into())),
    }
}

/// Point-in-time dashboard aggregates plus the status of every order they count.
#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    pub stats: OrderStats,
    pub daily: Vec<DailyTotal>,
    pub statuses: Vec<(Uuid, OrderStatus)>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, ServiceError>;

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Profile, ServiceError>;

    async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Profile, ServiceError>;

    /// Fetches the products with the given ids; unknown ids are omitted.
    async fn get_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, ServiceError>;

    /// Inserts all lines as `pending` orders, or none of them.
    async fn create_orders(
        &self,
        user_id: Uuid,
        orders: Vec<NewOrder>,
        idempotency_key: Option<&str>,
    ) -> Result<CreatedOrders, ServiceError>;

    /// Debits the wallet with a floor check, inserts the order and appends the
    /// ledger entry as one unit.
    async fn purchase_with_wallet(
        &self,
        purchase: WalletPurchase,
    ) -> Result<WalletPurchaseOutcome, ServiceError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Newest first, ties broken by id.
    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: Page,
    ) -> Result<(Vec<Order>, u64), ServiceError>;

    /// Moves an order to `to` when legal, applying the point award and refund
    /// side effects in the same unit.
    async fn transition_order(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<TransitionOutcome, ServiceError>;

    /// Stats, daily totals from `since` and order statuses, read together.
    async fn dashboard_snapshot(&self, since: NaiveDate) -> Result<DashboardSnapshot, ServiceError>;

    /// Newest first.
    async fn list_ledger(
        &self,
        user_id: Uuid,
        kind: BalanceKind,
        page: Page,
    ) -> Result<(Vec<LedgerEntry>, u64), ServiceError>;

    async fn create_deposit(&self, deposit: NewDeposit) -> Result<Deposit, ServiceError>;

    async fn list_deposits(
        &self,
        filter: &DepositFilter,
        page: Page,
    ) -> Result<(Vec<Deposit>, u64), ServiceError>;

    /// Approving credits the wallet and appends a deposit ledger entry.
    async fn resolve_deposit(
        &self,
        resolution: DepositResolution,
    ) -> Result<DepositOutcome, ServiceError>;

    async fn create_report(&self, report: NewReport) -> Result<Report, ServiceError>;

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        page: Page,
    ) -> Result<(Vec<Report>, u64), ServiceError>;

    /// Marks a pending report actioned and applies the account status change.
    async fn resolve_report(
        &self,
        resolution: ReportResolution,
    ) -> Result<ResolvedReport, ServiceError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, ServiceError>;

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>, ServiceError>;

    async fn apply_message_change(
        &self,
        message_id: Uuid,
        change: MessageChange,
    ) -> Result<Message, ServiceError>;

    /// Oldest first.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Message>, u64), ServiceError>;

    /// Adds the reaction, or removes it when already present. Returns whether it is now set.
    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
    ) -> Result<bool, ServiceError>;

    async fn reaction_counts(&self, message_id: Uuid) -> Result<Vec<ReactionCount>, ServiceError>;

    async fn get_preference(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<serde_json::Value>, ServiceError>;

    async fn put_preference(
        &self,
        user_id: Uuid,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ServiceError>;
}
