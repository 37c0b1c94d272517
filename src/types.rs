use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Declares a closed set of values persisted as text columns.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The persisted text form.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ServiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ServiceError::Validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// Moderation standing of a profile.
    pub enum AccountStatus {
        Good => "good",
        Banned => "banned",
        Warning => "warning",
        TemporaryBan => "temporary_ban",
    }
}

text_enum! {
    pub enum Role {
        Customer => "customer",
        Admin => "admin",
    }
}

text_enum! {
    /// Lifecycle of an order. `Finished`, `Rejected` and `Cancelled` are terminal.
    pub enum OrderStatus {
        Pending => "pending",
        Approved => "approved",
        Finished => "finished",
        Rejected => "rejected",
        Cancelled => "cancelled",
    }
}

text_enum! {
    pub enum PaymentMethod {
        CashOnDelivery => "cod",
        KbzPay => "kpay",
        WavePay => "wavepay",
        AyaPay => "ayapay",
        Wallet => "wallet",
    }
}

text_enum! {
    pub enum ProductCategory {
        Mlbb => "mlbb",
        Pubg => "pubg",
        FreeFire => "free_fire",
        MobileTopup => "mobile_topup",
        DataPlan => "data_plan",
        General => "general",
    }
}

text_enum! {
    pub enum MobileOperator {
        Mpt => "mpt",
        Atom => "atom",
        Ooredoo => "ooredoo",
        Mytel => "mytel",
    }
}

text_enum! {
    /// Which balance a ledger entry belongs to.
    pub enum BalanceKind {
        Points => "points",
        Wallet => "wallet",
    }
}

text_enum! {
    pub enum LedgerType {
        Purchase => "purchase",
        OrderReward => "order_reward",
        Refund => "refund",
        Deposit => "deposit",
        Adjustment => "adjustment",
    }
}

text_enum! {
    pub enum ReportStatus {
        Pending => "pending",
        Actioned => "actioned",
        Dismissed => "dismissed",
    }
}

text_enum! {
    /// Admin decision resolving a report.
    pub enum ModerationAction {
        Dismiss => "dismiss",
        Warning => "warning",
        TemporaryBan => "temporary_ban",
    }
}

text_enum! {
    pub enum ReactionKind {
        Like => "like",
        Heart => "heart",
    }
}

text_enum! {
    pub enum DepositStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl ProductCategory {
    /// Game top-ups are delivered to a player account.
    pub fn is_game(self) -> bool {
        matches!(
            self,
            ProductCategory::Mlbb | ProductCategory::Pubg | ProductCategory::FreeFire
        )
    }

    /// Mobile top-ups and data plans are delivered to a phone number.
    pub fn is_mobile(self) -> bool {
        matches!(self, ProductCategory::MobileTopup | ProductCategory::DataPlan)
    }
}

impl ModerationAction {
    /// The account status this action imposes on the reported user, if any.
    pub fn account_status(self) -> Option<AccountStatus> {
        match self {
            ModerationAction::Dismiss => None,
            ModerationAction::Warning => Some(AccountStatus::Warning),
            ModerationAction::TemporaryBan => Some(AccountStatus::TemporaryBan),
        }
    }
}

/// A user profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    pub phone: Option<String>,
    pub avatar_path: Option<String>,
    /// Reward points balance.
    pub points: i64,
    /// Wallet currency balance.
    pub wallet_balance: Decimal,
    pub account_status: AccountStatus,
    /// Set only while a temporary ban is in force.
    pub status_expires_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub premium_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A fresh customer profile with zero balances.
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name: display_name.into(),
            phone: None,
            avatar_path: None,
            points: 0,
            wallet_balance: Decimal::ZERO,
            account_status: AccountStatus::Good,
            status_expires_at: None,
            role: Role::Customer,
            premium_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The status as of `now`; a lapsed temporary ban reads as good standing.
    pub fn effective_status(&self, now: DateTime<Utc>) -> AccountStatus {
        match (self.account_status, self.status_expires_at) {
            (AccountStatus::TemporaryBan, Some(until)) if until <= now => AccountStatus::Good,
            (status, _) => status,
        }
    }

    pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
        self.premium_until.is_some_and(|until| until > now)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Editable profile fields. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    #[serde(skip)]
    pub avatar_path: Option<String>,
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category: ProductCategory,
    /// Currency price per unit.
    pub price: Decimal,
    /// Price per unit when redeemed with points.
    pub points_price: i64,
    /// Points earned per unit once an order is finished.
    pub points_value: i64,
    /// `None` means unlimited.
    pub stock_quantity: Option<i32>,
    pub is_premium: bool,
    pub is_active: bool,
}

impl Product {
    pub fn is_available(&self, quantity: i32) -> bool {
        self.is_active && self.stock_quantity.is_none_or(|stock| stock >= quantity)
    }
}

/// Where and to whom an order is delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub player_id: Option<String>,
    pub server_id: Option<String>,
    pub operator: Option<MobileOperator>,
    pub topup_phone: Option<String>,
}

/// A persisted order line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Line total captured at creation time.
    pub price: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Storage path inside the `payment-proofs` bucket.
    pub payment_proof_path: Option<String>,
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub points_awarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An order row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_proof_path: Option<String>,
    pub transaction_id: Option<String>,
    pub delivery: DeliveryInfo,
    pub idempotency_key: Option<String>,
}

impl NewOrder {
    /// Materializes the row as the store would return it.
    pub fn into_order(self, id: Uuid, now: DateTime<Utc>) -> Order {
        Order {
            id,
            user_id: self.user_id,
            product_id: self.product_id,
            quantity: self.quantity,
            price: self.price,
            status: OrderStatus::Pending,
            payment_method: self.payment_method,
            payment_proof_path: self.payment_proof_path,
            transaction_id: self.transaction_id,
            delivery: self.delivery,
            idempotency_key: self.idempotency_key,
            points_awarded_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filters for order listings. Every field narrows the result when set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|id| order.user_id == id)
            && self.status.is_none_or(|s| order.status == s)
            && self.payment_method.is_none_or(|m| order.payment_method == m)
            && self.from.is_none_or(|from| order.created_at >= from)
            && self.to.is_none_or(|to| order.created_at < to)
    }
}

/// An append-only balance change record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: BalanceKind,
    /// Signed: debits are negative.
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub transaction_type: LedgerType,
    pub order_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_user_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub admin_action: Option<ModerationAction>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub reporter_id: Uuid,
    pub reported_user_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: String,
    pub description: Option<String>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub media_path: Option<String>,
    pub media_type: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub media_path: Option<String>,
    pub media_type: Option<String>,
    pub reply_to_id: Option<Uuid>,
}

/// A mutation the sender or recipient may apply to an existing message.
#[derive(Debug, Clone)]
pub enum MessageChange {
    Edit(String),
    SoftDelete,
    MarkRead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionCount {
    pub kind: ReactionKind,
    pub count: i64,
}

/// A wallet top-up request awaiting admin review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_id: String,
    pub screenshot_path: String,
    pub status: DepositStatus,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_id: String,
    pub screenshot_path: String,
}

/// Order counts per status and revenue from finished orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub finished: i64,
    pub rejected: i64,
    pub cancelled: i64,
    pub revenue: Decimal,
}

impl OrderStats {
    pub fn count_mut(&mut self, status: OrderStatus) -> &mut i64 {
        match status {
            OrderStatus::Pending => &mut self.pending,
            OrderStatus::Approved => &mut self.approved,
            OrderStatus::Finished => &mut self.finished,
            OrderStatus::Rejected => &mut self.rejected,
            OrderStatus::Cancelled => &mut self.cancelled,
        }
    }
}

/// Per-day chart bucket keyed by order creation date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub orders: i64,
    /// Revenue of the day's orders that have finished.
    pub revenue: Decimal,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "Page::default_page")]
    pub page: u32,
    #[serde(default = "Page::default_per_page")]
    pub per_page: u32,
}

impl Page {
    pub const MAX_PER_PAGE: u32 = 100;

    fn default_page() -> u32 {
        1
    }

    fn default_per_page() -> u32 {
        20
    }

    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }.normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::default_page(), Self::default_per_page())
    }
}
