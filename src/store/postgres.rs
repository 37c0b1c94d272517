use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    CreatedOrders, DashboardSnapshot, DepositFilter, DepositOutcome, DepositResolution,
    ReportResolution, ResolvedReport, Store, TransitionOutcome, WalletPurchase,
    WalletPurchaseOutcome, checkout_replay, wallet_replay,
};
use crate::error::ServiceError;
use crate::ledger::{self, BalanceChange};
use crate::moderation;
use crate::types::{
    AccountStatus, BalanceKind, DailyTotal, DeliveryInfo, Deposit, DepositStatus, LedgerEntry,
    Message, MessageChange, NewDeposit, NewMessage, NewOrder, NewReport, Order, OrderFilter,
    OrderStats, OrderStatus, Page, PaymentMethod, Product, Profile, ProfileUpdate, ReactionCount,
    ReactionKind, Report, ReportStatus,
};

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_CHECK_VIOLATION: &str = "23514";

const PROFILE_COLUMNS: &str = "id, display_name, phone, avatar_path, points, wallet_balance, \
     account_status, status_expires_at, role, premium_until, created_at, updated_at";

const PRODUCT_COLUMNS: &str = "id, name, category, price, points_price, points_value, \
     stock_quantity, is_premium, is_active";

const ORDER_COLUMNS: &str = "id, user_id, product_id, quantity, price, status, payment_method, \
     payment_proof_path, transaction_id, customer_name, phone, address, player_id, server_id, \
     operator, topup_phone, idempotency_key, points_awarded_at, created_at, updated_at";

const DEPOSIT_COLUMNS: &str = "id, user_id, amount, payment_method, transaction_id, \
     screenshot_path, status, resolved_by, resolved_at, created_at";

const REPORT_COLUMNS: &str = "id, reporter_id, reported_user_id, message_id, reason, \
     description, status, admin_action, resolved_by, resolved_at, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, recipient_id, content, \
     media_path, media_type, reply_to_id, is_edited, is_deleted, read_at, created_at, updated_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn db_err(e: sqlx::Error) -> ServiceError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.code().as_deref() {
            Some(PG_UNIQUE_VIOLATION) => {
                return ServiceError::Conflict("duplicate submission".into());
            }
            Some(PG_CHECK_VIOLATION) => {
                return ServiceError::Conflict("balance would become negative".into());
            }
            _ => {}
        }
    }
    ServiceError::Database(e)
}

fn column<T>(value: &str) -> Result<T, ServiceError>
where
    T: std::str::FromStr<Err = ServiceError>,
{
    value
        .parse()
        .map_err(|e: ServiceError| ServiceError::Internal(format!("corrupt row: {e}")))
}

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    display_name: String,
    phone: Option<String>,
    avatar_path: Option<String>,
    points: i64,
    wallet_balance: Decimal,
    account_status: String,
    status_expires_at: Option<DateTime<Utc>>,
    role: String,
    premium_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = ServiceError;

    fn try_from(r: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            id: r.id,
            display_name: r.display_name,
            phone: r.phone,
            avatar_path: r.avatar_path,
            points: r.points,
            wallet_balance: r.wallet_balance,
            account_status: column(&r.account_status)?,
            status_expires_at: r.status_expires_at,
            role: column(&r.role)?,
            premium_until: r.premium_until,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    category: String,
    price: Decimal,
    points_price: i64,
    points_value: i64,
    stock_quantity: Option<i32>,
    is_premium: bool,
    is_active: bool,
}

impl TryFrom<ProductRow> for Product {
    type Error = ServiceError;

    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: r.id,
            name: r.name,
            // Categories the service has no rules for are plain goods.
            category: r.category.parse().unwrap_or(crate::types::ProductCategory::General),
            price: r.price,
            points_price: r.points_price,
            points_value: r.points_value,
            stock_quantity: r.stock_quantity,
            is_premium: r.is_premium,
            is_active: r.is_active,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    price: Decimal,
    status: String,
    payment_method: String,
    payment_proof_path: Option<String>,
    transaction_id: Option<String>,
    customer_name: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    player_id: Option<String>,
    server_id: Option<String>,
    operator: Option<String>,
    topup_phone: Option<String>,
    idempotency_key: Option<String>,
    points_awarded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = ServiceError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: r.id,
            user_id: r.user_id,
            product_id: r.product_id,
            quantity: r.quantity,
            price: r.price,
            status: column(&r.status)?,
            payment_method: column(&r.payment_method)?,
            payment_proof_path: r.payment_proof_path,
            transaction_id: r.transaction_id,
            delivery: DeliveryInfo {
                customer_name: r.customer_name,
                phone: r.phone,
                address: r.address,
                player_id: r.player_id,
                server_id: r.server_id,
                operator: r.operator.as_deref().map(column).transpose()?,
                topup_phone: r.topup_phone,
            },
            idempotency_key: r.idempotency_key,
            points_awarded_at: r.points_awarded_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    balance_after: Decimal,
    transaction_type: String,
    order_id: Option<Uuid>,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_entry(self, kind: BalanceKind) -> Result<LedgerEntry, ServiceError> {
        Ok(LedgerEntry {
            id: self.id,
            user_id: self.user_id,
            kind,
            amount: self.amount,
            balance_after: self.balance_after,
            transaction_type: column(&self.transaction_type)?,
            order_id: self.order_id,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct DepositRow {
    id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    payment_method: String,
    transaction_id: String,
    screenshot_path: String,
    status: String,
    resolved_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DepositRow> for Deposit {
    type Error = ServiceError;

    fn try_from(r: DepositRow) -> Result<Self, Self::Error> {
        Ok(Deposit {
            id: r.id,
            user_id: r.user_id,
            amount: r.amount,
            payment_method: column(&r.payment_method)?,
            transaction_id: r.transaction_id,
            screenshot_path: r.screenshot_path,
            status: column(&r.status)?,
            resolved_by: r.resolved_by,
            resolved_at: r.resolved_at,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct ReportRow {
    id: Uuid,
    reporter_id: Uuid,
    reported_user_id: Uuid,
    message_id: Option<Uuid>,
    reason: String,
    description: Option<String>,
    status: String,
    admin_action: Option<String>,
    resolved_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = ServiceError;

    fn try_from(r: ReportRow) -> Result<Self, Self::Error> {
        Ok(Report {
            id: r.id,
            reporter_id: r.reporter_id,
            reported_user_id: r.reported_user_id,
            message_id: r.message_id,
            reason: r.reason,
            description: r.description,
            status: column(&r.status)?,
            admin_action: r.admin_action.as_deref().map(column).transpose()?,
            resolved_by: r.resolved_by,
            resolved_at: r.resolved_at,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    recipient_id: Uuid,
    content: String,
    media_path: Option<String>,
    media_type: Option<String>,
    reply_to_id: Option<Uuid>,
    is_edited: bool,
    is_deleted: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(r: MessageRow) -> Self {
        Message {
            id: r.id,
            conversation_id: r.conversation_id,
            sender_id: r.sender_id,
            recipient_id: r.recipient_id,
            content: r.content,
            media_path: r.media_path,
            media_type: r.media_type,
            reply_to_id: r.reply_to_id,
            is_edited: r.is_edited,
            is_deleted: r.is_deleted,
            read_at: r.read_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, ServiceError>
where
    T: TryFrom<R, Error = ServiceError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Applies a balance change with a floor check and appends its ledger row.
///
/// The update only matches when the resulting balance stays non-negative, so
/// two concurrent debits can never both pass on the same funds.
async fn post(
    tx: &mut Transaction<'_, Postgres>,
    change: BalanceChange,
) -> Result<Decimal, ServiceError> {
    let after: Option<Decimal> = match change.kind {
        BalanceKind::Wallet => {
            sqlx::query_scalar(
                r#"UPDATE profiles SET wallet_balance = wallet_balance + $2, updated_at = now()
                   WHERE id = $1 AND wallet_balance + $2 >= 0
                   RETURNING wallet_balance"#,
            )
            .bind(change.user_id)
            .bind(change.amount)
            .fetch_optional(tx.as_mut())
            .await?
        }
        BalanceKind::Points => {
            let delta = i64::try_from(change.amount)
                .map_err(|_| ServiceError::Internal("points delta out of range".into()))?;
            sqlx::query_scalar::<_, i64>(
                r#"UPDATE profiles SET points = points + $2, updated_at = now()
                   WHERE id = $1 AND points + $2 >= 0
                   RETURNING points"#,
            )
            .bind(change.user_id)
            .bind(delta)
            .fetch_optional(tx.as_mut())
            .await?
            .map(Decimal::from)
        }
    };

    let Some(after) = after else {
        let balance_column = match change.kind {
            BalanceKind::Wallet => "wallet_balance",
            BalanceKind::Points => "points::numeric",
        };
        let available: Option<Decimal> =
            sqlx::query_scalar(&format!("SELECT {balance_column} FROM profiles WHERE id = $1"))
                .bind(change.user_id)
                .fetch_optional(tx.as_mut())
                .await?;
        return Err(match available {
            None => ServiceError::NotFound("profile"),
            Some(available) => ServiceError::InsufficientBalance {
                available,
                required: -change.amount,
            },
        });
    };

    let entry = change.into_entry(after);
    match entry.kind {
        BalanceKind::Wallet => {
            sqlx::query(
                r#"INSERT INTO wallet_transactions
                   (id, user_id, amount, balance_after, transaction_type, order_id, description, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            )
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(entry.amount)
            .bind(entry.balance_after)
            .bind(entry.transaction_type.as_str())
            .bind(entry.order_id)
            .bind(&entry.description)
            .bind(entry.created_at)
            .execute(tx.as_mut())
            .await
            .map_err(db_err)?;
        }
        BalanceKind::Points => {
            let amount = i64::try_from(entry.amount)
                .map_err(|_| ServiceError::Internal("points amount out of range".into()))?;
            let balance_after = i64::try_from(entry.balance_after)
                .map_err(|_| ServiceError::Internal("points balance out of range".into()))?;
            sqlx::query(
                r#"INSERT INTO point_transactions
                   (id, user_id, amount, balance_after, transaction_type, order_id, description, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            )
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(amount)
            .bind(balance_after)
            .bind(entry.transaction_type.as_str())
            .bind(entry.order_id)
            .bind(&entry.description)
            .bind(entry.created_at)
            .execute(tx.as_mut())
            .await
            .map_err(db_err)?;
        }
    }
    Ok(after)
}

async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &NewOrder,
) -> Result<Order, ServiceError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        r#"INSERT INTO orders
           (id, user_id, product_id, quantity, price, status, payment_method, payment_proof_path,
            transaction_id, customer_name, phone, address, player_id, server_id, operator,
            topup_phone, idempotency_key)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(Uuid::new_v4())
    .bind(order.user_id)
    .bind(order.product_id)
    .bind(order.quantity)
    .bind(order.price)
    .bind(OrderStatus::Pending.as_str())
    .bind(order.payment_method.as_str())
    .bind(&order.payment_proof_path)
    .bind(&order.transaction_id)
    .bind(&order.delivery.customer_name)
    .bind(&order.delivery.phone)
    .bind(&order.delivery.address)
    .bind(&order.delivery.player_id)
    .bind(&order.delivery.server_id)
    .bind(order.delivery.operator.map(|o| o.as_str()))
    .bind(&order.delivery.topup_phone)
    .bind(&order.idempotency_key)
    .fetch_one(tx.as_mut())
    .await
    .map_err(db_err)?;
    row.try_into()
}

async fn fetch_profile(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Profile, ServiceError> {
    sqlx::query_as::<_, ProfileRow>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
    ))
    .bind(user_id)
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(ServiceError::NotFound("profile"))?
    .try_into()
}

async fn keyed_orders(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    key: &str,
) -> Result<Vec<Order>, ServiceError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        r#"SELECT {ORDER_COLUMNS} FROM orders
           WHERE user_id = $1 AND idempotency_key = $2
           ORDER BY created_at, id"#
    ))
    .bind(user_id)
    .bind(key)
    .fetch_all(tx.as_mut())
    .await?;
    collect(rows)
}

#[async_trait]
impl Store for PgStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, ServiceError> {
        sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Profile::try_from)
        .transpose()
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Profile, ServiceError> {
        sqlx::query_as::<_, ProfileRow>(&format!(
            r#"UPDATE profiles SET
                 display_name = COALESCE($2, display_name),
                 phone = COALESCE($3, phone),
                 avatar_path = COALESCE($4, avatar_path),
                 updated_at = now()
               WHERE id = $1
               RETURNING {PROFILE_COLUMNS}"#
        ))
        .bind(user_id)
        .bind(update.display_name)
        .bind(update.phone)
        .bind(update.avatar_path)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("profile"))?
        .try_into()
    }

    async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Profile, ServiceError> {
        sqlx::query_as::<_, ProfileRow>(&format!(
            r#"UPDATE profiles SET account_status = $2, status_expires_at = $3, updated_at = now()
               WHERE id = $1
               RETURNING {PROFILE_COLUMNS}"#
        ))
        .bind(user_id)
        .bind(status.as_str())
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("profile"))?
        .try_into()
    }

    async fn get_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, ServiceError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn create_orders(
        &self,
        user_id: Uuid,
        orders: Vec<NewOrder>,
        idempotency_key: Option<&str>,
    ) -> Result<CreatedOrders, ServiceError> {
        let mut tx = self.pool.begin().await?;

        if let Some(key) = idempotency_key {
            let existing = keyed_orders(&mut tx, user_id, key).await?;
            if let Some(orders) = checkout_replay(existing)? {
                tx.commit().await?;
                return Ok(CreatedOrders {
                    orders,
                    replayed: true,
                });
            }
        }

        let mut created = Vec::with_capacity(orders.len());
        for order in &orders {
            created.push(insert_order(&mut tx, order).await?);
        }

        tx.commit().await?;
        Ok(CreatedOrders {
            orders: created,
            replayed: false,
        })
    }

    async fn purchase_with_wallet(
        &self,
        purchase: WalletPurchase,
    ) -> Result<WalletPurchaseOutcome, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let user_id = purchase.order.user_id;

        if let Some(key) = purchase.order.idempotency_key.as_deref() {
            let existing = keyed_orders(&mut tx, user_id, key).await?;
            if let Some(order) = wallet_replay(existing, purchase.order.product_id)? {
                let profile = fetch_profile(&mut tx, user_id).await?;
                tx.commit().await?;
                return Ok(WalletPurchaseOutcome {
                    order,
                    balance_after: profile.wallet_balance,
                    replayed: true,
                });
            }
        }

        // Debit first: a refusal here rolls back before anything is inserted.
        let order_id = Uuid::new_v4();
        let debit = BalanceChange {
            user_id,
            kind: BalanceKind::Wallet,
            amount: -purchase.order.price,
            transaction_type: crate::types::LedgerType::Purchase,
            order_id: Some(order_id),
            description: Some(purchase.description),
        };
        let balance_after = {
            let after: Option<Decimal> = sqlx::query_scalar(
                r#"UPDATE profiles SET wallet_balance = wallet_balance - $2, updated_at = now()
                   WHERE id = $1 AND wallet_balance >= $2
                   RETURNING wallet_balance"#,
            )
            .bind(user_id)
            .bind(purchase.order.price)
            .fetch_optional(tx.as_mut())
            .await?;
            match after {
                Some(after) => after,
                None => {
                    let profile = fetch_profile(&mut tx, user_id).await?;
                    return Err(ServiceError::InsufficientBalance {
                        available: profile.wallet_balance,
                        required: purchase.order.price,
                    });
                }
            }
        };

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"INSERT INTO orders
               (id, user_id, product_id, quantity, price, status, payment_method,
                customer_name, phone, address, player_id, server_id, operator, topup_phone,
                idempotency_key)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
               RETURNING {ORDER_COLUMNS}"#
        ))
        .bind(order_id)
        .bind(user_id)
        .bind(purchase.order.product_id)
        .bind(purchase.order.quantity)
        .bind(purchase.order.price)
        .bind(OrderStatus::Pending.as_str())
        .bind(PaymentMethod::Wallet.as_str())
        .bind(&purchase.order.delivery.customer_name)
        .bind(&purchase.order.delivery.phone)
        .bind(&purchase.order.delivery.address)
        .bind(&purchase.order.delivery.player_id)
        .bind(&purchase.order.delivery.server_id)
        .bind(purchase.order.delivery.operator.map(|o| o.as_str()))
        .bind(&purchase.order.delivery.topup_phone)
        .bind(&purchase.order.idempotency_key)
        .fetch_one(tx.as_mut())
        .await
        .map_err(db_err)?;
        let order = Order::try_from(row)?;

        let entry = debit.into_entry(balance_after);
        sqlx::query(
            r#"INSERT INTO wallet_transactions
               (id, user_id, amount, balance_after, transaction_type, order_id, description, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.transaction_type.as_str())
        .bind(entry.order_id)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(tx.as_mut())
        .await
        .map_err(db_err)?;

        tx.commit().await?;
        Ok(WalletPurchaseOutcome {
            order,
            balance_after,
            replayed: false,
        })
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Order::try_from)
        .transpose()
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: Page,
    ) -> Result<(Vec<Order>, u64), ServiceError> {
        const WHERE: &str = r#"WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR payment_method = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)"#;

        let status = filter.status.map(|s| s.as_str());
        let method = filter.payment_method.map(|m| m.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders {WHERE}"))
            .bind(filter.user_id)
            .bind(status)
            .bind(method)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders {WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $6 OFFSET $7"
        ))
        .bind(filter.user_id)
        .bind(status)
        .bind(method)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((collect(rows)?, total.max(0) as u64))
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<TransitionOutcome, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let current: Order = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or(ServiceError::NotFound("order"))?
        .try_into()?;

        let previous = current.status;
        if !moderation::is_legal(previous, to) {
            return Err(ServiceError::InvalidTransition { from: previous, to });
        }

        let mut order: Order = sqlx::query_as::<_, OrderRow>(&format!(
            r#"UPDATE orders SET status = $2, updated_at = now()
               WHERE id = $1
               RETURNING {ORDER_COLUMNS}"#
        ))
        .bind(order_id)
        .bind(to.as_str())
        .fetch_one(tx.as_mut())
        .await?
        .try_into()?;

        let mut points_awarded = None;
        if to == OrderStatus::Finished && order.points_awarded_at.is_none() {
            let points_value: i64 =
                sqlx::query_scalar("SELECT points_value FROM products WHERE id = $1")
                    .bind(order.product_id)
                    .fetch_optional(tx.as_mut())
                    .await?
                    .unwrap_or(0);
            let points = ledger::reward_points(points_value, order.quantity);
            if points > 0 {
                post(&mut tx, BalanceChange::order_reward(&order, points)).await?;
                points_awarded = Some(points);
            }
            order.points_awarded_at = sqlx::query_scalar(
                "UPDATE orders SET points_awarded_at = now() WHERE id = $1 RETURNING points_awarded_at",
            )
            .bind(order_id)
            .fetch_one(tx.as_mut())
            .await?;
        }

        let mut refunded = None;
        if matches!(to, OrderStatus::Rejected | OrderStatus::Cancelled)
            && order.payment_method == PaymentMethod::Wallet
            && order.price > Decimal::ZERO
        {
            post(&mut tx, BalanceChange::wallet_refund(&order)).await?;
            refunded = Some(order.price);
        }

        tx.commit().await?;
        Ok(TransitionOutcome {
            order,
            previous,
            points_awarded,
            refunded,
        })
    }

    async fn dashboard_snapshot(&self, since: NaiveDate) -> Result<DashboardSnapshot, ServiceError> {
        let mut tx = self.pool.begin().await?;
        // All three reads see the same committed orders.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(tx.as_mut())
            .await?;

        let rows: Vec<(String, i64, Decimal)> = sqlx::query_as(
            r#"SELECT status, COUNT(*), COALESCE(SUM(price), 0)
               FROM orders GROUP BY status"#,
        )
        .fetch_all(tx.as_mut())
        .await?;
        let mut stats = OrderStats::default();
        for (status, count, sum) in rows {
            let status: OrderStatus = column(&status)?;
            stats.total += count;
            *stats.count_mut(status) += count;
            if status == OrderStatus::Finished {
                stats.revenue = sum;
            }
        }

        let daily: Vec<(NaiveDate, i64, Decimal)> = sqlx::query_as(
            r#"SELECT (created_at AT TIME ZONE 'UTC')::date AS day,
                      COUNT(*),
                      COALESCE(SUM(price) FILTER (WHERE status = 'finished'), 0)
               FROM orders
               WHERE created_at >= $1
               GROUP BY day
               ORDER BY day"#,
        )
        .bind(since.and_time(NaiveTime::MIN).and_utc())
        .fetch_all(tx.as_mut())
        .await?;

        let rows: Vec<(Uuid, String)> = sqlx::query_as("SELECT id, status FROM orders")
            .fetch_all(tx.as_mut())
            .await?;
        let mut statuses = Vec::with_capacity(rows.len());
        for (id, status) in rows {
            statuses.push((id, column::<OrderStatus>(&status)?));
        }

        tx.commit().await?;
        Ok(DashboardSnapshot {
            stats,
            daily: daily
                .into_iter()
                .map(|(day, orders, revenue)| DailyTotal {
                    day,
                    orders,
                    revenue,
                })
                .collect(),
            statuses,
        })
    }

    async fn list_ledger(
        &self,
        user_id: Uuid,
        kind: BalanceKind,
        page: Page,
    ) -> Result<(Vec<LedgerEntry>, u64), ServiceError> {
        let table = match kind {
            BalanceKind::Wallet => "wallet_transactions",
            BalanceKind::Points => "point_transactions",
        };

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE user_id = $1"))
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            r#"SELECT id, user_id, amount::numeric AS amount,
                      balance_after::numeric AS balance_after,
                      transaction_type, order_id, description, created_at
               FROM {table}
               WHERE user_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2 OFFSET $3"#
        ))
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|r| r.into_entry(kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entries, total.max(0) as u64))
    }

    async fn create_deposit(&self, deposit: NewDeposit) -> Result<Deposit, ServiceError> {
        sqlx::query_as::<_, DepositRow>(&format!(
            r#"INSERT INTO deposits
               (id, user_id, amount, payment_method, transaction_id, screenshot_path, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {DEPOSIT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(deposit.user_id)
        .bind(deposit.amount)
        .bind(deposit.payment_method.as_str())
        .bind(&deposit.transaction_id)
        .bind(&deposit.screenshot_path)
        .bind(DepositStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_into()
    }

    async fn list_deposits(
        &self,
        filter: &DepositFilter,
        page: Page,
    ) -> Result<(Vec<Deposit>, u64), ServiceError> {
        const WHERE: &str =
            "WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)";
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM deposits {WHERE}"))
            .bind(filter.user_id)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits {WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(filter.user_id)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((collect(rows)?, total.max(0) as u64))
    }

    async fn resolve_deposit(
        &self,
        resolution: DepositResolution,
    ) -> Result<DepositOutcome, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let current: Deposit = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1 FOR UPDATE"
        ))
        .bind(resolution.deposit_id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or(ServiceError::NotFound("deposit"))?
        .try_into()?;

        if current.status != DepositStatus::Pending {
            return Err(ServiceError::AlreadyResolved("deposit"));
        }

        let (status, balance_after) = if resolution.approve {
            let change = BalanceChange::deposit(current.user_id, current.amount, current.id);
            (DepositStatus::Approved, Some(post(&mut tx, change).await?))
        } else {
            (DepositStatus::Rejected, None)
        };

        let deposit: Deposit = sqlx::query_as::<_, DepositRow>(&format!(
            r#"UPDATE deposits SET status = $2, resolved_by = $3, resolved_at = $4
               WHERE id = $1
               RETURNING {DEPOSIT_COLUMNS}"#
        ))
        .bind(resolution.deposit_id)
        .bind(status.as_str())
        .bind(resolution.resolved_by)
        .bind(resolution.resolved_at)
        .fetch_one(tx.as_mut())
        .await?
        .try_into()?;

        tx.commit().await?;
        Ok(DepositOutcome {
            deposit,
            balance_after,
        })
    }

    async fn create_report(&self, report: NewReport) -> Result<Report, ServiceError> {
        sqlx::query_as::<_, ReportRow>(&format!(
            r#"INSERT INTO reports
               (id, reporter_id, reported_user_id, message_id, reason, description, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {REPORT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(report.reporter_id)
        .bind(report.reported_user_id)
        .bind(report.message_id)
        .bind(&report.reason)
        .bind(&report.description)
        .bind(ReportStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_into()
    }

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        page: Page,
    ) -> Result<(Vec<Report>, u64), ServiceError> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reports WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((collect(rows)?, total.max(0) as u64))
    }

    async fn resolve_report(
        &self,
        resolution: ReportResolution,
    ) -> Result<ResolvedReport, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let current: Report = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1 FOR UPDATE"
        ))
        .bind(resolution.report_id)
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or(ServiceError::NotFound("report"))?
        .try_into()?;

        if current.status != ReportStatus::Pending {
            return Err(ServiceError::AlreadyResolved("report"));
        }

        let reported_profile: Option<Profile> = match resolution.action.account_status() {
            Some(status) => Some(
                sqlx::query_as::<_, ProfileRow>(&format!(
                    r#"UPDATE profiles SET account_status = $2, status_expires_at = $3, updated_at = $4
                       WHERE id = $1
                       RETURNING {PROFILE_COLUMNS}"#
                ))
                .bind(current.reported_user_id)
                .bind(status.as_str())
                .bind(resolution.status_expires_at)
                .bind(resolution.resolved_at)
                .fetch_optional(tx.as_mut())
                .await?
                .ok_or(ServiceError::NotFound("profile"))?
                .try_into()?,
            ),
            None => None,
        };

        let report: Report = sqlx::query_as::<_, ReportRow>(&format!(
            r#"UPDATE reports SET status = $2, admin_action = $3, resolved_by = $4, resolved_at = $5
               WHERE id = $1
               RETURNING {REPORT_COLUMNS}"#
        ))
        .bind(resolution.report_id)
        .bind(ReportStatus::Actioned.as_str())
        .bind(resolution.action.as_str())
        .bind(resolution.resolved_by)
        .bind(resolution.resolved_at)
        .fetch_one(tx.as_mut())
        .await?
        .try_into()?;

        tx.commit().await?;
        Ok(ResolvedReport {
            report,
            reported_profile,
        })
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, ServiceError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"INSERT INTO messages
               (id, conversation_id, sender_id, recipient_id, content, media_path, media_type, reply_to_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {MESSAGE_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(&message.content)
        .bind(&message.media_path)
        .bind(&message.media_type)
        .bind(message.reply_to_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>, ServiceError> {
        Ok(sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Message::from))
    }

    async fn apply_message_change(
        &self,
        message_id: Uuid,
        change: MessageChange,
    ) -> Result<Message, ServiceError> {
        let query = match &change {
            MessageChange::Edit(_) => format!(
                "UPDATE messages SET content = $2, is_edited = true, updated_at = now() \
                 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
            ),
            MessageChange::SoftDelete => format!(
                "UPDATE messages SET content = '', media_path = NULL, media_type = NULL, \
                 is_deleted = true, updated_at = now() WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
            ),
            MessageChange::MarkRead => format!(
                "UPDATE messages SET read_at = COALESCE(read_at, now()) \
                 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
            ),
        };

        let mut q = sqlx::query_as::<_, MessageRow>(&query).bind(message_id);
        if let MessageChange::Edit(content) = change {
            q = q.bind(content);
        }
        Ok(q.fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound("message"))?
            .into())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Message>, u64), ServiceError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at, id LIMIT $2 OFFSET $3"
        ))
        .bind(conversation_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((
            rows.into_iter().map(Message::from).collect(),
            total.max(0) as u64,
        ))
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND kind = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(kind.as_str())
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        if removed == 0 {
            sqlx::query(
                r#"INSERT INTO message_reactions (message_id, user_id, kind) VALUES ($1, $2, $3)
                   ON CONFLICT (message_id, user_id, kind) DO NOTHING"#,
            )
            .bind(message_id)
            .bind(user_id)
            .bind(kind.as_str())
            .execute(tx.as_mut())
            .await?;
        }

        tx.commit().await?;
        Ok(removed == 0)
    }

    async fn reaction_counts(&self, message_id: Uuid) -> Result<Vec<ReactionCount>, ServiceError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, COUNT(*) FROM message_reactions WHERE message_id = $1 GROUP BY kind",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = rows
            .into_iter()
            .map(|(kind, count)| Ok(ReactionCount { kind: column(&kind)?, count }))
            .collect::<Result<Vec<_>, ServiceError>>()?;
        counts.sort_by_key(|c| ReactionKind::ALL.iter().position(|k| *k == c.kind));
        Ok(counts)
    }

    async fn get_preference(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<serde_json::Value>, ServiceError> {
        Ok(sqlx::query_scalar(
            "SELECT value FROM user_preferences WHERE user_id = $1 AND key = $2",
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn put_preference(
        &self,
        user_id: Uuid,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"INSERT INTO user_preferences (user_id, key, value, updated_at)
               VALUES ($1, $2, $3, now())
               ON CONFLICT (user_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()"#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
