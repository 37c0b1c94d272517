use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
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
    AccountStatus, BalanceKind, DailyTotal, Deposit, DepositStatus, LedgerEntry, Message,
    MessageChange, NewDeposit, NewMessage, NewOrder, NewReport, Order, OrderFilter, OrderStats,
    OrderStatus, Page, PaymentMethod, Product, Profile, ProfileUpdate, ReactionCount,
    ReactionKind, Report, ReportStatus,
};

#[derive(Default)]
struct State {
    profiles: HashMap<Uuid, Profile>,
    products: HashMap<Uuid, Product>,
    orders: Vec<Order>,
    ledger: Vec<LedgerEntry>,
    deposits: Vec<Deposit>,
    reports: Vec<Report>,
    messages: Vec<Message>,
    reactions: HashSet<(Uuid, Uuid, ReactionKind)>,
    preferences: HashMap<(Uuid, String), serde_json::Value>,
}

/// Process-local store. Every trait method runs under one lock, so each is
/// all-or-nothing just like a database transaction.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn paginate<T>(items: Vec<T>, page: Page) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    (page, total)
}

fn newest_first(a: &Order, b: &Order) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn balance_of(profile: &Profile, kind: BalanceKind) -> Decimal {
    match kind {
        BalanceKind::Points => Decimal::from(profile.points),
        BalanceKind::Wallet => profile.wallet_balance,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.state.lock().profiles.insert(profile.id, profile);
    }

    pub fn insert_product(&self, product: Product) {
        self.state.lock().products.insert(product.id, product);
    }

    pub fn profile(&self, user_id: Uuid) -> Option<Profile> {
        self.state.lock().profiles.get(&user_id).cloned()
    }

    /// Every order, in insertion order.
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    /// Every ledger entry of one balance, oldest first.
    pub fn ledger_entries(&self, user_id: Uuid, kind: BalanceKind) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id && e.kind == kind)
            .cloned()
            .collect()
    }

    /// Unconditional full-value write of a wallet balance, bypassing the ledger.
    pub fn overwrite_wallet_balance(&self, user_id: Uuid, balance: Decimal) {
        if let Some(profile) = self.state.lock().profiles.get_mut(&user_id) {
            profile.wallet_balance = balance;
            profile.updated_at = Utc::now();
        }
    }
}

impl State {
    /// Applies a credit or debit and appends its ledger row.
    fn post(&mut self, change: BalanceChange) -> Result<Decimal, ServiceError> {
        let profile = self
            .profiles
            .get_mut(&change.user_id)
            .ok_or(ServiceError::NotFound("profile"))?;

        let balance = balance_of(profile, change.kind);
        let after = if change.amount.is_sign_negative() {
            ledger::debit(balance, -change.amount)?
        } else {
            balance + change.amount
        };

        match change.kind {
            BalanceKind::Points => {
                profile.points = i64::try_from(after)
                    .map_err(|_| ServiceError::Internal("points overflow".into()))?;
            }
            BalanceKind::Wallet => profile.wallet_balance = after,
        }
        profile.updated_at = Utc::now();
        self.ledger.push(change.into_entry(after));
        Ok(after)
    }

    fn keyed_orders(&self, user_id: Uuid, key: &str) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|o| o.user_id == user_id && o.idempotency_key.as_deref() == Some(key))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, ServiceError> {
        Ok(self.profile(user_id))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Profile, ServiceError> {
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or(ServiceError::NotFound("profile"))?;
        if let Some(name) = update.display_name {
            profile.display_name = name;
        }
        if let Some(phone) = update.phone {
            profile.phone = Some(phone);
        }
        if let Some(path) = update.avatar_path {
            profile.avatar_path = Some(path);
        }
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Profile, ServiceError> {
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or(ServiceError::NotFound("profile"))?;
        profile.account_status = status;
        profile.status_expires_at = expires_at;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn get_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, ServiceError> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn create_orders(
        &self,
        user_id: Uuid,
        orders: Vec<NewOrder>,
        idempotency_key: Option<&str>,
    ) -> Result<CreatedOrders, ServiceError> {
        let mut state = self.state.lock();

        if let Some(key) = idempotency_key {
            if let Some(orders) = checkout_replay(state.keyed_orders(user_id, key))? {
                return Ok(CreatedOrders {
                    orders,
                    replayed: true,
                });
            }
            // Mirrors the (user_id, idempotency_key, product_id) unique key.
            let mut products = HashSet::new();
            if !orders.iter().all(|o| products.insert(o.product_id)) {
                return Err(ServiceError::Conflict("duplicate submission".into()));
            }
        }

        let now = Utc::now();
        let created: Vec<Order> = orders
            .into_iter()
            .map(|o| o.into_order(Uuid::new_v4(), now))
            .collect();
        state.orders.extend(created.iter().cloned());
        Ok(CreatedOrders {
            orders: created,
            replayed: false,
        })
    }

    async fn purchase_with_wallet(
        &self,
        purchase: WalletPurchase,
    ) -> Result<WalletPurchaseOutcome, ServiceError> {
        let mut state = self.state.lock();
        let user_id = purchase.order.user_id;

        if let Some(key) = purchase.order.idempotency_key.as_deref() {
            let existing = state.keyed_orders(user_id, key);
            if let Some(order) = wallet_replay(existing, purchase.order.product_id)? {
                let balance_after = state
                    .profiles
                    .get(&user_id)
                    .map(|p| p.wallet_balance)
                    .unwrap_or_default();
                return Ok(WalletPurchaseOutcome {
                    order,
                    balance_after,
                    replayed: true,
                });
            }
        }

        // Check the floor before touching anything so a refusal leaves no trace.
        let profile = state
            .profiles
            .get(&user_id)
            .ok_or(ServiceError::NotFound("profile"))?;
        ledger::debit(profile.wallet_balance, purchase.order.price)?;

        let order = purchase.order.into_order(Uuid::new_v4(), Utc::now());
        let balance_after = state.post(BalanceChange::wallet_purchase(&order, purchase.description))?;
        state.orders.push(order.clone());

        Ok(WalletPurchaseOutcome {
            order,
            balance_after,
            replayed: false,
        })
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self
            .state
            .lock()
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: Page,
    ) -> Result<(Vec<Order>, u64), ServiceError> {
        let mut matched: Vec<Order> = self
            .state
            .lock()
            .orders
            .iter()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        matched.sort_by(newest_first);
        Ok(paginate(matched, page))
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<TransitionOutcome, ServiceError> {
        let mut state = self.state.lock();
        let idx = state
            .orders
            .iter()
            .position(|o| o.id == order_id)
            .ok_or(ServiceError::NotFound("order"))?;

        let previous = state.orders[idx].status;
        if !moderation::is_legal(previous, to) {
            return Err(ServiceError::InvalidTransition { from: previous, to });
        }

        let now = Utc::now();
        let mut order = state.orders[idx].clone();
        order.status = to;
        order.updated_at = now;

        let mut points_awarded = None;
        if to == OrderStatus::Finished && order.points_awarded_at.is_none() {
            let points_value = state
                .products
                .get(&order.product_id)
                .map(|p| p.points_value)
                .unwrap_or(0);
            let points = ledger::reward_points(points_value, order.quantity);
            if points > 0 {
                state.post(BalanceChange::order_reward(&order, points))?;
                points_awarded = Some(points);
            }
            order.points_awarded_at = Some(now);
        }

        let mut refunded = None;
        if matches!(to, OrderStatus::Rejected | OrderStatus::Cancelled)
            && order.payment_method == PaymentMethod::Wallet
            && order.price > Decimal::ZERO
        {
            state.post(BalanceChange::wallet_refund(&order))?;
            refunded = Some(order.price);
        }

        state.orders[idx] = order.clone();
        Ok(TransitionOutcome {
            order,
            previous,
            points_awarded,
            refunded,
        })
    }

    async fn dashboard_snapshot(&self, since: NaiveDate) -> Result<DashboardSnapshot, ServiceError> {
        let state = self.state.lock();
        let mut stats = OrderStats::default();
        let mut days: BTreeMap<NaiveDate, DailyTotal> = BTreeMap::new();
        let mut statuses = Vec::with_capacity(state.orders.len());
        for order in &state.orders {
            let finished = order.status == OrderStatus::Finished;
            stats.total += 1;
            *stats.count_mut(order.status) += 1;
            if finished {
                stats.revenue += order.price;
            }
            statuses.push((order.id, order.status));

            let day = order.created_at.date_naive();
            if day < since {
                continue;
            }
            let bucket = days.entry(day).or_insert_with(|| DailyTotal {
                day,
                orders: 0,
                revenue: Decimal::ZERO,
            });
            bucket.orders += 1;
            if finished {
                bucket.revenue += order.price;
            }
        }
        Ok(DashboardSnapshot {
            stats,
            daily: days.into_values().collect(),
            statuses,
        })
    }

    async fn list_ledger(
        &self,
        user_id: Uuid,
        kind: BalanceKind,
        page: Page,
    ) -> Result<(Vec<LedgerEntry>, u64), ServiceError> {
        let mut entries = self.ledger_entries(user_id, kind);
        entries.reverse();
        Ok(paginate(entries, page))
    }

    async fn create_deposit(&self, deposit: NewDeposit) -> Result<Deposit, ServiceError> {
        let deposit = Deposit {
            id: Uuid::new_v4(),
            user_id: deposit.user_id,
            amount: deposit.amount,
            payment_method: deposit.payment_method,
            transaction_id: deposit.transaction_id,
            screenshot_path: deposit.screenshot_path,
            status: DepositStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        };
        self.state.lock().deposits.push(deposit.clone());
        Ok(deposit)
    }

    async fn list_deposits(
        &self,
        filter: &DepositFilter,
        page: Page,
    ) -> Result<(Vec<Deposit>, u64), ServiceError> {
        let matched: Vec<Deposit> = self
            .state
            .lock()
            .deposits
            .iter()
            .rev()
            .filter(|d| filter.user_id.is_none_or(|u| d.user_id == u))
            .filter(|d| filter.status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        Ok(paginate(matched, page))
    }

    async fn resolve_deposit(
        &self,
        resolution: DepositResolution,
    ) -> Result<DepositOutcome, ServiceError> {
        let mut state = self.state.lock();
        let idx = state
            .deposits
            .iter()
            .position(|d| d.id == resolution.deposit_id)
            .ok_or(ServiceError::NotFound("deposit"))?;
        if state.deposits[idx].status != DepositStatus::Pending {
            return Err(ServiceError::AlreadyResolved("deposit"));
        }

        let balance_after = if resolution.approve {
            let d = &state.deposits[idx];
            let change = BalanceChange::deposit(d.user_id, d.amount, d.id);
            Some(state.post(change)?)
        } else {
            None
        };

        let deposit = &mut state.deposits[idx];
        deposit.status = if resolution.approve {
            DepositStatus::Approved
        } else {
            DepositStatus::Rejected
        };
        deposit.resolved_by = Some(resolution.resolved_by);
        deposit.resolved_at = Some(resolution.resolved_at);

        Ok(DepositOutcome {
            deposit: deposit.clone(),
            balance_after,
        })
    }

    async fn create_report(&self, report: NewReport) -> Result<Report, ServiceError> {
        let report = Report {
            id: Uuid::new_v4(),
            reporter_id: report.reporter_id,
            reported_user_id: report.reported_user_id,
            message_id: report.message_id,
            reason: report.reason,
            description: report.description,
            status: ReportStatus::Pending,
            admin_action: None,
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        };
        self.state.lock().reports.push(report.clone());
        Ok(report)
    }

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        page: Page,
    ) -> Result<(Vec<Report>, u64), ServiceError> {
        let matched: Vec<Report> = self
            .state
            .lock()
            .reports
            .iter()
            .rev()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        Ok(paginate(matched, page))
    }

    async fn resolve_report(
        &self,
        resolution: ReportResolution,
    ) -> Result<ResolvedReport, ServiceError> {
        let mut state = self.state.lock();
        let idx = state
            .reports
            .iter()
            .position(|r| r.id == resolution.report_id)
            .ok_or(ServiceError::NotFound("report"))?;
        if state.reports[idx].status != ReportStatus::Pending {
            return Err(ServiceError::AlreadyResolved("report"));
        }

        let reported_user_id = state.reports[idx].reported_user_id;
        let reported_profile = match resolution.action.account_status() {
            Some(status) => {
                let profile = state
                    .profiles
                    .get_mut(&reported_user_id)
                    .ok_or(ServiceError::NotFound("profile"))?;
                profile.account_status = status;
                profile.status_expires_at = resolution.status_expires_at;
                profile.updated_at = resolution.resolved_at;
                Some(profile.clone())
            }
            None => None,
        };

        let report = &mut state.reports[idx];
        report.status = ReportStatus::Actioned;
        report.admin_action = Some(resolution.action);
        report.resolved_by = Some(resolution.resolved_by);
        report.resolved_at = Some(resolution.resolved_at);

        Ok(ResolvedReport {
            report: report.clone(),
            reported_profile,
        })
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, ServiceError> {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            content: message.content,
            media_path: message.media_path,
            media_type: message.media_type,
            reply_to_id: message.reply_to_id,
            is_edited: false,
            is_deleted: false,
            read_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().messages.push(message.clone());
        Ok(message)
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>, ServiceError> {
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn apply_message_change(
        &self,
        message_id: Uuid,
        change: MessageChange,
    ) -> Result<Message, ServiceError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(ServiceError::NotFound("message"))?;

        let now = Utc::now();
        match change {
            MessageChange::Edit(content) => {
                message.content = content;
                message.is_edited = true;
                message.updated_at = now;
            }
            MessageChange::SoftDelete => {
                message.content.clear();
                message.media_path = None;
                message.media_type = None;
                message.is_deleted = true;
                message.updated_at = now;
            }
            MessageChange::MarkRead => {
                message.read_at.get_or_insert(now);
            }
        }
        Ok(message.clone())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Message>, u64), ServiceError> {
        let mut matched: Vec<Message> = self
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(matched, page))
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.lock();
        let key = (message_id, user_id, kind);
        if state.reactions.remove(&key) {
            Ok(false)
        } else {
            state.reactions.insert(key);
            Ok(true)
        }
    }

    async fn reaction_counts(&self, message_id: Uuid) -> Result<Vec<ReactionCount>, ServiceError> {
        let state = self.state.lock();
        Ok(ReactionKind::ALL
            .iter()
            .map(|&kind| ReactionCount {
                kind,
                count: state
                    .reactions
                    .iter()
                    .filter(|(m, _, k)| *m == message_id && *k == kind)
                    .count() as i64,
            })
            .filter(|c| c.count > 0)
            .collect())
    }

    async fn get_preference(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<serde_json::Value>, ServiceError> {
        Ok(self
            .state
            .lock()
            .preferences
            .get(&(user_id, key.to_string()))
            .cloned())
    }

    async fn put_preference(
        &self,
        user_id: Uuid,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.state
            .lock()
            .preferences
            .insert((user_id, key.to_string()), value);
        Ok(())
    }
}
