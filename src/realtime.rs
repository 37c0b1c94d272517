//! Order change feed for the admin dashboard.
//!
//! Committed inserts and updates are broadcast in-process. Subscribers merge
//! each event into their own [`DashboardView`] rather than reloading the
//! aggregates. There is no backlog: a subscriber only sees events published
//! after it subscribed.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::moderation;
use crate::store::{DashboardSnapshot, Store};
use crate::types::{DailyTotal, Order, OrderStats, OrderStatus};

/// Days of history the dashboard chart covers.
pub const DEFAULT_CHART_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    pub kind: OrderEventKind,
    pub order: Order,
    /// Status before an update; `None` for inserts.
    pub previous_status: Option<OrderStatus>,
    pub product_name: Option<String>,
}

/// Broadcast hub for order changes.
#[derive(Clone)]
pub struct OrderEvents {
    tx: broadcast::Sender<OrderEvent>,
}

impl OrderEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }

    pub fn inserted(&self, order: Order, product_name: Option<String>) {
        self.publish(OrderEvent {
            kind: OrderEventKind::Inserted,
            order,
            previous_status: None,
            product_name,
        });
    }

    pub fn updated(&self, order: Order, previous: OrderStatus, product_name: Option<String>) {
        self.publish(OrderEvent {
            kind: OrderEventKind::Updated,
            order,
            previous_status: Some(previous),
            product_name,
        });
    }

    fn publish(&self, event: OrderEvent) {
        let order_id = event.order.id;
        let kind = event.kind;
        // An error only means nobody is listening right now.
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!(%order_id, ?kind, receivers, "order event published");
    }
}

/// Incrementally maintained dashboard aggregates.
///
/// The view remembers the last status it counted for every order, so an
/// event already reflected in the snapshot (or delivered twice) changes
/// nothing.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub stats: OrderStats,
    #[serde(serialize_with = "serialize_daily")]
    daily: BTreeMap<NaiveDate, DailyTotal>,
    #[serde(skip)]
    since: NaiveDate,
    #[serde(skip)]
    counted: HashMap<Uuid, OrderStatus>,
}

fn serialize_daily<S: serde::Serializer>(
    daily: &BTreeMap<NaiveDate, DailyTotal>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_seq(daily.values())
}

impl DashboardView {
    pub fn new(snapshot: DashboardSnapshot, since: NaiveDate) -> Self {
        Self {
            stats: snapshot.stats,
            daily: snapshot.daily.into_iter().map(|d| (d.day, d)).collect(),
            since,
            counted: snapshot.statuses.into_iter().collect(),
        }
    }

    pub fn daily(&self) -> Vec<DailyTotal> {
        self.daily.values().cloned().collect()
    }

    /// Merges a single order change into the aggregates.
    pub fn apply(&mut self, event: &OrderEvent) {
        let order = &event.order;
        let day = order.created_at.date_naive();
        let known = self.counted.get(&order.id).copied();

        let previous = match (event.kind, known) {
            (OrderEventKind::Inserted, Some(_)) => return,
            (OrderEventKind::Inserted, None) => {
                self.stats.total += 1;
                *self.stats.count_mut(order.status) += 1;
                if day >= self.since {
                    self.bucket(day).orders += 1;
                }
                None
            }
            (OrderEventKind::Updated, known) => {
                let Some(previous) = known.or(event.previous_status) else {
                    return;
                };
                // Terminal orders never move again; a later event is stale.
                if previous == order.status || moderation::is_terminal(previous) {
                    return;
                }
                let count = self.stats.count_mut(previous);
                *count = (*count - 1).max(0);
                *self.stats.count_mut(order.status) += 1;
                Some(previous)
            }
        };
        self.counted.insert(order.id, order.status);

        if order.status == OrderStatus::Finished && previous != Some(OrderStatus::Finished) {
            self.stats.revenue += order.price;
            if day >= self.since {
                self.bucket(day).revenue += order.price;
            }
        }
    }

    fn bucket(&mut self, day: NaiveDate) -> &mut DailyTotal {
        self.daily.entry(day).or_insert_with(|| DailyTotal {
            day,
            orders: 0,
            revenue: Decimal::ZERO,
        })
    }
}

/// Loads the current aggregates for the last `days` days, today included.
pub async fn load_dashboard(store: &dyn Store, days: i64) -> Result<DashboardView, ServiceError> {
    let since = Utc::now().date_naive() - Duration::days(days.max(1) - 1);
    let snapshot = store.dashboard_snapshot(since).await?;
    Ok(DashboardView::new(snapshot, since))
}
