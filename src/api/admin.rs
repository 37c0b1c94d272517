use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;
use uuid::Uuid;

use super::{AppState, CurrentUser, PageQuery, WithMeta};
use crate::deposits;
use crate::error::{ApiErrorWithMeta, ServiceError};
use crate::moderation::{self, BulkOutcome};
use crate::orders;
use crate::policy::{Action, Resource, authorize};
use crate::preferences::{self, AdminSoundEnabled};
use crate::realtime::{self, DEFAULT_CHART_DAYS, DashboardView, OrderEvent, OrderEventKind};
use crate::reports::{self, StatusChange};
use crate::responses::{ApiOk, Pagination, RequestMeta};
use crate::store::{DepositOutcome, ResolvedReport, Store};
use crate::types::{
    Deposit, ModerationAction, Order, OrderFilter, OrderStatus, PaymentMethod, Profile, Report,
    ReportStatus,
};

use super::shop::DepositQuery;

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list_orders(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<OrderQuery>,
) -> Result<ApiOk<Vec<Order>>, ApiErrorWithMeta> {
    let filter = OrderFilter {
        user_id: q.user_id,
        status: q.status,
        payment_method: q.payment_method,
        from: q.from,
        to: q.to,
    };
    let page = PageQuery {
        page: q.page,
        per_page: q.per_page,
    }
    .page();
    let (items, total) = orders::list_all(st.store.as_ref(), &user.actor, &filter, page)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::paginated(
        "orders fetched",
        items,
        Pagination::new(page, total),
        meta,
    ))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub order: Order,
    pub previous_status: OrderStatus,
    pub points_awarded: Option<i64>,
    pub refunded: Option<rust_decimal::Decimal>,
}

pub async fn set_status(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<StatusRequest>,
) -> Result<ApiOk<StatusResponse>, ApiErrorWithMeta> {
    let outcome = moderation::transition(
        st.store.as_ref(),
        &st.events,
        &user.actor,
        id,
        req.status,
        req.confirm,
    )
    .await
    .with_meta(&meta)?;
    Ok(ApiOk::ok(
        "order status updated",
        StatusResponse {
            order: outcome.order,
            previous_status: outcome.previous,
            points_awarded: outcome.points_awarded,
            refunded: outcome.refunded,
        },
        meta,
    ))
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub order_ids: Vec<Uuid>,
    pub status: OrderStatus,
    #[serde(default)]
    pub confirm: bool,
}

pub async fn bulk_status(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<BulkStatusRequest>,
) -> Result<ApiOk<BulkOutcome>, ApiErrorWithMeta> {
    let outcome = moderation::bulk_transition(
        st.store.as_ref(),
        &st.events,
        &user.actor,
        &req.order_ids,
        req.status,
        req.confirm,
    )
    .await
    .with_meta(&meta)?;
    Ok(ApiOk::ok("bulk status applied", outcome, meta))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

pub async fn stats(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<StatsQuery>,
) -> Result<ApiOk<DashboardView>, ApiErrorWithMeta> {
    let view = orders::dashboard(
        st.store.as_ref(),
        &user.actor,
        q.days.unwrap_or(DEFAULT_CHART_DAYS),
    )
    .await
    .with_meta(&meta)?;
    Ok(ApiOk::ok("stats fetched", view, meta))
}

#[derive(Serialize)]
struct FeedUpdate<'a> {
    event: &'a OrderEvent,
    dashboard: &'a DashboardView,
    play_cue: bool,
}

#[derive(Serialize)]
struct Resync<'a> {
    missed: u64,
    dashboard: &'a DashboardView,
}

/// Per-connection state of the admin order feed.
struct Feed {
    rx: BroadcastStream<OrderEvent>,
    view: DashboardView,
    store: Arc<dyn Store>,
    play_sound: bool,
}

impl Feed {
    async fn next_event(&mut self) -> Option<Result<Event, axum::Error>> {
        let event = match self.rx.next().await? {
            Ok(change) => {
                self.view.apply(&change);
                Event::default().event("order").json_data(FeedUpdate {
                    event: &change,
                    dashboard: &self.view,
                    play_cue: self.play_sound && change.kind == OrderEventKind::Inserted,
                })
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(missed, "order feed subscriber lagged, reloading dashboard");
                match realtime::load_dashboard(self.store.as_ref(), DEFAULT_CHART_DAYS).await {
                    Ok(view) => self.view = view,
                    Err(e) => warn!(error = %e, "dashboard reload failed"),
                }
                Event::default().event("resync").json_data(Resync {
                    missed,
                    dashboard: &self.view,
                })
            }
        };
        Some(event)
    }
}

pub async fn order_events(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiErrorWithMeta> {
    authorize(&user.actor, Action::Moderate, Resource::None)
        .into_result()
        .with_meta(&meta)?;

    // Subscribe before loading so no change is missed. Changes committed in
    // between arrive queued and the view skips the ones its snapshot counted.
    let rx = BroadcastStream::new(st.events.subscribe());
    let view = realtime::load_dashboard(st.store.as_ref(), DEFAULT_CHART_DAYS)
        .await
        .with_meta(&meta)?;
    let play_sound = preferences::get::<AdminSoundEnabled>(st.store.as_ref(), user.actor.user_id)
        .await
        .with_meta(&meta)?;

    let snapshot = Event::default().event("snapshot").json_data(&view);
    let feed = Feed {
        rx,
        view,
        store: st.store.clone(),
        play_sound,
    };
    let updates = stream::unfold(feed, |mut feed| async move {
        let event = feed.next_event().await?;
        Some((event, feed))
    });

    Ok(Sse::new(stream::once(async move { snapshot }).chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub status: Option<ReportStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list_reports(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<ReportQuery>,
) -> Result<ApiOk<Vec<Report>>, ApiErrorWithMeta> {
    let page = PageQuery {
        page: q.page,
        per_page: q.per_page,
    }
    .page();
    let (items, total) = reports::list_reports(st.store.as_ref(), &user.actor, q.status, page)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::paginated(
        "reports fetched",
        items,
        Pagination::new(page, total),
        meta,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ReportActionRequest {
    pub action: ModerationAction,
}

#[derive(Debug, Serialize)]
pub struct ReportActionResponse {
    pub report: Report,
    pub reported_profile: Option<Profile>,
}

impl From<ResolvedReport> for ReportActionResponse {
    fn from(r: ResolvedReport) -> Self {
        Self {
            report: r.report,
            reported_profile: r.reported_profile,
        }
    }
}

pub async fn report_action(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ReportActionRequest>,
) -> Result<ApiOk<ReportActionResponse>, ApiErrorWithMeta> {
    let resolved = reports::process_action(
        st.store.as_ref(),
        &user.actor,
        id,
        req.action,
        st.config.temporary_ban(),
    )
    .await
    .with_meta(&meta)?;
    Ok(ApiOk::ok("report actioned", resolved.into(), meta))
}

pub async fn list_deposits(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<DepositQuery>,
) -> Result<ApiOk<Vec<Deposit>>, ApiErrorWithMeta> {
    authorize(&user.actor, Action::Moderate, Resource::None)
        .into_result()
        .with_meta(&meta)?;
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

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub deposit: Deposit,
    pub balance_after: Option<rust_decimal::Decimal>,
}

impl From<DepositOutcome> for DepositResponse {
    fn from(o: DepositOutcome) -> Self {
        Self {
            deposit: o.deposit,
            balance_after: o.balance_after,
        }
    }
}

async fn resolve_deposit(
    st: AppState,
    user: CurrentUser,
    id: Uuid,
    approve: bool,
    meta: RequestMeta,
) -> Result<ApiOk<DepositResponse>, ApiErrorWithMeta> {
    let outcome = deposits::resolve(st.store.as_ref(), &user.actor, id, approve)
        .await
        .with_meta(&meta)?;
    let message = if approve { "deposit approved" } else { "deposit rejected" };
    Ok(ApiOk::ok(message, outcome.into(), meta))
}

pub async fn approve_deposit(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<DepositResponse>, ApiErrorWithMeta> {
    resolve_deposit(st, user, id, true, meta).await
}

pub async fn reject_deposit(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<DepositResponse>, ApiErrorWithMeta> {
    resolve_deposit(st, user, id, false, meta).await
}

pub async fn set_user_status(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(change): Json<StatusChange>,
) -> Result<ApiOk<Profile>, ApiErrorWithMeta> {
    if id == user.actor.user_id {
        return Err(
            ServiceError::Validation("cannot change your own account status".into())
                .with_meta(meta),
        );
    }
    let profile = reports::set_account_status(
        st.store.as_ref(),
        &user.actor,
        id,
        change,
        st.config.temporary_ban(),
    )
    .await
    .with_meta(&meta)?;
    Ok(ApiOk::ok("account status updated", profile, meta))
}
