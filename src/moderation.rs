//! Admin order moderation state machine.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::realtime::OrderEvents;
use crate::store::{Store, TransitionOutcome};
use crate::types::OrderStatus;

/// States an order may be in before moving to `to`.
pub fn legal_predecessors(to: OrderStatus) -> &'static [OrderStatus] {
    match to {
        OrderStatus::Pending => &[],
        OrderStatus::Approved => &[OrderStatus::Pending],
        OrderStatus::Finished | OrderStatus::Rejected | OrderStatus::Cancelled => {
            &[OrderStatus::Pending, OrderStatus::Approved]
        }
    }
}

pub fn is_legal(from: OrderStatus, to: OrderStatus) -> bool {
    legal_predecessors(to).contains(&from)
}

pub fn is_terminal(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Finished | OrderStatus::Rejected | OrderStatus::Cancelled
    )
}

/// Destructive or balance-affecting targets need an explicit confirmation.
pub fn requires_confirmation(to: OrderStatus) -> bool {
    is_terminal(to)
}

fn check_request(actor: &Actor, to: OrderStatus, confirmed: bool) -> Result<(), ServiceError> {
    authorize(actor, Action::Moderate, Resource::None).into_result()?;
    if requires_confirmation(to) && !confirmed {
        return Err(ServiceError::ConfirmationRequired(to));
    }
    Ok(())
}

async fn apply(
    store: &dyn Store,
    events: &OrderEvents,
    actor: &Actor,
    order_id: Uuid,
    to: OrderStatus,
) -> Result<TransitionOutcome, ServiceError> {
    let outcome = store.transition_order(order_id, to).await?;
    info!(
        %order_id,
        admin = %actor.user_id,
        from = %outcome.previous,
        to = %to,
        points_awarded = ?outcome.points_awarded,
        refunded = ?outcome.refunded,
        "order status changed"
    );

    let product_name = store
        .get_products(&[outcome.order.product_id])
        .await
        .ok()
        .and_then(|p| p.into_iter().next())
        .map(|p| p.name);
    events.updated(outcome.order.clone(), outcome.previous, product_name);
    Ok(outcome)
}

/// Moves one order to `to`.
pub async fn transition(
    store: &dyn Store,
    events: &OrderEvents,
    actor: &Actor,
    order_id: Uuid,
    to: OrderStatus,
    confirmed: bool,
) -> Result<TransitionOutcome, ServiceError> {
    check_request(actor, to, confirmed)?;
    apply(store, events, actor, order_id, to).await
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkSkip {
    pub order_id: Uuid,
    pub code: &'static str,
    pub reason: String,
}

/// Per-id result of a bulk transition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub updated: Vec<Uuid>,
    pub skipped: Vec<BulkSkip>,
    pub points_awarded: i64,
}

/// Applies the same target status to every selected order.
///
/// Each order moves in its own unit of work; one illegal or missing order does
/// not hold back the rest, and is reported in `skipped`.
pub async fn bulk_transition(
    store: &dyn Store,
    events: &OrderEvents,
    actor: &Actor,
    order_ids: &[Uuid],
    to: OrderStatus,
    confirmed: bool,
) -> Result<BulkOutcome, ServiceError> {
    check_request(actor, to, confirmed)?;
    if order_ids.is_empty() {
        return Err(ServiceError::Validation("no orders selected".into()));
    }

    let mut seen = HashSet::new();
    let mut outcome = BulkOutcome::default();
    for &order_id in order_ids.iter().filter(|id| seen.insert(**id)) {
        match apply(store, events, actor, order_id, to).await {
            Ok(done) => {
                outcome.updated.push(order_id);
                outcome.points_awarded += done.points_awarded.unwrap_or(0);
            }
            Err(
                e @ (ServiceError::NotFound(_)
                | ServiceError::InvalidTransition { .. }
                | ServiceError::Conflict(_)),
            ) => {
                outcome.skipped.push(BulkSkip {
                    order_id,
                    code: e.code(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!(%order_id, error = %e, "bulk transition aborted");
                return Err(e);
            }
        }
    }

    info!(
        admin = %actor.user_id,
        to = %to,
        updated = outcome.updated.len(),
        skipped = outcome.skipped.len(),
        "bulk order transition"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Approved, true)]
    #[case(OrderStatus::Pending, OrderStatus::Finished, true)]
    #[case(OrderStatus::Approved, OrderStatus::Finished, true)]
    #[case(OrderStatus::Approved, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Approved, OrderStatus::Approved, false)]
    #[case(OrderStatus::Finished, OrderStatus::Finished, false)]
    #[case(OrderStatus::Rejected, OrderStatus::Approved, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Pending, false)]
    fn transition_table(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] legal: bool) {
        assert_eq!(is_legal(from, to), legal);
    }

    #[test]
    fn terminal_targets_need_confirmation() {
        assert!(requires_confirmation(OrderStatus::Finished));
        assert!(requires_confirmation(OrderStatus::Cancelled));
        assert!(!requires_confirmation(OrderStatus::Approved));
    }
}
