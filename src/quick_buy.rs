//! Single-product wallet purchases.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::ledger;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::realtime::OrderEvents;
use crate::store::{Store, WalletPurchase};
use crate::types::{DeliveryInfo, NewOrder, Order, PaymentMethod, Product, ProductCategory};

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuickBuyRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickBuyReceipt {
    pub order: Order,
    pub balance_after: Decimal,
    pub replayed: bool,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Checks the delivery details a product category needs.
pub fn validate_delivery(
    category: ProductCategory,
    delivery: &DeliveryInfo,
) -> Result<(), ServiceError> {
    if category.is_game() {
        if !present(&delivery.player_id) {
            return Err(ServiceError::MissingField("player_id"));
        }
        if category == ProductCategory::Mlbb && !present(&delivery.server_id) {
            return Err(ServiceError::MissingField("server_id"));
        }
    }
    if category.is_mobile() {
        if delivery.operator.is_none() {
            return Err(ServiceError::MissingField("operator"));
        }
        if !present(&delivery.topup_phone) && !present(&delivery.phone) {
            return Err(ServiceError::MissingField("phone"));
        }
    }
    Ok(())
}

fn check_product(actor: &Actor, product: &Product, quantity: i32) -> Result<(), ServiceError> {
    if !product.is_available(quantity) {
        return Err(ServiceError::ProductUnavailable(product.id));
    }
    authorize(actor, Action::Purchase, Resource::Product(product)).into_result()
}

/// Buys one product with the wallet balance.
///
/// The debit, the order row and its ledger entry commit together; a refused
/// debit leaves no trace. A repeated idempotency key returns the first order.
pub async fn quick_buy(
    store: &dyn Store,
    events: &OrderEvents,
    actor: &Actor,
    req: QuickBuyRequest,
    idempotency_key: Option<&str>,
) -> Result<QuickBuyReceipt, ServiceError> {
    if req.quantity < 1 {
        return Err(ServiceError::Validation("quantity must be at least 1".into()));
    }

    let product = store
        .get_products(&[req.product_id])
        .await?
        .into_iter()
        .next()
        .ok_or(ServiceError::NotFound("product"))?;

    validate_delivery(product.category, &req.delivery)?;
    check_product(actor, &product, req.quantity)?;

    let order = NewOrder {
        user_id: actor.user_id,
        product_id: product.id,
        quantity: req.quantity,
        price: product.price * Decimal::from(req.quantity),
        payment_method: PaymentMethod::Wallet,
        payment_proof_path: None,
        transaction_id: None,
        delivery: req.delivery,
        idempotency_key: idempotency_key.map(str::to_string),
    };
    let outcome = store
        .purchase_with_wallet(WalletPurchase {
            order,
            description: ledger::purchase_description(&product, req.quantity),
        })
        .await?;

    if !outcome.replayed {
        events.inserted(outcome.order.clone(), Some(product.name.clone()));
    }
    info!(
        user_id = %actor.user_id,
        order_id = %outcome.order.id,
        price = %outcome.order.price,
        balance_after = %outcome.balance_after,
        replayed = outcome.replayed,
        "quick-buy completed"
    );

    Ok(QuickBuyReceipt {
        order: outcome.order,
        balance_after: outcome.balance_after,
        replayed: outcome.replayed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MobileOperator;

    #[test]
    fn mlbb_needs_player_and_server() {
        let mut d = DeliveryInfo {
            player_id: Some("12345678".into()),
            ..Default::default()
        };
        assert!(matches!(
            validate_delivery(ProductCategory::Mlbb, &d),
            Err(ServiceError::MissingField("server_id"))
        ));
        assert!(validate_delivery(ProductCategory::Pubg, &d).is_ok());
        d.server_id = Some("2001".into());
        assert!(validate_delivery(ProductCategory::Mlbb, &d).is_ok());
    }

    #[test]
    fn mobile_topup_needs_operator_and_phone() {
        let mut d = DeliveryInfo::default();
        assert!(matches!(
            validate_delivery(ProductCategory::DataPlan, &d),
            Err(ServiceError::MissingField("operator"))
        ));
        d.operator = Some(MobileOperator::Mytel);
        assert!(matches!(
            validate_delivery(ProductCategory::MobileTopup, &d),
            Err(ServiceError::MissingField("phone"))
        ));
        d.topup_phone = Some("09798765432".into());
        assert!(validate_delivery(ProductCategory::MobileTopup, &d).is_ok());
        assert!(validate_delivery(ProductCategory::General, &DeliveryInfo::default()).is_ok());
    }
}
