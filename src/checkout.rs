//! Cart checkout: validate, price server-side, attach proof, insert all lines.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::realtime::OrderEvents;
use crate::storage::{self, Bucket, FileStorage, Upload};
use crate::store::Store;
use crate::types::{DeliveryInfo, NewOrder, Order, PaymentMethod, Product};

pub const TRANSACTION_ID_LEN: usize = 6;

/// Keeps ASCII digits only, capped at six.
pub fn sanitize_transaction_id(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_digit)
        .take(TRANSACTION_ID_LEN)
        .collect()
}

pub fn validate_transaction_id(id: &str) -> bool {
    id.len() == TRANSACTION_ID_LEN && id.bytes().all(|b| b.is_ascii_digit())
}

/// Sanitizes then validates a user-entered transaction id.
pub fn parse_transaction_id(input: &str) -> Result<String, ServiceError> {
    let id = sanitize_transaction_id(input);
    if validate_transaction_id(&id) {
        Ok(id)
    } else {
        Err(ServiceError::InvalidTransactionId)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartLine>,
    pub payment_method: PaymentMethod,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payment_proof: Option<Upload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub orders: Vec<Order>,
    pub total_price: Decimal,
    pub points_to_earn: i64,
    pub replayed: bool,
}

fn non_empty(value: Option<&str>, field: &'static str) -> Result<(), ServiceError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(ServiceError::MissingField(field)),
    }
}

/// Proof of an electronic payment, checked before anything is written.
struct Proof<'a> {
    transaction_id: String,
    upload: &'a Upload,
}

fn validate(req: &CheckoutRequest) -> Result<Option<Proof<'_>>, ServiceError> {
    if req.items.is_empty() {
        return Err(ServiceError::Validation("cart is empty".into()));
    }
    if req.items.iter().any(|line| line.quantity < 1) {
        return Err(ServiceError::Validation("quantity must be at least 1".into()));
    }
    non_empty(req.delivery.phone.as_deref(), "phone")?;
    non_empty(req.delivery.address.as_deref(), "address")?;

    match req.payment_method {
        PaymentMethod::CashOnDelivery => Ok(None),
        PaymentMethod::Wallet => Err(ServiceError::Validation(
            "wallet payments are made with quick-buy".into(),
        )),
        _ => {
            let raw = req
                .transaction_id
                .as_deref()
                .ok_or(ServiceError::MissingField("transaction_id"))?;
            let transaction_id = parse_transaction_id(raw)?;
            let upload = req
                .payment_proof
                .as_ref()
                .ok_or(ServiceError::MissingField("payment_proof"))?;
            Ok(Some(Proof {
                transaction_id,
                upload,
            }))
        }
    }
}

/// Folds repeated products into one line, keeping first-seen order.
fn merge_lines(items: &[CartLine]) -> Result<Vec<CartLine>, ServiceError> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(items.len());
    for line in items {
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(m) => {
                m.quantity = m
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or_else(|| ServiceError::Validation("quantity is too large".into()))?;
            }
            None => merged.push(line.clone()),
        }
    }
    Ok(merged)
}

fn receipt(orders: Vec<Order>, catalog: &HashMap<Uuid, Product>, replayed: bool) -> Receipt {
    let total_price = orders.iter().map(|o| o.price).sum();
    let points_to_earn = orders
        .iter()
        .map(|o| {
            let value = catalog.get(&o.product_id).map_or(0, |p| p.points_value);
            crate::ledger::reward_points(value, o.quantity)
        })
        .sum();
    Receipt {
        orders,
        total_price,
        points_to_earn,
        replayed,
    }
}

/// Places one pending order per distinct product in the cart.
pub async fn checkout(
    store: &dyn Store,
    storage: &dyn FileStorage,
    events: &OrderEvents,
    actor: &Actor,
    req: CheckoutRequest,
    idempotency_key: Option<&str>,
) -> Result<Receipt, ServiceError> {
    let proof = validate(&req)?;
    let items = merge_lines(&req.items)?;

    let ids: Vec<Uuid> = items.iter().map(|l| l.product_id).collect();
    let catalog: HashMap<Uuid, Product> = store
        .get_products(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut lines = Vec::with_capacity(items.len());
    for line in &items {
        let product = catalog
            .get(&line.product_id)
            .ok_or(ServiceError::NotFound("product"))?;
        if !product.is_available(line.quantity) {
            return Err(ServiceError::ProductUnavailable(product.id));
        }
        authorize(actor, Action::Purchase, Resource::Product(product)).into_result()?;
        lines.push((product, line.quantity));
    }

    let (proof_path, transaction_id) = match proof {
        Some(proof) => (
            Some(
                proof
                    .upload
                    .store(storage, Bucket::PaymentProofs, actor.user_id)
                    .await?,
            ),
            Some(proof.transaction_id),
        ),
        None => (None, None),
    };

    let orders = lines
        .into_iter()
        .map(|(product, quantity)| NewOrder {
            user_id: actor.user_id,
            product_id: product.id,
            quantity,
            price: product.price * Decimal::from(quantity),
            payment_method: req.payment_method,
            payment_proof_path: proof_path.clone(),
            transaction_id: transaction_id.clone(),
            delivery: req.delivery.clone(),
            idempotency_key: idempotency_key.map(str::to_string),
        })
        .collect();

    let created = match store.create_orders(actor.user_id, orders, idempotency_key).await {
        Ok(created) => created,
        Err(e) => {
            if let Some(path) = &proof_path {
                storage::discard(storage, Bucket::PaymentProofs, path).await;
            }
            return Err(e);
        }
    };

    if created.replayed {
        if let Some(path) = &proof_path {
            storage::discard(storage, Bucket::PaymentProofs, path).await;
        }
    } else {
        for order in &created.orders {
            let name = catalog.get(&order.product_id).map(|p| p.name.clone());
            events.inserted(order.clone(), name);
        }
    }

    let receipt = receipt(created.orders, &catalog, created.replayed);
    info!(
        user_id = %actor.user_id,
        orders = receipt.orders.len(),
        total = %receipt.total_price,
        payment_method = %req.payment_method,
        replayed = receipt.replayed,
        "checkout completed"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("123456", Some("123456"))]
    #[case("12-34-56", Some("123456"))]
    #[case("1234567890", Some("123456"))]
    #[case("txn 98a76b54c3", Some("987654"))]
    #[case("12345", None)]
    #[case("abcdef", None)]
    #[case("", None)]
    fn transaction_ids(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_transaction_id(input).ok().as_deref(), expected);
    }

    fn request(method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            items: vec![CartLine {
                product_id: Uuid::new_v4(),
                quantity: 1,
            }],
            payment_method: method,
            delivery: DeliveryInfo {
                phone: Some("09123456789".into()),
                address: Some("Yangon".into()),
                ..Default::default()
            },
            transaction_id: None,
            payment_proof: None,
        }
    }

    #[test]
    fn cod_needs_no_proof() {
        assert!(validate(&request(PaymentMethod::CashOnDelivery)).unwrap().is_none());
    }

    #[test]
    fn electronic_payment_needs_transaction_id_and_proof() {
        let mut req = request(PaymentMethod::KbzPay);
        assert!(matches!(
            validate(&req),
            Err(ServiceError::MissingField("transaction_id"))
        ));
        req.transaction_id = Some("123456".into());
        assert!(matches!(
            validate(&req),
            Err(ServiceError::MissingField("payment_proof"))
        ));
    }

    #[test]
    fn delivery_fields_are_required() {
        let mut req = request(PaymentMethod::CashOnDelivery);
        req.delivery.address = Some("  ".into());
        assert!(matches!(validate(&req), Err(ServiceError::MissingField("address"))));

        let mut req = request(PaymentMethod::CashOnDelivery);
        req.items[0].quantity = 0;
        assert!(matches!(validate(&req), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn repeated_products_are_merged_in_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let line = |product_id, quantity| CartLine {
            product_id,
            quantity,
        };
        let merged = merge_lines(&[line(a, 1), line(b, 2), line(a, 3)]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].product_id, merged[0].quantity), (a, 4));
        assert_eq!((merged[1].product_id, merged[1].quantity), (b, 2));

        assert!(merge_lines(&[line(a, i32::MAX), line(a, 1)]).is_err());
    }

    #[test]
    fn wallet_is_not_a_checkout_method() {
        assert!(validate(&request(PaymentMethod::Wallet)).is_err());
    }
}
