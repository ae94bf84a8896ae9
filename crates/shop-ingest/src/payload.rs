//! Shopify payload normalization. Pure functions over `serde_json::Value`.

use crate::{IngestError, WebhookTopic};
use chrono::{DateTime, Utc};
use serde_json::Value;
use shop_types::{EventMetadata, EventType, NewCommerceEvent, ProductSnapshot};

/// Non-empty string form of a JSON string or number.
fn as_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Monetary amount from a JSON string or number; anything else, or an unparseable string, is 0.
pub fn parse_amount(v: Option<&Value>) -> f64 {
    let parsed = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|x| x.is_finite()).unwrap_or(0.0)
}

fn parse_quantity(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Line-item snapshots. A missing or non-array `line_items` yields an empty list;
/// non-object entries are dropped.
pub fn extract_products(line_items: Option<&Value>) -> Vec<ProductSnapshot> {
    let Some(Value::Array(items)) = line_items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| ProductSnapshot {
            external_product_id: as_text(item.get("product_id")),
            title: as_text(item.get("title")),
            quantity: parse_quantity(item.get("quantity")),
            price: parse_amount(item.get("price")),
        })
        .collect()
}

fn joined_name(first: Option<&Value>, last: Option<&Value>) -> Option<String> {
    let first = first.and_then(Value::as_str).unwrap_or("");
    let last = last.and_then(Value::as_str).unwrap_or("");
    let name = format!("{first} {last}");
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Customer display name, billing name, then customer first/last name.
pub fn extract_customer_name(data: &Value) -> Option<String> {
    let customer = data.get("customer");
    if let Some(name) = as_text(customer.and_then(|c| c.get("display_name"))) {
        return Some(name);
    }
    let billing = data.get("billing_address");
    joined_name(
        billing.and_then(|b| b.get("first_name")),
        billing.and_then(|b| b.get("last_name")),
    )
    .or_else(|| {
        joined_name(
            customer.and_then(|c| c.get("first_name")),
            customer.and_then(|c| c.get("last_name")),
        )
    })
}

fn extract_email(data: &Value) -> Option<String> {
    as_text(data.get("email")).or_else(|| as_text(data.get("customer").and_then(|c| c.get("email"))))
}

fn line_item_count(data: &Value) -> usize {
    data.get("line_items")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Topic-specific metadata: correlation tokens plus provenance passthrough fields.
fn topic_metadata(topic: WebhookTopic, data: &Value) -> EventMetadata {
    let mut meta = EventMetadata::default();
    let field = |k: &str| data.get(k).cloned().unwrap_or(Value::Null);
    match topic {
        WebhookTopic::CartsUpdate => {
            meta.cart_token = as_text(data.get("token"));
            meta.insert_extra("cartId", field("id"));
            meta.insert_extra("updatedAt", field("updated_at"));
            meta.insert_extra("lineItemsCount", Value::from(line_item_count(data)));
        }
        WebhookTopic::CheckoutsCreate => {
            meta.checkout_token = as_text(data.get("token"));
            meta.insert_extra("checkoutId", field("id"));
            meta.insert_extra("createdAt", field("created_at"));
        }
        WebhookTopic::CheckoutsUpdate => {
            meta.checkout_token = as_text(data.get("token"));
            meta.insert_extra("checkoutId", field("id"));
            meta.insert_extra("updatedAt", field("updated_at"));
        }
        WebhookTopic::OrdersCreate => {
            meta.checkout_token = as_text(data.get("checkout_token"));
            meta.cart_token = as_text(data.get("cart_token"));
            meta.insert_extra("orderId", field("id"));
            meta.insert_extra("orderNumber", field("order_number"));
            meta.insert_extra("createdAt", field("created_at"));
            meta.insert_extra("financialStatus", field("financial_status"));
        }
    }
    meta
}

/// Normalize one verified webhook payload into an event for `tenant_id`.
///
/// Returns `Ok(None)` when the payload is acknowledged but not recorded (a cart with no
/// line items). Start events need at least one correlation signal (token or email).
pub fn normalize(
    topic: WebhookTopic,
    data: &Value,
    tenant_id: &str,
    received_at: DateTime<Utc>,
) -> Result<Option<NewCommerceEvent>, IngestError> {
    if !data.is_object() {
        return Err(IngestError::Validation("payload must be a JSON object".to_string()));
    }
    if topic == WebhookTopic::CartsUpdate && line_item_count(data) == 0 {
        return Ok(None);
    }
    let event_type = topic.event_type();
    let metadata = topic_metadata(topic, data);
    let customer_email = extract_email(data);
    let has_token = metadata.cart_token.is_some() || metadata.checkout_token.is_some();
    if matches!(event_type, EventType::CartUpdated | EventType::CheckoutStarted)
        && !has_token
        && customer_email.is_none()
    {
        return Err(IngestError::Validation(format!(
            "{} payload has neither a token nor an email",
            topic.as_str()
        )));
    }

    let mut ev = NewCommerceEvent::new(tenant_id, event_type, received_at);
    ev.customer_email = customer_email;
    ev.customer_name = extract_customer_name(data);
    ev.external_customer_id = as_text(data.get("customer").and_then(|c| c.get("id")));
    ev.value = Some(parse_amount(data.get("total_price")));
    ev.products = extract_products(data.get("line_items"));
    ev.metadata = metadata;
    Ok(Some(ev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amount_defaults_to_zero() {
        assert_eq!(parse_amount(Some(&json!("12.50"))), 12.5);
        assert_eq!(parse_amount(Some(&json!(7))), 7.0);
        assert_eq!(parse_amount(Some(&json!("abc"))), 0.0);
        assert_eq!(parse_amount(Some(&json!(null))), 0.0);
        assert_eq!(parse_amount(None), 0.0);
    }

    #[test]
    fn products_from_line_items() {
        let items = json!([
            {"product_id": 632910392, "title": "IPod Nano", "quantity": 2, "price": "199.00"},
            "garbage",
            {"title": "Gift card", "quantity": "1", "price": 25}
        ]);
        let products = extract_products(Some(&items));
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].external_product_id.as_deref(), Some("632910392"));
        assert_eq!(products[0].quantity, 2);
        assert_eq!(products[0].price, 199.0);
        assert_eq!(products[1].external_product_id, None);
        assert_eq!(products[1].quantity, 1);
        assert!(extract_products(Some(&json!({"not": "an array"}))).is_empty());
        assert!(extract_products(None).is_empty());
    }

    #[test]
    fn customer_name_fallbacks() {
        assert_eq!(
            extract_customer_name(&json!({"customer": {"display_name": "Ada L"}})).as_deref(),
            Some("Ada L")
        );
        assert_eq!(
            extract_customer_name(&json!({"billing_address": {"first_name": "Bob", "last_name": null}}))
                .as_deref(),
            Some("Bob")
        );
        assert_eq!(
            extract_customer_name(&json!({"customer": {"first_name": "Cy", "last_name": "D"}})).as_deref(),
            Some("Cy D")
        );
        assert_eq!(extract_customer_name(&json!({})), None);
    }

    #[test]
    fn cart_payload_normalizes_with_token_metadata() {
        let data = json!({
            "id": "c-1",
            "token": "cart-tok",
            "updated_at": "2026-10-19T10:00:00Z",
            "email": "a@x.com",
            "total_price": "30.00",
            "line_items": [{"product_id": 1, "title": "Tee", "quantity": 1, "price": "30.00"}]
        });
        let ev = normalize(WebhookTopic::CartsUpdate, &data, "t1", Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(ev.event_type, EventType::CartUpdated);
        assert_eq!(ev.metadata.cart_token.as_deref(), Some("cart-tok"));
        assert_eq!(ev.metadata.extra.get("lineItemsCount"), Some(&json!(1)));
        assert_eq!(ev.value, Some(30.0));
        assert_eq!(ev.customer_email.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn empty_cart_is_not_recorded() {
        let data = json!({"token": "cart-tok", "line_items": []});
        assert!(normalize(WebhookTopic::CartsUpdate, &data, "t1", Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn checkout_without_any_signal_is_rejected() {
        let data = json!({"id": 5, "total_price": "10"});
        let err = normalize(WebhookTopic::CheckoutsCreate, &data, "t1", Utc::now()).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn order_carries_checkout_token() {
        let data = json!({
            "id": 820982911946154508u64,
            "order_number": 1001,
            "checkout_token": "chk-tok",
            "financial_status": "paid",
            "customer": {"id": 115310627314723954u64, "email": "b@x.com"}
        });
        let ev = normalize(WebhookTopic::OrdersCreate, &data, "t1", Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(ev.event_type, EventType::OrderPlaced);
        assert_eq!(ev.metadata.checkout_token.as_deref(), Some("chk-tok"));
        assert_eq!(ev.customer_email.as_deref(), Some("b@x.com"));
        assert_eq!(ev.external_customer_id.as_deref(), Some("115310627314723954"));
        assert_eq!(ev.value, Some(0.0));
        assert!(ev.products.is_empty());
    }

    #[test]
    fn non_object_payload_is_invalid() {
        let err = normalize(WebhookTopic::OrdersCreate, &json!([1, 2]), "t1", Utc::now()).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }
}
