//! Commerce events: the append-only record every other component reads or writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Provenance marker written into `detectedBy` on correlator-produced events.
pub const DETECTED_BY_SCHEDULED_JOB: &str = "scheduled_job";

/// Closed set of commerce event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CartUpdated,
    CheckoutStarted,
    CheckoutUpdated,
    OrderPlaced,
    CartAbandoned,
    CheckoutAbandoned,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::CartUpdated,
        EventType::CheckoutStarted,
        EventType::CheckoutUpdated,
        EventType::OrderPlaced,
        EventType::CartAbandoned,
        EventType::CheckoutAbandoned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CartUpdated => "cart_updated",
            EventType::CheckoutStarted => "checkout_started",
            EventType::CheckoutUpdated => "checkout_updated",
            EventType::OrderPlaced => "order_placed",
            EventType::CartAbandoned => "cart_abandoned",
            EventType::CheckoutAbandoned => "checkout_abandoned",
        }
    }

    /// Synthetic types that only the correlator may create.
    pub fn is_abandonment(self) -> bool {
        matches!(self, EventType::CartAbandoned | EventType::CheckoutAbandoned)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Metadata fields that hold correlation keys; used by store lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    CartToken,
    CheckoutToken,
    OriginalCartToken,
    OriginalCheckoutToken,
    SourceEventId,
}

impl MetadataKey {
    /// JSON field name as persisted.
    pub fn json_name(self) -> &'static str {
        match self {
            MetadataKey::CartToken => "cartToken",
            MetadataKey::CheckoutToken => "checkoutToken",
            MetadataKey::OriginalCartToken => "originalCartToken",
            MetadataKey::OriginalCheckoutToken => "originalCheckoutToken",
            MetadataKey::SourceEventId => "sourceEventId",
        }
    }
}

/// Line-item snapshot taken at event time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: f64,
}

/// Event metadata: known correlation/provenance fields plus passthrough of anything else.
///
/// Unknown keys survive a serialize/deserialize cycle through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_cart_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_checkout_token: Option<String>,
    /// Id of the start event an abandonment was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandoned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_by: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn get(&self, key: MetadataKey) -> Option<&str> {
        let v = match key {
            MetadataKey::CartToken => &self.cart_token,
            MetadataKey::CheckoutToken => &self.checkout_token,
            MetadataKey::OriginalCartToken => &self.original_cart_token,
            MetadataKey::OriginalCheckoutToken => &self.original_checkout_token,
            MetadataKey::SourceEventId => &self.source_event_id,
        };
        v.as_deref()
    }

    pub fn set(&mut self, key: MetadataKey, value: Option<String>) {
        match key {
            MetadataKey::CartToken => self.cart_token = value,
            MetadataKey::CheckoutToken => self.checkout_token = value,
            MetadataKey::OriginalCartToken => self.original_cart_token = value,
            MetadataKey::OriginalCheckoutToken => self.original_checkout_token = value,
            MetadataKey::SourceEventId => self.source_event_id = value,
        }
    }

    /// Insert a passthrough field, skipping JSON nulls.
    pub fn insert_extra(&mut self, key: &str, value: serde_json::Value) {
        if !value.is_null() {
            self.extra.insert(key.to_string(), value);
        }
    }
}

/// Event to append; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommerceEvent {
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub external_customer_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub products: Vec<ProductSnapshot>,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub created_at: DateTime<Utc>,
}

impl NewCommerceEvent {
    pub fn new(tenant_id: impl Into<String>, event_type: EventType, created_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event_type,
            customer_email: None,
            customer_name: None,
            external_customer_id: None,
            value: None,
            products: Vec::new(),
            metadata: EventMetadata::default(),
            created_at,
        }
    }

    /// Uniqueness key for abandonment events: the back-referenced token, else the source event id.
    ///
    /// `None` for every non-abandonment type.
    pub fn abandonment_key(&self) -> Option<&str> {
        let original = match self.event_type {
            EventType::CartAbandoned => self.metadata.original_cart_token.as_deref(),
            EventType::CheckoutAbandoned => self.metadata.original_checkout_token.as_deref(),
            _ => return None,
        };
        original
            .filter(|t| !t.is_empty())
            .or(self.metadata.source_event_id.as_deref())
    }

    pub fn into_stored(self, id: String) -> CommerceEvent {
        CommerceEvent {
            id,
            tenant_id: self.tenant_id,
            event_type: self.event_type,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            external_customer_id: self.external_customer_id,
            value: self.value,
            products: self.products,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}

/// Stored commerce event. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommerceEvent {
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub external_customer_id: Option<String>,
    pub value: Option<f64>,
    pub products: Vec<ProductSnapshot>,
    pub metadata: EventMetadata,
    pub created_at: DateTime<Utc>,
}

impl CommerceEvent {
    /// Monetary value, treating absence as zero.
    pub fn value_or_zero(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}
