//! Query filters, match predicates, aggregates, and the JSON response envelope.

use crate::{CommerceEvent, EventType, MetadataKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Half-open `createdAt` range: `from <= created_at < to`. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |f| at >= f) && self.to.map_or(true, |t| at < t)
    }
}

/// Filter for `EventStore::query`. Results are ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// `None` scans every tenant (correlator passes); results still carry `tenant_id`.
    pub tenant_id: Option<String>,
    /// Empty means every type.
    pub types: Vec<EventType>,
    pub range: TimeRange,
    pub customer_email: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl EventQuery {
    pub fn matches(&self, ev: &CommerceEvent) -> bool {
        if let Some(ref t) = self.tenant_id {
            if &ev.tenant_id != t {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&ev.event_type) {
            return false;
        }
        if let Some(ref email) = self.customer_email {
            if ev.customer_email.as_ref() != Some(email) {
                return false;
            }
        }
        self.range.contains(ev.created_at)
    }
}

/// Metadata token equality test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatch {
    pub key: MetadataKey,
    pub value: String,
}

/// Predicate for `EventStore::find_one`.
///
/// The identity clause holds when the email equals the event's email OR the token matches.
/// With neither set the predicate matches nothing. `created_at_or_after` is an extra AND.
#[derive(Debug, Clone, Default)]
pub struct MatchPredicate {
    pub customer_email: Option<String>,
    pub token: Option<TokenMatch>,
    pub created_at_or_after: Option<DateTime<Utc>>,
}

impl MatchPredicate {
    pub fn matches(&self, ev: &CommerceEvent) -> bool {
        if let Some(at) = self.created_at_or_after {
            if ev.created_at < at {
                return false;
            }
        }
        let email_hit = match (&self.customer_email, &ev.customer_email) {
            (Some(want), Some(have)) => want == have,
            _ => false,
        };
        let token_hit = self
            .token
            .as_ref()
            .is_some_and(|t| ev.metadata.get(t.key) == Some(t.value.as_str()));
        email_hit || token_hit
    }
}

/// Count and summed value for one event type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    pub count: u64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    #[serde(rename = "byType")]
    pub by_type: BTreeMap<EventType, TypeStats>,
    pub totals: TypeStats,
}

impl EventStats {
    pub fn record(&mut self, event_type: EventType, value: Option<f64>) {
        let v = value.unwrap_or(0.0);
        let entry = self.by_type.entry(event_type).or_default();
        entry.count += 1;
        entry.total_value += v;
        self.totals.count += 1;
        self.totals.total_value += v;
    }
}

/// One page of events plus the unpaged total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<CommerceEvent>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Response envelope: `{code, message, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    #[serde(default = "default_code")]
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_code() -> i32 {
    200
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventMetadata, NewCommerceEvent};
    use chrono::Duration;

    fn order(email: Option<&str>, checkout_token: Option<&str>, at: DateTime<Utc>) -> CommerceEvent {
        let mut ev = NewCommerceEvent::new("t1", EventType::OrderPlaced, at);
        ev.customer_email = email.map(String::from);
        ev.metadata = EventMetadata {
            checkout_token: checkout_token.map(String::from),
            ..Default::default()
        };
        ev.into_stored("o1".to_string())
    }

    #[test]
    fn predicate_matches_email_or_token_after_bound() {
        let t0 = Utc::now();
        let p = MatchPredicate {
            customer_email: Some("a@x.com".into()),
            token: Some(TokenMatch {
                key: MetadataKey::CheckoutToken,
                value: "tok1".into(),
            }),
            created_at_or_after: Some(t0),
        };
        assert!(p.matches(&order(Some("a@x.com"), None, t0)));
        assert!(p.matches(&order(None, Some("tok1"), t0 + Duration::minutes(5))));
        assert!(!p.matches(&order(Some("b@x.com"), Some("tok2"), t0)));
        assert!(!p.matches(&order(Some("a@x.com"), None, t0 - Duration::seconds(1))));
    }

    #[test]
    fn predicate_without_identity_matches_nothing() {
        let p = MatchPredicate::default();
        assert!(!p.matches(&order(None, None, Utc::now())));
        assert!(!p.matches(&order(Some("a@x.com"), Some("tok"), Utc::now())));
    }

    #[test]
    fn time_range_is_half_open() {
        let t0 = Utc::now();
        let r = TimeRange::between(t0, t0 + Duration::hours(1));
        assert!(r.contains(t0));
        assert!(!r.contains(t0 + Duration::hours(1)));
        assert!(TimeRange::default().contains(t0));
    }
}
