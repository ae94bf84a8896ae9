//! Cart and checkout abandonment passes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shop_types::{
    Clock, CommerceEvent, EventQuery, EventStore, EventStoreError, EventType, MatchPredicate,
    MetadataKey, NewCommerceEvent, TimeRange, TokenMatch, DETECTED_BY_SCHEDULED_JOB,
};
use std::sync::Arc;

/// Which flow a pass evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Cart,
    Checkout,
}

impl PassKind {
    pub fn name(self) -> &'static str {
        match self {
            PassKind::Cart => "cart_abandonment",
            PassKind::Checkout => "checkout_abandonment",
        }
    }

    pub fn start_type(self) -> EventType {
        match self {
            PassKind::Cart => EventType::CartUpdated,
            PassKind::Checkout => EventType::CheckoutStarted,
        }
    }

    pub fn abandoned_type(self) -> EventType {
        match self {
            PassKind::Cart => EventType::CartAbandoned,
            PassKind::Checkout => EventType::CheckoutAbandoned,
        }
    }

    /// Metadata field holding the start event's correlation token.
    pub fn token_key(self) -> MetadataKey {
        match self {
            PassKind::Cart => MetadataKey::CartToken,
            PassKind::Checkout => MetadataKey::CheckoutToken,
        }
    }

    /// Back-reference field written on the abandonment event.
    pub fn original_key(self) -> MetadataKey {
        match self {
            PassKind::Cart => MetadataKey::OriginalCartToken,
            PassKind::Checkout => MetadataKey::OriginalCheckoutToken,
        }
    }
}

/// Time thresholds for one pass.
#[derive(Debug, Clone, Copy)]
pub struct PassConfig {
    pub kind: PassKind,
    /// Start events older than this are never reconsidered.
    pub lookback: Duration,
    /// Start events younger than this are not yet eligible.
    pub grace: Duration,
}

impl PassConfig {
    pub fn cart() -> Self {
        Self {
            kind: PassKind::Cart,
            lookback: Duration::hours(24),
            grace: Duration::hours(1),
        }
    }

    pub fn checkout() -> Self {
        Self {
            kind: PassKind::Checkout,
            lookback: Duration::hours(24),
            grace: Duration::hours(2),
        }
    }

    /// Eligible window: `now - lookback <= created_at < now - grace`.
    pub fn window(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::between(now - self.lookback, now - self.grace)
    }
}

/// Result of evaluating one start event.
#[derive(Debug, Clone)]
pub enum CandidateOutcome {
    /// Neither token nor email; nothing to correlate on.
    NoIdentity,
    /// A later order matched by email or token.
    Resolved { order_id: String },
    /// An abandonment for this key already exists (found, or lost the insert race).
    AlreadyRecorded,
    Detected(CommerceEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Batch summary for one pass. `error` is set only when the candidate set could not be read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub pass: PassKind,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub detected: usize,
    pub resolved: usize,
    pub already_recorded: usize,
    pub skipped_no_identity: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassReport {
    fn new(pass: PassKind, started_at: DateTime<Utc>) -> Self {
        Self {
            pass,
            started_at,
            candidates: 0,
            detected: 0,
            resolved: 0,
            already_recorded: 0,
            skipped_no_identity: 0,
            failed: 0,
            error: None,
        }
    }

    fn tally(&mut self, result: &Result<CandidateOutcome, CorrelatorError>) {
        match result {
            Ok(CandidateOutcome::NoIdentity) => self.skipped_no_identity += 1,
            Ok(CandidateOutcome::Resolved { .. }) => self.resolved += 1,
            Ok(CandidateOutcome::AlreadyRecorded) => self.already_recorded += 1,
            Ok(CandidateOutcome::Detected(_)) => self.detected += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// The start event's token; an empty string counts as absent.
fn start_token(kind: PassKind, start: &CommerceEvent) -> Option<&str> {
    start.metadata.get(kind.token_key()).filter(|t| !t.is_empty())
}

/// Build the abandonment event for an unresolved start event.
///
/// Identity, value, and products are copied; metadata is the start event's plus the
/// back-reference token, the source event id, `abandonedAt`, and `detectedBy`.
pub fn synthesize_abandonment(
    kind: PassKind,
    start: &CommerceEvent,
    now: DateTime<Utc>,
) -> NewCommerceEvent {
    let mut metadata = start.metadata.clone();
    let token = start_token(kind, start).map(str::to_string);
    metadata.set(kind.original_key(), token);
    metadata.source_event_id = Some(start.id.clone());
    metadata.abandoned_at = Some(now);
    metadata.detected_by = Some(DETECTED_BY_SCHEDULED_JOB.to_string());

    let mut ev = NewCommerceEvent::new(start.tenant_id.clone(), kind.abandoned_type(), now);
    ev.customer_email = start.customer_email.clone();
    ev.customer_name = start.customer_name.clone();
    ev.external_customer_id = start.external_customer_id.clone();
    ev.value = start.value;
    ev.products = start.products.clone();
    ev.metadata = metadata;
    ev
}

/// Abandonment detection over an event store.
///
/// Overlapping runs are safe: the store's uniqueness key on abandonment events decides
/// which run records a given abandonment, and the loser counts it as already recorded.
pub struct AbandonmentCorrelator {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    cart: PassConfig,
    checkout: PassConfig,
}

impl AbandonmentCorrelator {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cart: PassConfig::cart(),
            checkout: PassConfig::checkout(),
        }
    }

    /// Override the per-pass thresholds.
    pub fn with_configs(mut self, cart: PassConfig, checkout: PassConfig) -> Self {
        self.cart = cart;
        self.checkout = checkout;
        self
    }

    pub fn config(&self, kind: PassKind) -> &PassConfig {
        match kind {
            PassKind::Cart => &self.cart,
            PassKind::Checkout => &self.checkout,
        }
    }

    pub async fn detect_cart_abandonment(&self) -> PassReport {
        self.run_pass(PassKind::Cart).await
    }

    pub async fn detect_checkout_abandonment(&self) -> PassReport {
        self.run_pass(PassKind::Checkout).await
    }

    /// Run one pass over every tenant. Never fails: a candidate-set read error is
    /// reported in `PassReport::error`; per-candidate errors are counted in `failed`.
    pub async fn run_pass(&self, kind: PassKind) -> PassReport {
        let config = *self.config(kind);
        let now = self.clock.now();
        let mut report = PassReport::new(kind, now);
        tracing::info!(pass = kind.name(), "running abandonment detection");

        let query = EventQuery {
            types: vec![kind.start_type()],
            range: config.window(now),
            ..Default::default()
        };
        let candidates = match self.store.query(&query).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(pass = kind.name(), error = %e, "failed to load candidate start events");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.candidates = candidates.len();

        for start in &candidates {
            let result = self.evaluate(kind, start, now).await;
            match &result {
                Ok(CandidateOutcome::Detected(ev)) => tracing::info!(
                    pass = kind.name(),
                    tenant_id = %ev.tenant_id,
                    customer = ev.customer_email.as_deref().unwrap_or("unknown customer"),
                    value = ev.value_or_zero(),
                    "abandonment detected"
                ),
                Err(e) => tracing::warn!(
                    pass = kind.name(),
                    tenant_id = %start.tenant_id,
                    event_id = %start.id,
                    error = %e,
                    "skipping start event"
                ),
                Ok(_) => {}
            }
            report.tally(&result);
        }

        tracing::info!(
            pass = kind.name(),
            candidates = report.candidates,
            detected = report.detected,
            resolved = report.resolved,
            already_recorded = report.already_recorded,
            failed = report.failed,
            "abandonment detection completed"
        );
        report
    }

    /// Resolve-or-record decision for one start event.
    pub async fn evaluate(
        &self,
        kind: PassKind,
        start: &CommerceEvent,
        now: DateTime<Utc>,
    ) -> Result<CandidateOutcome, CorrelatorError> {
        let token = start_token(kind, start);
        let email = start.customer_email.as_deref();
        if token.is_none() && email.is_none() {
            return Ok(CandidateOutcome::NoIdentity);
        }

        let completion = MatchPredicate {
            customer_email: email.map(str::to_string),
            token: token.map(|t| TokenMatch {
                key: MetadataKey::CheckoutToken,
                value: t.to_string(),
            }),
            created_at_or_after: Some(start.created_at),
        };
        if let Some(order) = self
            .store
            .find_one(&start.tenant_id, EventType::OrderPlaced, &completion)
            .await?
        {
            return Ok(CandidateOutcome::Resolved { order_id: order.id });
        }

        let existing = MatchPredicate {
            token: Some(match token {
                Some(t) => TokenMatch {
                    key: kind.original_key(),
                    value: t.to_string(),
                },
                None => TokenMatch {
                    key: MetadataKey::SourceEventId,
                    value: start.id.clone(),
                },
            }),
            ..Default::default()
        };
        if self
            .store
            .find_one(&start.tenant_id, kind.abandoned_type(), &existing)
            .await?
            .is_some()
        {
            return Ok(CandidateOutcome::AlreadyRecorded);
        }

        match self.store.append(synthesize_abandonment(kind, start, now)).await {
            Ok(ev) => Ok(CandidateOutcome::Detected(ev)),
            Err(EventStoreError::Conflict { .. }) => Ok(CandidateOutcome::AlreadyRecorded),
            Err(e) => Err(e.into()),
        }
    }
}
