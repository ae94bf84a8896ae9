//! Webhook ingestion: resolve the tenant, audit the raw body, normalize, append.

mod ingestor;
mod payload;

pub use ingestor::{IngestError, IngestOutcome, WebhookIngestor, WebhookTopic};
pub use payload::{extract_customer_name, extract_products, normalize, parse_amount};
