//! Core types and traits for storefront event analytics.
//!
//! `CommerceEvent` is the append-only record; abandonment detection, ingestion, and the
//! read API all go through the `EventStore` trait defined here.

mod audit;
mod clock;
mod dto;
mod event;
mod tenant;
mod traits;

pub use audit::*;
pub use clock::*;
pub use dto::*;
pub use event::*;
pub use tenant::*;
pub use traits::*;
