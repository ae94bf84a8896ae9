//! Abandonment detection and retention over the commerce event store.
//!
//! Both passes are stateless between runs: everything a pass knows about earlier runs
//! comes from abandonment events already in the store.

mod correlator;
mod retention;

pub use correlator::{
    synthesize_abandonment, AbandonmentCorrelator, CandidateOutcome, CorrelatorError, PassConfig,
    PassKind, PassReport,
};
pub use retention::{RetentionSweep, SweepReport};
