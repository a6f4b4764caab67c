//! The indexing pipeline.
//!
//! - [`scanner`]: cursor, batching, pause/resume, reindex, real-time dispatch
//! - [`pools`]: pool creation, manual add/remove, subscriptions
//! - [`processor`]: Swap/Mint/Burn decoding, enrichment and persistence

pub mod pools;
pub mod processor;
pub mod scanner;

pub use pools::{
    AddPoolOutcome, PoolLifecycleManager, Resubscribe, ResubscribeBackoff, SubscriptionHandle,
    PLACEHOLDER_TICK,
};
pub use processor::{EventProcessor, ProcessReport};
pub use scanner::{BlockScanner, ScanStatus, ScannerSettings, TickOutcome};
