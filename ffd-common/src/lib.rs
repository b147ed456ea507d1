//! Shared engine for the feature flag daemon.
//!
//! Everything that decides who sees what lives here: the rollout bucketer,
//! the resolution engine, the store contracts, the admin mutation surface,
//! and the append-only audit ledger. The `ffd` binary wires these to an HTTP
//! control plane.

#![forbid(unsafe_code)]

pub mod admin;
pub mod bucket;
pub mod config;
pub mod errors;
pub mod evallog;
pub mod resolve;
pub mod store;
pub mod testing;
pub mod types;

pub use admin::AdminOps;
pub use bucket::{Bucketer, DEFAULT_BUCKET_SALT, StickyBucketer, VolatileBucketer};
pub use config::{ConfigError, FfdConfig};
pub use errors::FlagError;
pub use evallog::{EvalRecord, EvalSink, NullSink, QueueSink};
pub use resolve::ResolutionEngine;
pub use store::{
    FlagStore, HistoryLog, MemoryFlagStore, MemoryHistoryLog, MemoryOverrideStore, OverrideStore,
};
pub use types::{
    ChangeType, CreateFlagInput, Decision, DecisionSource, FeatureFlag, FlagCategory, FlagId,
    FlagKey, FlagLifecycle, FlagPatch, FlagSnapshot, HistoryEntry, RolloutStrategy, TenantContext,
    TenantId, TenantOverride,
};
