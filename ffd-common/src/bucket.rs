//! Rollout bucketing.
//!
//! Maps `(tenant, flag key)` to a percentile bucket in `[0, 99]`. The sticky
//! bucketer is a pure function of its inputs plus a fixed salt, which is what
//! makes percentage rollouts monotonic: raising the percentage can only add
//! tenants, never drop ones already included.

use rand::RngExt;

use crate::types::{FlagKey, TenantId};

/// Default salt mixed into sticky bucket hashes. Overridable via config, but
/// changing it reshuffles every in-flight rollout, so operators should not.
pub const DEFAULT_BUCKET_SALT: &str = "ffd-rollout-v1";

/// Assigns a tenant to a percentile bucket for one flag.
pub trait Bucketer: Send + Sync {
    /// Returns a bucket in `[0, 99]`.
    fn bucket(&self, tenant: &TenantId, key: &FlagKey) -> u8;
}

/// Deterministic bucketer: blake3 of `salt ++ tenant ++ ":" ++ key`.
///
/// Independent of call order, timing, and process lifetime. The `":"`
/// separator keeps `("ab", "c")` and `("a", "bc")` in distinct buckets.
#[derive(Debug, Clone)]
pub struct StickyBucketer {
    salt: String,
}

impl StickyBucketer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }
}

impl Default for StickyBucketer {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SALT)
    }
}

impl Bucketer for StickyBucketer {
    fn bucket(&self, tenant: &TenantId, key: &FlagKey) -> u8 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(tenant.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(key.as_str().as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_be_bytes(prefix) % 100) as u8
    }
}

/// Re-rolled bucketer for flags that opt out of sticky assignment.
///
/// Breaks the monotonicity guarantee on purpose: each evaluation samples a
/// fresh bucket, so a 30% rollout admits roughly 30% of *calls*, not a fixed
/// 30% of tenants. Only for flags that explicitly want sampling behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatileBucketer;

impl Bucketer for VolatileBucketer {
    fn bucket(&self, _tenant: &TenantId, _key: &FlagKey) -> u8 {
        rand::rng().random_range(0..100)
    }
}
