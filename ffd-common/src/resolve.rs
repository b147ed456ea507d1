//! Resolution engine: the pure decision function the whole system exists for.
//!
//! Precedence, evaluated top to bottom with short-circuiting:
//!
//! 1. killed / archived lifecycle → OFF (absolute; precedes overrides)
//! 2. environment not in the flag's environment set → OFF
//! 3. per-tenant override → the override's value
//! 4. master switch off → OFF
//! 5. strategy dispatch (all-or-nothing / percentage / tier / specific)
//!
//! A kill must win over a pre-existing `enabled: true` override, which is
//! why lifecycle is checked before overrides rather than relying on the
//! master switch alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::bucket::{Bucketer, StickyBucketer, VolatileBucketer};
use crate::errors::FlagError;
use crate::evallog::{EvalRecord, EvalSink, NullSink};
use crate::store::{FlagStore, OverrideStore};
use crate::types::{
    Decision, DecisionSource, FeatureFlag, FlagCategory, FlagKey, FlagLifecycle, RolloutStrategy,
    TenantContext, TenantOverride,
};

/// Decides ON/OFF for (flag, tenant) pairs.
///
/// Read-only over the injected stores; never blocks on I/O. Evaluation
/// logging goes through a non-blocking sink.
pub struct ResolutionEngine {
    flags: Arc<dyn FlagStore>,
    overrides: Arc<dyn OverrideStore>,
    sticky: StickyBucketer,
    volatile: VolatileBucketer,
    sink: Arc<dyn EvalSink>,
}

impl ResolutionEngine {
    pub fn new(flags: Arc<dyn FlagStore>, overrides: Arc<dyn OverrideStore>) -> Self {
        Self {
            flags,
            overrides,
            sticky: StickyBucketer::default(),
            volatile: VolatileBucketer,
            sink: Arc::new(NullSink),
        }
    }

    /// Use a non-default bucket salt. Must stay stable across restarts or
    /// every in-flight percentage rollout reshuffles.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.sticky = StickyBucketer::new(salt);
        self
    }

    /// Attach an evaluation-log sink for flags with `log_checks` set.
    pub fn with_sink(mut self, sink: Arc<dyn EvalSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Core decision function. Pure modulo the volatile bucketer.
    pub fn resolve(
        &self,
        flag: &FeatureFlag,
        override_entry: Option<&TenantOverride>,
        ctx: &TenantContext,
    ) -> Result<Decision, FlagError> {
        let decision = self.decide(flag, override_entry, ctx)?;
        if flag.log_checks {
            self.sink.record(EvalRecord {
                tenant_id: ctx.tenant_id.clone(),
                flag_key: flag.key.clone(),
                enabled: decision.enabled,
                source: decision.source,
                timestamp: Utc::now(),
            });
        }
        Ok(decision)
    }

    fn decide(
        &self,
        flag: &FeatureFlag,
        override_entry: Option<&TenantOverride>,
        ctx: &TenantContext,
    ) -> Result<Decision, FlagError> {
        match flag.lifecycle {
            FlagLifecycle::Killed => return Ok(Decision::off(DecisionSource::Killed)),
            FlagLifecycle::Archived => return Ok(Decision::off(DecisionSource::Archived)),
            FlagLifecycle::Active => {}
        }

        if !flag.environments.contains(&ctx.environment) {
            return Ok(Decision::off(DecisionSource::EnvironmentExcluded));
        }

        if let Some(entry) = override_entry {
            return Ok(Decision {
                enabled: entry.enabled,
                source: DecisionSource::Override,
            });
        }

        if !flag.enabled {
            return Ok(Decision::off(DecisionSource::Disabled));
        }

        match flag.strategy {
            RolloutStrategy::AllOrNothing => Ok(Decision::on(DecisionSource::Strategy)),
            RolloutStrategy::Percentage => {
                if flag.rollout_percentage > 100 {
                    // Write-time validation makes this unreachable; a stored
                    // value above 100 means the record was corrupted.
                    return Err(FlagError::Configuration {
                        message: format!(
                            "flag '{}' has rollout percentage {}",
                            flag.key, flag.rollout_percentage
                        ),
                    });
                }
                let bucketer: &dyn Bucketer = if flag.rollout_sticky {
                    &self.sticky
                } else {
                    &self.volatile
                };
                let bucket = bucketer.bucket(&ctx.tenant_id, &flag.key);
                Ok(Decision {
                    enabled: bucket < flag.rollout_percentage,
                    source: DecisionSource::PercentageRollout,
                })
            }
            RolloutStrategy::Tier => {
                let included = ctx
                    .tier
                    .as_ref()
                    .is_some_and(|t| flag.allowed_tiers.contains(t));
                Ok(Decision {
                    enabled: included,
                    source: DecisionSource::Tier,
                })
            }
            // Only overrides (handled above) turn a specific-strategy flag on.
            RolloutStrategy::Specific => Ok(Decision::off(DecisionSource::SpecificNoOverride)),
        }
    }

    /// Resolution that never fails: internal errors collapse to the
    /// category-dependent safe default. Kill-switch-category flags fail
    /// closed; everything else fails open.
    pub fn resolve_safe(
        &self,
        flag: &FeatureFlag,
        override_entry: Option<&TenantOverride>,
        ctx: &TenantContext,
    ) -> Decision {
        match self.resolve(flag, override_entry, ctx) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    flag = %flag.key,
                    tenant = %ctx.tenant_id,
                    "resolution failed, serving safe default: {err}"
                );
                let enabled = !matches!(flag.category, FlagCategory::KillSwitch);
                Decision {
                    enabled,
                    source: DecisionSource::FailSafe,
                }
            }
        }
    }

    /// Resolve one flag by key, reading flag and override state from the
    /// stores.
    pub fn evaluate_key(&self, key: &FlagKey, ctx: &TenantContext) -> Result<Decision, FlagError> {
        let flag = self
            .flags
            .get_by_key(key)
            .ok_or_else(|| FlagError::not_found(format!("flag '{key}'")))?;
        let override_entry = self.overrides.get(flag.id, &ctx.tenant_id);
        Ok(self.resolve_safe(&flag, override_entry.as_ref(), ctx))
    }

    /// The bulk evaluation surface: every non-archived flag's decision for
    /// one tenant. Archived flags are retired and omitted entirely.
    pub fn evaluate_all(&self, ctx: &TenantContext) -> BTreeMap<String, bool> {
        let mut decisions = BTreeMap::new();
        for flag in self.flags.list() {
            if flag.lifecycle == FlagLifecycle::Archived {
                continue;
            }
            let override_entry = self.overrides.get(flag.id, &ctx.tenant_id);
            let decision = self.resolve_safe(&flag, override_entry.as_ref(), ctx);
            debug!(
                flag = %flag.key,
                tenant = %ctx.tenant_id,
                enabled = decision.enabled,
                source = decision.source.as_str(),
                "evaluated"
            );
            decisions.insert(flag.key.as_str().to_string(), decision.enabled);
        }
        decisions
    }
}
