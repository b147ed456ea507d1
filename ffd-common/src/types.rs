//! Common types used across FFD components.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FlagError;

/// Maximum accepted length for a flag key.
pub const MAX_FLAG_KEY_LEN: usize = 64;

/// Unique identifier for a feature flag, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlagId(pub Uuid);

impl FlagId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, FlagError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| FlagError::NotFound {
                what: format!("flag '{s}'"),
            })
    }
}

impl Default for FlagId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FlagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for the tenant (customer organization) being targeted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated flag key: `^[a-z][a-z0-9_]*$`, immutable after creation.
///
/// The key is the stable public name of the flag; SDKs and the rollout
/// bucketer hash it, so it can never change once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlagKey(String);

impl FlagKey {
    /// Parse and validate a flag key.
    pub fn parse(s: impl Into<String>) -> Result<Self, FlagError> {
        let s = s.into();
        if s.is_empty() || s.len() > MAX_FLAG_KEY_LEN {
            return Err(FlagError::Validation {
                field: "flag_key".into(),
                message: format!("length must be 1..={MAX_FLAG_KEY_LEN}"),
            });
        }
        let mut chars = s.chars();
        let first = chars.next().unwrap_or('\0');
        if !first.is_ascii_lowercase() {
            return Err(FlagError::Validation {
                field: "flag_key".into(),
                message: format!("'{s}' must start with a lowercase letter"),
            });
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(FlagError::Validation {
                field: "flag_key".into(),
                message: format!("'{s}' may only contain [a-z0-9_]"),
            });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FlagKey {
    type Error = FlagError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<FlagKey> for String {
    fn from(k: FlagKey) -> Self {
        k.0
    }
}

impl std::fmt::Display for FlagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product category a flag belongs to.
///
/// `KillSwitch` is special: resolution failures for flags in this category
/// fail closed rather than open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCategory {
    Core,
    Beta,
    Experiment,
    TierGate,
    KillSwitch,
    Ops,
}

/// Rule family used to decide tenant inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Flag is on for everyone (subject to the master switch).
    AllOrNothing,
    /// Tenant is included when its rollout bucket falls below the percentage.
    Percentage,
    /// Tenant is included when its subscription tier is in `allowed_tiers`.
    Tier,
    /// Off for everyone except tenants with an explicit override.
    Specific,
}

/// Lifecycle state of a flag. `Killed` and `Archived` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagLifecycle {
    Active,
    Killed,
    Archived,
}

impl FlagLifecycle {
    /// Terminal states accept no further mutations.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Killed | Self::Archived)
    }
}

/// Canonical feature flag definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub id: FlagId,
    /// Immutable after creation; globally unique.
    pub key: FlagKey,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub category: FlagCategory,
    /// Global master switch.
    pub enabled: bool,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: FlagLifecycle,
    pub strategy: RolloutStrategy,
    /// Meaningful only under `Percentage` strategy. Always in [0, 100].
    #[serde(default)]
    pub rollout_percentage: u8,
    /// True = stable per-tenant bucketing (monotonic rollouts).
    #[serde(default = "default_true")]
    pub rollout_sticky: bool,
    /// Meaningful only under `Tier` strategy.
    #[serde(default)]
    pub allowed_tiers: BTreeSet<String>,
    /// Enables the emergency-kill admin action.
    #[serde(default)]
    pub is_kill_switch: bool,
    /// Gates `toggle` behind an explicit confirmation flag.
    #[serde(default)]
    pub require_confirmation: bool,
    /// Enables async evaluation logging.
    #[serde(default)]
    pub log_checks: bool,
    /// Environments this flag is active in.
    pub environments: BTreeSet<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_lifecycle() -> FlagLifecycle {
    FlagLifecycle::Active
}

fn default_true() -> bool {
    true
}

/// Manual per-tenant exception that bypasses the rollout computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantOverride {
    pub flag_id: FlagId,
    pub tenant_id: TenantId,
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Evaluation-time context for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub environment: String,
    /// Subscription tier, when known. Absent tier never matches `Tier` strategy.
    #[serde(default)]
    pub tier: Option<String>,
}

/// Which precedence rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Killed,
    Archived,
    EnvironmentExcluded,
    Override,
    Disabled,
    Strategy,
    PercentageRollout,
    Tier,
    SpecificNoOverride,
    /// Internal failure; the category-dependent safe default was served.
    FailSafe,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Killed => "killed",
            Self::Archived => "archived",
            Self::EnvironmentExcluded => "environment_excluded",
            Self::Override => "override",
            Self::Disabled => "disabled",
            Self::Strategy => "strategy",
            Self::PercentageRollout => "percentage_rollout",
            Self::Tier => "tier",
            Self::SpecificNoOverride => "specific_no_override",
            Self::FailSafe => "fail_safe",
        }
    }
}

/// Outcome of resolving one flag for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub enabled: bool,
    pub source: DecisionSource,
}

impl Decision {
    pub fn off(source: DecisionSource) -> Self {
        Self {
            enabled: false,
            source,
        }
    }

    pub fn on(source: DecisionSource) -> Self {
        Self {
            enabled: true,
            source,
        }
    }
}

/// Kind of state transition recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Enabled,
    Disabled,
    /// Metadata edit via the partial-update surface.
    Updated,
    RolloutUpdated,
    Killed,
    Archived,
    OverrideAdded,
    OverrideRemoved,
}

/// Point-in-time capture of a flag's mutation-relevant fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub enabled: bool,
    pub lifecycle: FlagLifecycle,
    pub strategy: RolloutStrategy,
    pub rollout_percentage: u8,
    pub rollout_sticky: bool,
    pub allowed_tiers: BTreeSet<String>,
    pub environments: BTreeSet<String>,
    pub display_name: String,
    pub description: String,
    pub category: FlagCategory,
    pub require_confirmation: bool,
    pub log_checks: bool,
    /// Overrides in force at snapshot time. Populated only for `killed`
    /// entries, where the kill wipes them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<TenantOverride>,
}

impl FlagSnapshot {
    pub fn of(flag: &FeatureFlag) -> Self {
        Self {
            enabled: flag.enabled,
            lifecycle: flag.lifecycle,
            strategy: flag.strategy,
            rollout_percentage: flag.rollout_percentage,
            rollout_sticky: flag.rollout_sticky,
            allowed_tiers: flag.allowed_tiers.clone(),
            environments: flag.environments.clone(),
            display_name: flag.display_name.clone(),
            description: flag.description.clone(),
            category: flag.category,
            require_confirmation: flag.require_confirmation,
            log_checks: flag.log_checks,
            overrides: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Vec<TenantOverride>) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Append-only audit record of one state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub flag_id: FlagId,
    pub change_type: ChangeType,
    /// Tenant an override action targeted; absent for flag-level changes.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub before: Option<FlagSnapshot>,
    #[serde(default)]
    pub after: Option<FlagSnapshot>,
}

/// Fields accepted when creating a flag.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFlagInput {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub category: FlagCategory,
    #[serde(default)]
    pub enabled: bool,
    pub strategy: RolloutStrategy,
    #[serde(default)]
    pub rollout_percentage: u8,
    #[serde(default = "default_true")]
    pub rollout_sticky: bool,
    #[serde(default)]
    pub allowed_tiers: BTreeSet<String>,
    #[serde(default)]
    pub is_kill_switch: bool,
    #[serde(default)]
    pub require_confirmation: bool,
    #[serde(default)]
    pub log_checks: bool,
    pub environments: BTreeSet<String>,
    pub created_by: String,
}

/// Partial update of a flag's editable fields.
///
/// `flag_key` is present only so an attempt to change it can be rejected
/// explicitly instead of being ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagPatch {
    #[serde(default)]
    pub flag_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<FlagCategory>,
    #[serde(default)]
    pub strategy: Option<RolloutStrategy>,
    #[serde(default)]
    pub rollout_sticky: Option<bool>,
    #[serde(default)]
    pub allowed_tiers: Option<BTreeSet<String>>,
    #[serde(default)]
    pub is_kill_switch: Option<bool>,
    #[serde(default)]
    pub require_confirmation: Option<bool>,
    #[serde(default)]
    pub log_checks: Option<bool>,
    #[serde(default)]
    pub environments: Option<BTreeSet<String>>,
}
