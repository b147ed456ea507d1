//! Test fixtures shared across FFD crates.
//!
//! The builder covers the common case of a flag with sensible defaults so
//! tests only spell out what they are actually exercising.

use std::collections::BTreeSet;

use chrono::Utc;

use crate::types::{FeatureFlag, FlagCategory, FlagId, FlagKey, FlagLifecycle, RolloutStrategy};

/// Builder for [`FeatureFlag`] fixtures.
///
/// Defaults: enabled, `AllOrNothing` strategy, `Beta` category, sticky
/// bucketing, active in `production`.
pub struct FlagBuilder {
    flag: FeatureFlag,
}

impl FlagBuilder {
    /// Create a builder for the given flag key. Panics on an invalid key;
    /// fixtures use literal keys.
    pub fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            flag: FeatureFlag {
                id: FlagId::new(),
                key: FlagKey::parse(key).expect("fixture flag key must be valid"),
                display_name: key.replace('_', " "),
                description: String::new(),
                category: FlagCategory::Beta,
                enabled: true,
                lifecycle: FlagLifecycle::Active,
                strategy: RolloutStrategy::AllOrNothing,
                rollout_percentage: 0,
                rollout_sticky: true,
                allowed_tiers: BTreeSet::new(),
                is_kill_switch: false,
                require_confirmation: false,
                log_checks: false,
                environments: BTreeSet::from(["production".to_string()]),
                created_by: "fixture".into(),
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn disabled(mut self) -> Self {
        self.flag.enabled = false;
        self
    }

    pub fn category(mut self, category: FlagCategory) -> Self {
        self.flag.category = category;
        self
    }

    pub fn percentage(mut self, pct: u8) -> Self {
        self.flag.strategy = RolloutStrategy::Percentage;
        self.flag.rollout_percentage = pct;
        self
    }

    pub fn volatile_bucketing(mut self) -> Self {
        self.flag.rollout_sticky = false;
        self
    }

    pub fn tiers<const N: usize>(mut self, tiers: [&str; N]) -> Self {
        self.flag.strategy = RolloutStrategy::Tier;
        self.flag.allowed_tiers = tiers.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn specific(mut self) -> Self {
        self.flag.strategy = RolloutStrategy::Specific;
        self
    }

    pub fn kill_switch(mut self) -> Self {
        self.flag.is_kill_switch = true;
        self.flag.category = FlagCategory::KillSwitch;
        self
    }

    pub fn require_confirmation(mut self) -> Self {
        self.flag.require_confirmation = true;
        self
    }

    pub fn log_checks(mut self) -> Self {
        self.flag.log_checks = true;
        self
    }

    pub fn environments<const N: usize>(mut self, envs: [&str; N]) -> Self {
        self.flag.environments = envs.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn lifecycle(mut self, lifecycle: FlagLifecycle) -> Self {
        self.flag.lifecycle = lifecycle;
        self
    }

    pub fn build(self) -> FeatureFlag {
        self.flag
    }
}
