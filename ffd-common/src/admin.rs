//! Admin operations: the mutation surface behind the control panel.
//!
//! Every operation is one atomic unit: validate, mutate the flag or override
//! store, append exactly one history entry. If the history append fails the
//! mutation is rolled back with a compensating restore, so "state changed but
//! no audit entry" can never be observed. Mutations serialize per flag via a
//! lock registry; evaluation never takes these locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::FlagError;
use crate::store::{FlagStore, HistoryLog, OverrideStore};
use crate::types::{
    ChangeType, CreateFlagInput, FeatureFlag, FlagId, FlagKey, FlagLifecycle, FlagPatch,
    FlagSnapshot, HistoryEntry, TenantId, TenantOverride,
};

/// Administrative mutation surface over the injected stores.
pub struct AdminOps {
    flags: Arc<dyn FlagStore>,
    overrides: Arc<dyn OverrideStore>,
    history: Arc<dyn HistoryLog>,
    locks: Mutex<HashMap<FlagId, Arc<Mutex<()>>>>,
}

impl AdminOps {
    pub fn new(
        flags: Arc<dyn FlagStore>,
        overrides: Arc<dyn OverrideStore>,
        history: Arc<dyn HistoryLog>,
    ) -> Self {
        Self {
            flags,
            overrides,
            history,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_handle(&self, id: FlagId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    fn entry(
        flag_id: FlagId,
        change_type: ChangeType,
        reason: Option<String>,
        actor: &str,
        before: Option<FlagSnapshot>,
        after: Option<FlagSnapshot>,
    ) -> HistoryEntry {
        HistoryEntry {
            id: Uuid::new_v4(),
            flag_id,
            change_type,
            tenant_id: None,
            reason,
            created_by: actor.to_string(),
            created_at: Utc::now(),
            before,
            after,
        }
    }

    /// Fetch a flag for mutation, rejecting terminal lifecycles.
    fn mutable_flag(&self, id: FlagId) -> Result<FeatureFlag, FlagError> {
        let flag = self
            .flags
            .get(id)
            .ok_or_else(|| FlagError::not_found(format!("flag '{id}'")))?;
        if flag.lifecycle.is_terminal() {
            return Err(FlagError::validation(
                "lifecycle",
                format!("flag '{}' is {:?} and accepts no further changes", flag.key, flag.lifecycle),
            ));
        }
        Ok((*flag).clone())
    }

    /// Commit a flag mutation plus its history entry, rolling the flag back
    /// to `before` if the append fails.
    fn commit(
        &self,
        before: &FeatureFlag,
        after: FeatureFlag,
        entry: HistoryEntry,
    ) -> Result<FeatureFlag, FlagError> {
        self.flags.update(after.clone())?;
        if let Err(err) = self.history.append(entry) {
            if let Err(restore_err) = self.flags.update(before.clone()) {
                error!(
                    flag = %before.key,
                    "rollback after failed history append also failed: {restore_err}"
                );
            }
            return Err(err);
        }
        Ok(after)
    }

    /// Create a new flag. The key must match `^[a-z][a-z0-9_]*$` and be
    /// globally unique.
    pub fn create_flag(&self, input: CreateFlagInput) -> Result<FeatureFlag, FlagError> {
        let key = FlagKey::parse(&input.key)?;
        if input.rollout_percentage > 100 {
            return Err(FlagError::validation(
                "rollout_percentage",
                format!("{} is out of range 0..=100", input.rollout_percentage),
            ));
        }
        let now = Utc::now();
        let flag = FeatureFlag {
            id: FlagId::new(),
            key,
            display_name: input.display_name,
            description: input.description,
            category: input.category,
            enabled: input.enabled,
            lifecycle: FlagLifecycle::Active,
            strategy: input.strategy,
            rollout_percentage: input.rollout_percentage,
            rollout_sticky: input.rollout_sticky,
            allowed_tiers: input.allowed_tiers,
            is_kill_switch: input.is_kill_switch,
            require_confirmation: input.require_confirmation,
            log_checks: input.log_checks,
            environments: input.environments,
            created_by: input.created_by.clone(),
            created_at: now,
            updated_at: now,
        };

        self.flags.insert(flag.clone())?;
        let entry = Self::entry(
            flag.id,
            ChangeType::Created,
            None,
            &input.created_by,
            None,
            Some(FlagSnapshot::of(&flag)),
        );
        if let Err(err) = self.history.append(entry) {
            if let Err(restore_err) = self.flags.remove(flag.id) {
                error!(flag = %flag.key, "rollback of failed create also failed: {restore_err}");
            }
            return Err(err);
        }
        info!(flag = %flag.key, id = %flag.id, "flag created");
        Ok(flag)
    }

    /// Flip the global master switch. Flags with `require_confirmation` set
    /// reject the toggle unless `confirmed` is true.
    pub fn toggle_flag(
        &self,
        id: FlagId,
        enabled: bool,
        confirmed: bool,
        actor: &str,
    ) -> Result<FeatureFlag, FlagError> {
        let lock = self.lock_handle(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let before = self.mutable_flag(id)?;
        if before.require_confirmation && !confirmed {
            return Err(FlagError::ConfirmationRequired {
                key: before.key.as_str().to_string(),
            });
        }
        let mut after = before.clone();
        after.enabled = enabled;
        after.updated_at = Utc::now();

        let change_type = if enabled {
            ChangeType::Enabled
        } else {
            ChangeType::Disabled
        };
        let entry = Self::entry(
            id,
            change_type,
            None,
            actor,
            Some(FlagSnapshot::of(&before)),
            Some(FlagSnapshot::of(&after)),
        );
        let flag = self.commit(&before, after, entry)?;
        info!(flag = %flag.key, enabled, "flag toggled");
        Ok(flag)
    }

    /// Partial update of editable fields. `flag_key` is immutable; a patch
    /// that names it is rejected outright.
    pub fn update_flag(
        &self,
        id: FlagId,
        patch: FlagPatch,
        actor: &str,
    ) -> Result<FeatureFlag, FlagError> {
        if patch.flag_key.is_some() {
            return Err(FlagError::ImmutableField {
                field: "flag_key".into(),
            });
        }
        let lock = self.lock_handle(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let before = self.mutable_flag(id)?;
        let mut after = before.clone();
        if let Some(v) = patch.display_name {
            after.display_name = v;
        }
        if let Some(v) = patch.description {
            after.description = v;
        }
        if let Some(v) = patch.category {
            after.category = v;
        }
        if let Some(v) = patch.strategy {
            after.strategy = v;
        }
        if let Some(v) = patch.rollout_sticky {
            after.rollout_sticky = v;
        }
        if let Some(v) = patch.allowed_tiers {
            after.allowed_tiers = v;
        }
        if let Some(v) = patch.is_kill_switch {
            after.is_kill_switch = v;
        }
        if let Some(v) = patch.require_confirmation {
            after.require_confirmation = v;
        }
        if let Some(v) = patch.log_checks {
            after.log_checks = v;
        }
        if let Some(v) = patch.environments {
            after.environments = v;
        }
        after.updated_at = Utc::now();

        let entry = Self::entry(
            id,
            ChangeType::Updated,
            None,
            actor,
            Some(FlagSnapshot::of(&before)),
            Some(FlagSnapshot::of(&after)),
        );
        self.commit(&before, after, entry)
    }

    /// Set the rollout percentage. Meaningful only under the `Percentage`
    /// strategy but recorded regardless, so a later strategy switch picks up
    /// the staged value.
    pub fn update_rollout(
        &self,
        id: FlagId,
        percentage: u16,
        actor: &str,
    ) -> Result<FeatureFlag, FlagError> {
        if percentage > 100 {
            return Err(FlagError::validation(
                "rollout_percentage",
                format!("{percentage} is out of range 0..=100"),
            ));
        }
        let lock = self.lock_handle(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let before = self.mutable_flag(id)?;
        let mut after = before.clone();
        after.rollout_percentage = percentage as u8;
        after.updated_at = Utc::now();

        let entry = Self::entry(
            id,
            ChangeType::RolloutUpdated,
            None,
            actor,
            Some(FlagSnapshot::of(&before)),
            Some(FlagSnapshot::of(&after)),
        );
        let flag = self.commit(&before, after, entry)?;
        info!(
            flag = %flag.key,
            from = before.rollout_percentage,
            to = flag.rollout_percentage,
            "rollout updated"
        );
        Ok(flag)
    }

    /// Emergency kill: force the flag off for every tenant. Requires
    /// `is_kill_switch`. Voids all per-tenant overrides; the removed
    /// overrides are captured in the history entry's before-snapshot.
    pub fn kill_flag(
        &self,
        id: FlagId,
        reason: impl Into<String>,
        actor: &str,
    ) -> Result<FeatureFlag, FlagError> {
        let lock = self.lock_handle(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let before = self.mutable_flag(id)?;
        if !before.is_kill_switch {
            return Err(FlagError::conflict(format!(
                "flag '{}' is not a kill switch",
                before.key
            )));
        }
        let mut after = before.clone();
        after.enabled = false;
        after.lifecycle = FlagLifecycle::Killed;
        after.updated_at = Utc::now();

        let removed_overrides = self.overrides.remove_all_for_flag(id);
        let entry = Self::entry(
            id,
            ChangeType::Killed,
            Some(reason.into()),
            actor,
            Some(FlagSnapshot::of(&before).with_overrides(removed_overrides.clone())),
            Some(FlagSnapshot::of(&after)),
        );
        match self.commit(&before, after, entry) {
            Ok(flag) => {
                info!(flag = %flag.key, voided_overrides = removed_overrides.len(), "flag killed");
                Ok(flag)
            }
            Err(err) => {
                // Put the voided overrides back; the kill did not happen.
                for entry in removed_overrides {
                    if let Err(restore_err) = self.overrides.upsert(entry) {
                        error!(flag = %before.key, "override restore after failed kill: {restore_err}");
                    }
                }
                Err(err)
            }
        }
    }

    /// Retire a flag. Terminal and non-destructive; history stays readable.
    pub fn archive_flag(&self, id: FlagId, actor: &str) -> Result<FeatureFlag, FlagError> {
        let lock = self.lock_handle(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let before = self.mutable_flag(id)?;
        let mut after = before.clone();
        after.lifecycle = FlagLifecycle::Archived;
        after.updated_at = Utc::now();

        let entry = Self::entry(
            id,
            ChangeType::Archived,
            None,
            actor,
            Some(FlagSnapshot::of(&before)),
            Some(FlagSnapshot::of(&after)),
        );
        let flag = self.commit(&before, after, entry)?;
        info!(flag = %flag.key, "flag archived");
        Ok(flag)
    }

    /// Upsert a per-tenant override.
    pub fn add_override(
        &self,
        flag_id: FlagId,
        tenant: TenantId,
        enabled: bool,
        reason: Option<String>,
        actor: &str,
    ) -> Result<TenantOverride, FlagError> {
        let lock = self.lock_handle(flag_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        // Dangling overrides are not permitted; the flag must exist and be live.
        let flag = self.mutable_flag(flag_id)?;
        let entry = TenantOverride {
            flag_id,
            tenant_id: tenant.clone(),
            enabled,
            reason: reason.clone(),
            created_by: actor.to_string(),
            created_at: Utc::now(),
        };
        let previous = self.overrides.upsert(entry.clone())?;

        let mut history_entry = Self::entry(
            flag_id,
            ChangeType::OverrideAdded,
            reason,
            actor,
            None,
            None,
        );
        history_entry.tenant_id = Some(tenant.clone());
        if let Err(err) = self.history.append(history_entry) {
            let restore = match previous {
                Some(prev) => self.overrides.upsert(prev).map(|_| ()),
                None => self.overrides.remove(flag_id, &tenant).map(|_| ()),
            };
            if let Err(restore_err) = restore {
                error!(flag = %flag.key, "override rollback after failed append: {restore_err}");
            }
            return Err(err);
        }
        info!(flag = %flag.key, tenant = %tenant, enabled, "override added");
        Ok(entry)
    }

    /// Remove a per-tenant override.
    pub fn remove_override(
        &self,
        flag_id: FlagId,
        tenant: &TenantId,
        actor: &str,
    ) -> Result<(), FlagError> {
        let lock = self.lock_handle(flag_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let flag = self.mutable_flag(flag_id)?;
        let removed = self.overrides.remove(flag_id, tenant)?;

        let mut history_entry = Self::entry(
            flag_id,
            ChangeType::OverrideRemoved,
            None,
            actor,
            None,
            None,
        );
        history_entry.tenant_id = Some(tenant.clone());
        if let Err(err) = self.history.append(history_entry) {
            if let Err(restore_err) = self.overrides.upsert(removed) {
                error!(flag = %flag.key, "override rollback after failed append: {restore_err}");
            }
            return Err(err);
        }
        info!(flag = %flag.key, tenant = %tenant, "override removed");
        Ok(())
    }

    pub fn get_flag(&self, id: FlagId) -> Result<Arc<FeatureFlag>, FlagError> {
        self.flags
            .get(id)
            .ok_or_else(|| FlagError::not_found(format!("flag '{id}'")))
    }

    pub fn list_flags(&self) -> Vec<Arc<FeatureFlag>> {
        let mut flags = self.flags.list();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }

    pub fn list_overrides(&self, flag_id: FlagId) -> Result<Vec<TenantOverride>, FlagError> {
        self.get_flag(flag_id)?;
        Ok(self.overrides.list_for_flag(flag_id))
    }

    /// Audit trail for one flag, newest first.
    pub fn history(&self, flag_id: FlagId) -> Result<Vec<HistoryEntry>, FlagError> {
        self.get_flag(flag_id)?;
        Ok(self.history.list_by_flag(flag_id))
    }
}
