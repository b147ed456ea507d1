//! Store contracts and in-memory implementations.
//!
//! FlagStore, OverrideStore, and HistoryLog are injected interfaces so the
//! resolution engine and admin operations are testable against in-memory
//! fakes and swappable for a durable backend. The in-memory flag store keeps
//! each flag behind an `Arc` and swaps the whole record on mutation, so a
//! concurrent reader sees either the pre- or post-mutation flag, never a mix.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::errors::FlagError;
use crate::types::{FeatureFlag, FlagId, FlagKey, HistoryEntry, TenantId, TenantOverride};

/// Canonical flag definitions, keyed by id with a unique-key index.
pub trait FlagStore: Send + Sync {
    /// Insert a new flag. Fails with `Conflict` if the key is taken.
    fn insert(&self, flag: FeatureFlag) -> Result<(), FlagError>;

    /// Replace an existing flag wholesale (atomic snapshot swap).
    fn update(&self, flag: FeatureFlag) -> Result<(), FlagError>;

    /// Remove a flag record. Flags are never deleted through the admin
    /// surface; this exists solely so a failed create can be rolled back.
    fn remove(&self, id: FlagId) -> Result<(), FlagError>;

    fn get(&self, id: FlagId) -> Option<Arc<FeatureFlag>>;

    fn get_by_key(&self, key: &FlagKey) -> Option<Arc<FeatureFlag>>;

    /// All flags, unordered.
    fn list(&self) -> Vec<Arc<FeatureFlag>>;
}

/// Per-(flag, tenant) manual enable/disable entries.
pub trait OverrideStore: Send + Sync {
    /// Insert or replace; returns the previous entry when replacing.
    fn upsert(&self, entry: TenantOverride) -> Result<Option<TenantOverride>, FlagError>;

    /// Remove one override; `NotFound` if absent.
    fn remove(&self, flag_id: FlagId, tenant: &TenantId) -> Result<TenantOverride, FlagError>;

    fn get(&self, flag_id: FlagId, tenant: &TenantId) -> Option<TenantOverride>;

    fn list_for_flag(&self, flag_id: FlagId) -> Vec<TenantOverride>;

    /// Remove every override for a flag, returning what was removed.
    /// Used by the kill path, which voids overrides wholesale.
    fn remove_all_for_flag(&self, flag_id: FlagId) -> Vec<TenantOverride>;
}

/// Append-only audit ledger. `append` is the only write operation.
pub trait HistoryLog: Send + Sync {
    fn append(&self, entry: HistoryEntry) -> Result<(), FlagError>;

    /// Entries for one flag, newest first.
    fn list_by_flag(&self, flag_id: FlagId) -> Vec<HistoryEntry>;
}

struct FlagStoreInner {
    by_id: HashMap<FlagId, Arc<FeatureFlag>>,
    by_key: HashMap<FlagKey, FlagId>,
}

/// In-memory flag store.
pub struct MemoryFlagStore {
    inner: RwLock<FlagStoreInner>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FlagStoreInner {
                by_id: HashMap::new(),
                by_key: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryFlagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagStore for MemoryFlagStore {
    fn insert(&self, flag: FeatureFlag) -> Result<(), FlagError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_key.contains_key(&flag.key) {
            return Err(FlagError::conflict(format!(
                "flag key '{}' already exists",
                flag.key
            )));
        }
        if inner.by_id.contains_key(&flag.id) {
            return Err(FlagError::conflict(format!("flag id '{}' already exists", flag.id)));
        }
        debug!("inserting flag {} ({})", flag.key, flag.id);
        inner.by_key.insert(flag.key.clone(), flag.id);
        inner.by_id.insert(flag.id, Arc::new(flag));
        Ok(())
    }

    fn update(&self, flag: FeatureFlag) -> Result<(), FlagError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let existing = inner
            .by_id
            .get(&flag.id)
            .ok_or_else(|| FlagError::not_found(format!("flag '{}'", flag.id)))?;
        if existing.key != flag.key {
            return Err(FlagError::ImmutableField {
                field: "flag_key".into(),
            });
        }
        inner.by_id.insert(flag.id, Arc::new(flag));
        Ok(())
    }

    fn remove(&self, id: FlagId) -> Result<(), FlagError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let flag = inner
            .by_id
            .remove(&id)
            .ok_or_else(|| FlagError::not_found(format!("flag '{id}'")))?;
        inner.by_key.remove(&flag.key);
        Ok(())
    }

    fn get(&self, id: FlagId) -> Option<Arc<FeatureFlag>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(&id).cloned()
    }

    fn get_by_key(&self, key: &FlagKey) -> Option<Arc<FeatureFlag>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let id = inner.by_key.get(key)?;
        inner.by_id.get(id).cloned()
    }

    fn list(&self) -> Vec<Arc<FeatureFlag>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.values().cloned().collect()
    }
}

/// In-memory override store.
pub struct MemoryOverrideStore {
    entries: RwLock<HashMap<(FlagId, TenantId), TenantOverride>>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryOverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn upsert(&self, entry: TenantOverride) -> Result<Option<TenantOverride>, FlagError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = (entry.flag_id, entry.tenant_id.clone());
        Ok(entries.insert(key, entry))
    }

    fn remove(&self, flag_id: FlagId, tenant: &TenantId) -> Result<TenantOverride, FlagError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .remove(&(flag_id, tenant.clone()))
            .ok_or_else(|| FlagError::not_found(format!("override for tenant '{tenant}'")))
    }

    fn get(&self, flag_id: FlagId, tenant: &TenantId) -> Option<TenantOverride> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&(flag_id, tenant.clone())).cloned()
    }

    fn list_for_flag(&self, flag_id: FlagId) -> Vec<TenantOverride> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<TenantOverride> = entries
            .values()
            .filter(|o| o.flag_id == flag_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        list
    }

    fn remove_all_for_flag(&self, flag_id: FlagId) -> Vec<TenantOverride> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<(FlagId, TenantId)> = entries
            .keys()
            .filter(|(fid, _)| *fid == flag_id)
            .cloned()
            .collect();
        let mut removed: Vec<TenantOverride> = keys
            .into_iter()
            .filter_map(|k| entries.remove(&k))
            .collect();
        removed.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        removed
    }
}

/// In-memory history log with optional append-only JSONL persistence.
///
/// When persistence is enabled, the disk append happens before the in-memory
/// append and a write failure surfaces as `Storage`, so the caller can roll
/// the owning mutation back and the ledger never silently loses an entry.
pub struct MemoryHistoryLog {
    entries: RwLock<HashMap<FlagId, Vec<HistoryEntry>>>,
    persistence_path: Option<PathBuf>,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persistence_path: None,
        }
    }

    /// Enable append-only JSONL persistence at the given path.
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persistence_path = Some(path);
        self
    }

    fn persist(&self, entry: &HistoryEntry) -> Result<(), FlagError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)
            .map_err(|e| FlagError::storage(format!("serialize history entry: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| FlagError::storage(format!("open {}: {e}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| FlagError::storage(format!("append to {}: {e}", path.display())))?;
        Ok(())
    }
}

impl Default for MemoryHistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog for MemoryHistoryLog {
    fn append(&self, entry: HistoryEntry) -> Result<(), FlagError> {
        self.persist(&entry)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(entry.flag_id).or_default().push(entry);
        Ok(())
    }

    fn list_by_flag(&self, flag_id: FlagId) -> Vec<HistoryEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut list = entries.get(&flag_id).cloned().unwrap_or_default();
        list.reverse();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlagBuilder;
    use crate::types::{ChangeType, FlagSnapshot};
    use chrono::Utc;
    use uuid::Uuid;

    fn entry_for(flag: &FeatureFlag, change_type: ChangeType) -> HistoryEntry {
        HistoryEntry {
            id: Uuid::new_v4(),
            flag_id: flag.id,
            change_type,
            tenant_id: None,
            reason: None,
            created_by: "tester".into(),
            created_at: Utc::now(),
            before: None,
            after: Some(FlagSnapshot::of(flag)),
        }
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let store = MemoryFlagStore::new();
        store.insert(FlagBuilder::new("dup_key").build()).unwrap();
        let err = store
            .insert(FlagBuilder::new("dup_key").build())
            .unwrap_err();
        assert!(matches!(err, FlagError::Conflict { .. }));
    }

    #[test]
    fn update_rejects_key_change() {
        let store = MemoryFlagStore::new();
        let flag = FlagBuilder::new("original_key").build();
        let id = flag.id;
        store.insert(flag).unwrap();

        let mut renamed = (*store.get(id).unwrap()).clone();
        renamed.key = FlagKey::parse("renamed_key").unwrap();
        let err = store.update(renamed).unwrap_err();
        assert!(matches!(err, FlagError::ImmutableField { .. }));
    }

    #[test]
    fn update_swaps_whole_record() {
        let store = MemoryFlagStore::new();
        let flag = FlagBuilder::new("swap_probe").percentage(10).build();
        let id = flag.id;
        store.insert(flag).unwrap();

        // Hold the old snapshot; it must be unaffected by the update.
        let old = store.get(id).unwrap();
        let mut updated = (*old).clone();
        updated.rollout_percentage = 50;
        updated.enabled = true;
        store.update(updated).unwrap();

        assert_eq!(old.rollout_percentage, 10);
        let new = store.get(id).unwrap();
        assert_eq!(new.rollout_percentage, 50);
        assert!(new.enabled);
    }

    #[test]
    fn get_by_key_tracks_inserts() {
        let store = MemoryFlagStore::new();
        let flag = FlagBuilder::new("lookup_key").build();
        let id = flag.id;
        store.insert(flag).unwrap();
        let found = store.get_by_key(&FlagKey::parse("lookup_key").unwrap()).unwrap();
        assert_eq!(found.id, id);
        assert!(store.get_by_key(&FlagKey::parse("missing_key").unwrap()).is_none());
    }

    #[test]
    fn override_upsert_replaces() {
        let store = MemoryOverrideStore::new();
        let flag_id = FlagId::new();
        let tenant = TenantId::new("acme");
        let mk = |enabled| TenantOverride {
            flag_id,
            tenant_id: tenant.clone(),
            enabled,
            reason: None,
            created_by: "tester".into(),
            created_at: Utc::now(),
        };
        assert!(store.upsert(mk(true)).unwrap().is_none());
        let previous = store.upsert(mk(false)).unwrap().unwrap();
        assert!(previous.enabled);
        assert!(!store.get(flag_id, &tenant).unwrap().enabled);
    }

    #[test]
    fn override_remove_missing_is_not_found() {
        let store = MemoryOverrideStore::new();
        let err = store
            .remove(FlagId::new(), &TenantId::new("ghost"))
            .unwrap_err();
        assert!(matches!(err, FlagError::NotFound { .. }));
    }

    #[test]
    fn remove_all_for_flag_scopes_to_one_flag() {
        let store = MemoryOverrideStore::new();
        let target = FlagId::new();
        let other = FlagId::new();
        for (fid, tenant) in [(target, "a"), (target, "b"), (other, "c")] {
            store
                .upsert(TenantOverride {
                    flag_id: fid,
                    tenant_id: TenantId::new(tenant),
                    enabled: true,
                    reason: None,
                    created_by: "tester".into(),
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let removed = store.remove_all_for_flag(target);
        assert_eq!(removed.len(), 2);
        assert!(store.list_for_flag(target).is_empty());
        assert_eq!(store.list_for_flag(other).len(), 1);
    }

    #[test]
    fn history_lists_newest_first() {
        let log = MemoryHistoryLog::new();
        let flag = FlagBuilder::new("history_order").build();
        for ct in [ChangeType::Created, ChangeType::Enabled, ChangeType::Disabled] {
            log.append(entry_for(&flag, ct)).unwrap();
        }
        let listed = log.list_by_flag(flag.id);
        let kinds: Vec<ChangeType> = listed.iter().map(|e| e.change_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::Disabled, ChangeType::Enabled, ChangeType::Created]
        );
    }

    #[test]
    fn history_persists_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let log = MemoryHistoryLog::new().with_persistence(path.clone());
        let flag = FlagBuilder::new("persisted_flag").build();
        log.append(entry_for(&flag, ChangeType::Created)).unwrap();
        log.append(entry_for(&flag, ChangeType::Enabled)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: HistoryEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.change_type, ChangeType::Created);
    }

    #[test]
    fn history_persistence_failure_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // A directory is not appendable; the open fails.
        let log = MemoryHistoryLog::new().with_persistence(dir.path().to_path_buf());
        let flag = FlagBuilder::new("broken_disk").build();
        let err = log.append(entry_for(&flag, ChangeType::Created)).unwrap_err();
        assert!(matches!(err, FlagError::Storage { .. }));
        assert!(log.list_by_flag(flag.id).is_empty());
    }
}
