//! Session persistence seam.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use tc_types::session::SessionRecord;

/// Where session records live. Implementations must be safe to share
/// between the coordinator's per-session tasks.
pub trait SessionStore: Send + Sync {
    /// Insert or replace a record by id.
    fn save(&self, record: &SessionRecord) -> Result<()>;
    fn load(&self, id: &str) -> Result<Option<SessionRecord>>;
    /// All records owned by `owner`, most recently active first.
    fn list_by_owner(&self, owner: i64) -> Result<Vec<SessionRecord>>;
    fn list_all(&self) -> Result<Vec<SessionRecord>>;
    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Sum of recorded spend across every session of `owner`.
    fn total_cost_for_owner(&self, owner: i64) -> Result<f64> {
        Ok(self
            .list_by_owner(owner)?
            .iter()
            .map(|r| r.total_cost_usd)
            .sum())
    }
}

/// In-process store for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, record: &SessionRecord) -> Result<()> {
        self.records().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records().get(id).cloned())
    }

    fn list_by_owner(&self, owner: i64) -> Result<Vec<SessionRecord>> {
        let mut list: Vec<_> = self
            .records()
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(list)
    }

    fn list_all(&self) -> Result<Vec<SessionRecord>> {
        let mut list: Vec<_> = self.records().values().cloned().collect();
        list.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(list)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_delete() {
        let store = MemoryStore::new();
        let rec = SessionRecord::new(7, "/tmp/p", "p");
        store.save(&rec).unwrap();
        assert_eq!(store.load(&rec.id).unwrap(), Some(rec.clone()));
        assert!(store.delete(&rec.id).unwrap());
        assert!(!store.delete(&rec.id).unwrap());
        assert!(store.load(&rec.id).unwrap().is_none());
    }

    #[test]
    fn list_by_owner_filters_and_orders() {
        let store = MemoryStore::new();
        let mut older = SessionRecord::new(1, "/a", "a");
        older.last_active -= chrono::Duration::minutes(5);
        let newer = SessionRecord::new(1, "/b", "b");
        let other = SessionRecord::new(2, "/c", "c");
        for r in [&older, &newer, &other] {
            store.save(r).unwrap();
        }

        let mine = store.list_by_owner(1).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, newer.id);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }
}
