use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tc_types::session::{SessionRecord, SessionStatus};

use crate::store::SessionStore;

/// Session bookkeeping on top of a [`SessionStore`]: which session each chat
/// user is currently talking to, plus the record updates a run produces.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    /// Owner → id of their active session.
    active: Mutex<HashMap<i64, String>>,
    /// Held across every load-modify-save so concurrent updates to one
    /// record cannot overwrite each other.
    writes: Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            active: Mutex::new(HashMap::new()),
            writes: Mutex::new(()),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<i64, String>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create a session for `owner` and make it their active one.
    pub fn create_session(
        &self,
        owner: i64,
        project_path: &str,
        project_name: &str,
    ) -> Result<SessionRecord> {
        let record = SessionRecord::new(owner, project_path, project_name);
        let _guard = self.write_lock();
        self.store.save(&record)?;
        self.set_active(owner, record)
    }

    /// The owner's active session. After a restart this falls back to their
    /// most recently used session still marked active.
    pub fn active_session(&self, owner: i64) -> Result<Option<SessionRecord>> {
        let id = self.active().get(&owner).cloned();
        if let Some(id) = id {
            return self.store.load(&id);
        }
        let restored = self
            .store
            .list_by_owner(owner)?
            .into_iter()
            .find(SessionRecord::is_active);
        if let Some(rec) = &restored {
            self.active().insert(owner, rec.id.clone());
        }
        Ok(restored)
    }

    /// Make `id` the owner's active session. Sessions of other owners are
    /// reported as missing.
    pub fn switch_session(&self, owner: i64, id: &str) -> Result<SessionRecord> {
        let _guard = self.write_lock();
        let record = self
            .store
            .load(id)?
            .filter(|r| r.owner == owner)
            .ok_or_else(|| anyhow!("session not found: {id}"))?;
        self.set_active(owner, record)
    }

    /// Caller holds the write lock.
    fn set_active(&self, owner: i64, mut record: SessionRecord) -> Result<SessionRecord> {
        let previous = self.active().insert(owner, record.id.clone());
        if let Some(prev_id) = previous.filter(|p| *p != record.id) {
            if let Some(mut prev) = self.store.load(&prev_id)? {
                if prev.is_active() {
                    prev.mark_idle();
                    self.store.save(&prev)?;
                }
            }
        }
        record.mark_active();
        self.store.save(&record)?;
        Ok(record)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.store.load(id)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut SessionRecord)) -> Result<SessionRecord> {
        let _guard = self.write_lock();
        let mut record = self
            .store
            .load(id)?
            .ok_or_else(|| anyhow!("session not found: {id}"))?;
        f(&mut record);
        self.store.save(&record)?;
        Ok(record)
    }

    pub fn update_correlation_id(&self, id: &str, correlation_id: &str) -> Result<()> {
        self.update(id, |r| r.correlation_id = Some(correlation_id.to_string()))?;
        Ok(())
    }

    pub fn add_cost(&self, id: &str, cost_usd: f64) -> Result<()> {
        self.update(id, |r| r.add_cost(cost_usd))?;
        Ok(())
    }

    pub fn set_status(&self, id: &str, status: SessionStatus) -> Result<SessionRecord> {
        self.update(id, |r| {
            r.status = status;
            r.last_active = chrono::Utc::now();
        })
    }

    pub fn list_for_owner(&self, owner: i64) -> Result<Vec<SessionRecord>> {
        self.store.list_by_owner(owner)
    }

    pub fn list_all(&self) -> Result<Vec<SessionRecord>> {
        self.store.list_all()
    }

    pub fn total_cost_for_owner(&self, owner: i64) -> Result<f64> {
        self.store.total_cost_for_owner(owner)
    }

    /// Mark every tracked active session idle and forget them. Used on shutdown.
    pub fn mark_all_idle(&self) -> Result<usize> {
        let _guard = self.write_lock();
        let ids: Vec<String> = self.active().drain().map(|(_, id)| id).collect();
        let mut count = 0;
        for id in ids {
            if let Some(mut rec) = self.store.load(&id)? {
                if rec.is_active() {
                    rec.mark_idle();
                    self.store.save(&rec)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
