//! In-memory [`Store`] implementation for tests and dry experiments.
//!
//! State lives behind a `std::sync::RwLock`. `apply` works on a cloned
//! snapshot and swaps it in only when every step succeeded, which gives the
//! same all-or-nothing behavior as the SQLite transaction.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ItemRow, SubUnitRow, UnitRow};

use super::{AppliedCounts, ApplyError, ApplyPlan, HistoryEntry, Store, HISTORY_AGENT};

#[derive(Debug, Clone, Default)]
struct State {
    units: BTreeMap<String, UnitRow>,
    sub_units: BTreeMap<String, SubUnitRow>,
    items: BTreeMap<String, ItemRow>,
    history: Vec<HistoryEntry>,
    next_id: i64,
    last_sync: Option<DateTime<Utc>>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record_history(&mut self, item_key: &str, notes: String, now: DateTime<Utc>) {
        self.history.push(HistoryEntry {
            item_key: item_key.to_string(),
            agent: HISTORY_AGENT.to_string(),
            notes,
            created_at: now,
        });
    }

    fn apply(&mut self, plan: &ApplyPlan, now: DateTime<Utc>) -> Result<AppliedCounts, ApplyError> {
        let mut counts = AppliedCounts::default();

        for u in &plan.units {
            match self.units.get_mut(&u.unit_key) {
                Some(row) => row.title = u.title.clone(),
                None => {
                    let id = self.next_id();
                    self.units.insert(
                        u.unit_key.clone(),
                        UnitRow {
                            id,
                            unit_key: u.unit_key.clone(),
                            title: u.title.clone(),
                        },
                    );
                    counts.units_created += 1;
                }
            }
        }

        for s in &plan.sub_units {
            if !self.units.contains_key(&s.unit_key) {
                return Err(ApplyError::new(
                    &s.sub_unit_key,
                    format!("parent unit '{}' does not exist", s.unit_key),
                ));
            }
            match self.sub_units.get_mut(&s.sub_unit_key) {
                Some(row) => {
                    row.title = s.title.clone();
                    row.unit_key = s.unit_key.clone();
                }
                None => {
                    let id = self.next_id();
                    self.sub_units.insert(
                        s.sub_unit_key.clone(),
                        SubUnitRow {
                            id,
                            sub_unit_key: s.sub_unit_key.clone(),
                            unit_key: s.unit_key.clone(),
                            title: s.title.clone(),
                        },
                    );
                    counts.sub_units_created += 1;
                }
            }
        }

        for c in &plan.creates {
            let sub_unit_id = self.sub_unit_id(&c.item_key, &c.sub_unit_key)?;
            if self.items.contains_key(&c.item_key) {
                return Err(ApplyError::new(&c.item_key, "item key already exists"));
            }
            let id = self.next_id();
            self.items.insert(
                c.item_key.clone(),
                ItemRow {
                    id,
                    item_key: c.item_key.clone(),
                    title: c.title.clone(),
                    description: c.description.clone(),
                    sub_unit_id,
                    sub_unit_key: c.sub_unit_key.clone(),
                    file_path: Some(c.file_path.clone()),
                    status: "todo".to_string(),
                    created_at: now,
                    updated_at: now,
                },
            );
            self.record_history(&c.item_key, c.history_note(), now);
            counts.created += 1;
        }

        for u in &plan.updates {
            let sub_unit_id = self.sub_unit_id(&u.item_key, &u.sub_unit_key)?;
            let row = self
                .items
                .get_mut(&u.item_key)
                .ok_or_else(|| ApplyError::new(&u.item_key, "item no longer exists"))?;
            row.title = u.title.clone();
            row.description = u.description.clone();
            row.sub_unit_id = sub_unit_id;
            row.sub_unit_key = u.sub_unit_key.clone();
            row.file_path = u.file_path.clone();
            row.updated_at = now;
            self.record_history(&u.item_key, u.history_note(), now);
            counts.updated += 1;
        }

        for key in &plan.deletes {
            if self.items.remove(key).is_some() {
                self.history.retain(|h| h.item_key != *key);
                counts.deleted += 1;
            }
        }

        Ok(counts)
    }

    fn sub_unit_id(&self, item_key: &str, sub_unit_key: &str) -> Result<i64, ApplyError> {
        self.sub_units
            .get(sub_unit_key)
            .map(|s| s.id)
            .ok_or_else(|| {
                ApplyError::new(
                    item_key,
                    format!("parent sub-unit '{}' does not exist", sub_unit_key),
                )
            })
    }
}

/// In-memory store.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Overwrite an item's status, as the workflow layer would.
    pub fn set_status(&self, item_key: &str, status: &str) -> Result<()> {
        self.with_item(item_key, |row| row.status = status.to_string())
    }

    /// Backdate or postdate an item's `updated_at`.
    pub fn set_updated_at(&self, item_key: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_item(item_key, |row| row.updated_at = at)
    }

    fn with_item(&self, item_key: &str, f: impl FnOnce(&mut ItemRow)) -> Result<()> {
        let mut state = self.write()?;
        let row = state
            .items
            .get_mut(item_key)
            .ok_or_else(|| anyhow!("no item '{}'", item_key))?;
        f(row);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_units(&self) -> Result<Vec<UnitRow>> {
        Ok(self.read()?.units.values().cloned().collect())
    }

    async fn list_sub_units(&self) -> Result<Vec<SubUnitRow>> {
        Ok(self.read()?.sub_units.values().cloned().collect())
    }

    async fn list_items(&self) -> Result<Vec<ItemRow>> {
        Ok(self.read()?.items.values().cloned().collect())
    }

    async fn apply(&self, plan: &ApplyPlan) -> std::result::Result<AppliedCounts, ApplyError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| ApplyError::new("<store>", "memory store lock poisoned"))?;
        let mut snapshot = guard.clone();
        let counts = snapshot.apply(plan, Utc::now())?;
        *guard = snapshot;
        Ok(counts)
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.last_sync)
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.write()?.last_sync = Some(at);
        Ok(())
    }

    async fn list_history(&self, item_key: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .read()?
            .history
            .iter()
            .filter(|h| h.item_key == item_key)
            .cloned()
            .collect())
    }
}
