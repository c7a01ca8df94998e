//! SQLite-backed [`Store`] implementation.
//!
//! `apply` runs every write of a plan inside one transaction. Parent keys
//! are resolved to row ids inside the same transaction, so Units and
//! SubUnits created earlier in the plan are visible to the Items that
//! follow. Any failure rolls the transaction back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::models::{ItemRow, SubUnitRow, UnitRow};

use super::{
    AppliedCounts, ApplyError, ApplyPlan, HistoryEntry, Store, HISTORY_AGENT, LAST_SYNC_KEY,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

async fn unit_id(tx: &mut Transaction<'_, Sqlite>, unit_key: &str) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM units WHERE unit_key = ?")
        .bind(unit_key)
        .fetch_optional(&mut **tx)
        .await
}

async fn sub_unit_id(
    tx: &mut Transaction<'_, Sqlite>,
    sub_unit_key: &str,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM sub_units WHERE sub_unit_key = ?")
        .bind(sub_unit_key)
        .fetch_optional(&mut **tx)
        .await
}

async fn require_sub_unit(
    tx: &mut Transaction<'_, Sqlite>,
    item_key: &str,
    sub_unit_key: &str,
) -> std::result::Result<i64, ApplyError> {
    sub_unit_id(tx, sub_unit_key)
        .await
        .map_err(|e| ApplyError::new(item_key, e))?
        .ok_or_else(|| {
            ApplyError::new(
                item_key,
                format!("parent sub-unit '{}' does not exist", sub_unit_key),
            )
        })
}

async fn record_history(
    tx: &mut Transaction<'_, Sqlite>,
    item_key: &str,
    notes: &str,
) -> std::result::Result<(), ApplyError> {
    sqlx::query(
        r#"
        INSERT INTO item_history (item_id, agent, notes)
        SELECT id, ?, ? FROM items WHERE item_key = ?
        "#,
    )
    .bind(HISTORY_AGENT)
    .bind(notes)
    .bind(item_key)
    .execute(&mut **tx)
    .await
    .map_err(|e| ApplyError::new(item_key, e))?;
    Ok(())
}

async fn apply_in(
    tx: &mut Transaction<'_, Sqlite>,
    plan: &ApplyPlan,
) -> std::result::Result<AppliedCounts, ApplyError> {
    let mut counts = AppliedCounts::default();

    for u in &plan.units {
        let fail = |e: sqlx::Error| ApplyError::new(&u.unit_key, e);
        let result = sqlx::query(
            r#"
            INSERT INTO units (unit_key, title) VALUES (?, ?)
            ON CONFLICT(unit_key) DO NOTHING
            "#,
        )
        .bind(&u.unit_key)
        .bind(&u.title)
        .execute(&mut **tx)
        .await
        .map_err(fail)?;

        if result.rows_affected() == 1 {
            counts.units_created += 1;
        } else {
            sqlx::query("UPDATE units SET title = ? WHERE unit_key = ? AND title <> ?")
                .bind(&u.title)
                .bind(&u.unit_key)
                .bind(&u.title)
                .execute(&mut **tx)
                .await
                .map_err(fail)?;
        }
    }

    for s in &plan.sub_units {
        let fail = |e: sqlx::Error| ApplyError::new(&s.sub_unit_key, e);
        let parent = unit_id(tx, &s.unit_key).await.map_err(fail)?.ok_or_else(|| {
            ApplyError::new(
                &s.sub_unit_key,
                format!("parent unit '{}' does not exist", s.unit_key),
            )
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO sub_units (sub_unit_key, unit_id, title) VALUES (?, ?, ?)
            ON CONFLICT(sub_unit_key) DO NOTHING
            "#,
        )
        .bind(&s.sub_unit_key)
        .bind(parent)
        .bind(&s.title)
        .execute(&mut **tx)
        .await
        .map_err(fail)?;

        if result.rows_affected() == 1 {
            counts.sub_units_created += 1;
        } else {
            sqlx::query(
                r#"
                UPDATE sub_units SET title = ?, unit_id = ?
                WHERE sub_unit_key = ? AND (title <> ? OR unit_id <> ?)
                "#,
            )
            .bind(&s.title)
            .bind(parent)
            .bind(&s.sub_unit_key)
            .bind(&s.title)
            .bind(parent)
            .execute(&mut **tx)
            .await
            .map_err(fail)?;
        }
    }

    for c in &plan.creates {
        let parent = require_sub_unit(tx, &c.item_key, &c.sub_unit_key).await?;
        sqlx::query(
            r#"
            INSERT INTO items (item_key, title, description, sub_unit_id, file_path)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&c.item_key)
        .bind(&c.title)
        .bind(&c.description)
        .bind(parent)
        .bind(&c.file_path)
        .execute(&mut **tx)
        .await
        .map_err(|e| ApplyError::new(&c.item_key, e))?;
        record_history(tx, &c.item_key, &c.history_note()).await?;
        counts.created += 1;
    }

    for u in &plan.updates {
        let parent = require_sub_unit(tx, &u.item_key, &u.sub_unit_key).await?;
        // status, item_key and the timestamps are never written here
        let result = sqlx::query(
            r#"
            UPDATE items
            SET title = ?, description = ?, sub_unit_id = ?, file_path = ?
            WHERE item_key = ?
            "#,
        )
        .bind(&u.title)
        .bind(&u.description)
        .bind(parent)
        .bind(&u.file_path)
        .bind(&u.item_key)
        .execute(&mut **tx)
        .await
        .map_err(|e| ApplyError::new(&u.item_key, e))?;
        if result.rows_affected() == 0 {
            return Err(ApplyError::new(&u.item_key, "item no longer exists"));
        }
        record_history(tx, &u.item_key, &u.history_note()).await?;
        counts.updated += 1;
    }

    for key in &plan.deletes {
        let result = sqlx::query("DELETE FROM items WHERE item_key = ?")
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(|e| ApplyError::new(key, e))?;
        counts.deleted += result.rows_affected() as usize;
    }

    Ok(counts)
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_units(&self) -> Result<Vec<UnitRow>> {
        let rows = sqlx::query("SELECT id, unit_key, title FROM units ORDER BY unit_key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| UnitRow {
                id: row.get("id"),
                unit_key: row.get("unit_key"),
                title: row.get("title"),
            })
            .collect())
    }

    async fn list_sub_units(&self) -> Result<Vec<SubUnitRow>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.sub_unit_key, u.unit_key, s.title
            FROM sub_units s
            JOIN units u ON u.id = s.unit_id
            ORDER BY s.sub_unit_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| SubUnitRow {
                id: row.get("id"),
                sub_unit_key: row.get("sub_unit_key"),
                unit_key: row.get("unit_key"),
                title: row.get("title"),
            })
            .collect())
    }

    async fn list_items(&self) -> Result<Vec<ItemRow>> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.item_key, i.title, i.description, i.sub_unit_id,
                   s.sub_unit_key, i.file_path, i.status, i.created_at, i.updated_at
            FROM items i
            JOIN sub_units s ON s.id = i.sub_unit_id
            ORDER BY i.item_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ItemRow {
                id: row.get("id"),
                item_key: row.get("item_key"),
                title: row.get("title"),
                description: row.get("description"),
                sub_unit_id: row.get("sub_unit_id"),
                sub_unit_key: row.get("sub_unit_key"),
                file_path: row.get("file_path"),
                status: row.get("status"),
                created_at: from_ts(row.get("created_at")),
                updated_at: from_ts(row.get("updated_at")),
            })
            .collect())
    }

    async fn apply(&self, plan: &ApplyPlan) -> std::result::Result<AppliedCounts, ApplyError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ApplyError::new("<transaction>", e))?;

        match apply_in(&mut tx, plan).await {
            Ok(counts) => {
                tx.commit()
                    .await
                    .map_err(|e| ApplyError::new("<commit>", e))?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!("rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_state WHERE name = ?")
            .bind(LAST_SYNC_KEY)
            .fetch_optional(&self.pool)
            .await?;
        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|dt| dt.with_timezone(&Utc))
                    .with_context(|| format!("invalid last_sync value '{}'", v))
            })
            .transpose()
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (name, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(LAST_SYNC_KEY)
        .bind(at.to_rfc3339())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_history(&self, item_key: &str) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT i.item_key, h.agent, h.notes, h.created_at
            FROM item_history h
            JOIN items i ON i.id = h.item_id
            WHERE i.item_key = ?
            ORDER BY h.id
            "#,
        )
        .bind(item_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| HistoryEntry {
                item_key: row.get("item_key"),
                agent: row.get("agent"),
                notes: row.get("notes"),
                created_at: from_ts(row.get("created_at")),
            })
            .collect())
    }
}
