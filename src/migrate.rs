use anyhow::Result;

use crate::config::Config;
use crate::db;

const NOW: &str = "CAST(strftime('%s', 'now') AS INTEGER)";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create units table
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT ({now}),
            updated_at INTEGER NOT NULL DEFAULT ({now})
        )
        "#,
        now = NOW
    ))
    .execute(&pool)
    .await?;

    // Create sub_units table
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS sub_units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sub_unit_key TEXT NOT NULL UNIQUE,
            unit_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT ({now}),
            updated_at INTEGER NOT NULL DEFAULT ({now}),
            FOREIGN KEY (unit_id) REFERENCES units(id)
        )
        "#,
        now = NOW
    ))
    .execute(&pool)
    .await?;

    // Create items table; status belongs to the workflow layer
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            sub_unit_id INTEGER NOT NULL,
            file_path TEXT,
            status TEXT NOT NULL DEFAULT 'todo',
            created_at INTEGER NOT NULL DEFAULT ({now}),
            updated_at INTEGER NOT NULL DEFAULT ({now}),
            FOREIGN KEY (sub_unit_id) REFERENCES sub_units(id)
        )
        "#,
        now = NOW
    ))
    .execute(&pool)
    .await?;

    // Create item_history table (audit trail, dropped with its item)
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS item_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER NOT NULL,
            agent TEXT NOT NULL,
            notes TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT ({now}),
            FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
        )
        "#,
        now = NOW
    ))
    .execute(&pool)
    .await?;

    // Create sync_state table (last-sync checkpoint)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // updated_at is maintained by the store, not by callers
    for (table, columns) in [
        ("units", "title"),
        ("sub_units", "title, unit_id"),
        ("items", "title, description, sub_unit_id, file_path"),
    ] {
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER IF NOT EXISTS {table}_touch_updated_at
            AFTER UPDATE OF {columns} ON {table}
            FOR EACH ROW
            BEGIN
                UPDATE {table} SET updated_at = {now} WHERE id = NEW.id;
            END
            "#,
            table = table,
            columns = columns,
            now = NOW
        ))
        .execute(&pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS items_key_immutable
        BEFORE UPDATE OF item_key ON items
        FOR EACH ROW
        WHEN NEW.item_key <> OLD.item_key
        BEGIN
            SELECT RAISE(ABORT, 'item_key is immutable');
        END
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_sub_unit_id ON items(sub_unit_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_file_path ON items(file_path)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sub_units_unit_id ON sub_units(unit_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_item_history_item_id ON item_history(item_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
