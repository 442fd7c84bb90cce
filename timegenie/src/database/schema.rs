//! Database schema and migrations
//!
//! This module handles database initialization and schema migrations.
//! Uses SQLite with WAL mode so a committed insert survives a crash.

use crate::error::Result;
use sqlx::{sqlite::SqlitePool, Row};

/// Initialize database with schema
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Initializing database schema");

    // WAL is persistent in the file; set it on the first connection that
    // opens the database so later pools inherit it
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Bookkeeping table: one row per applied migration
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fresh databases report version 0
    let current_version: i32 = sqlx::query("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(pool)
        .await?
        .get(0);

    tracing::info!("Current database version: {}", current_version);

    let latest = latest_version();
    if current_version > latest {
        // Written by a newer build; nothing here to apply
        tracing::warn!(
            "Database version {} is newer than this build supports ({})",
            current_version,
            latest
        );
    }

    apply_migrations(pool, current_version).await?;

    tracing::info!("Database initialization complete");
    Ok(())
}

async fn apply_migrations(pool: &SqlitePool, current_version: i32) -> Result<()> {
    for (version, sql) in get_migrations() {
        if version > current_version {
            tracing::info!("Applying migration version {}", version);

            // A failed statement rolls the whole version back when `tx` drops
            let mut tx = pool.begin().await?;

            // The runner splits on ';', so migration files must not use
            // semicolons inside string literals or triggers
            for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            // Recorded in the same transaction as the schema change
            sqlx::query("INSERT INTO migrations (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!("Migration version {} applied successfully", version);
        }
    }

    Ok(())
}

/// Ordered (version, sql) pairs; versions must be strictly increasing
fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(1, include_str!("migrations/001_initial_schema.sql"))]
}

fn latest_version() -> i32 {
    get_migrations()
        .last()
        .map(|(version, _)| *version)
        .unwrap_or(0)
}
