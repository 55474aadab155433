use sqlx::{Executor, Sqlite};

use crate::database::models::BlockRow;

pub struct Queries;

impl Queries {
    /// Highest-index block, if any
    pub async fn fetch_tip<'e, E>(executor: E) -> Result<Option<BlockRow>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BlockRow>(
            "SELECT idx, prev_hash, data, timestamp, hash FROM audit_blocks ORDER BY idx DESC LIMIT 1",
        )
        .fetch_optional(executor)
        .await
    }

    pub async fn fetch_block<'e, E>(executor: E, idx: i64) -> Result<Option<BlockRow>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BlockRow>(
            "SELECT idx, prev_hash, data, timestamp, hash FROM audit_blocks WHERE idx = ?1",
        )
        .bind(idx)
        .fetch_optional(executor)
        .await
    }

    /// Ascending page of blocks with `from <= idx <= to`
    pub async fn fetch_range<'e, E>(
        executor: E,
        from: i64,
        to: i64,
        limit: i64,
    ) -> Result<Vec<BlockRow>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BlockRow>(
            "SELECT idx, prev_hash, data, timestamp, hash FROM audit_blocks WHERE idx >= ?1 AND idx <= ?2 ORDER BY idx ASC LIMIT ?3",
        )
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Most recent blocks, highest index first
    pub async fn fetch_recent<'e, E>(executor: E, limit: i64) -> Result<Vec<BlockRow>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BlockRow>(
            "SELECT idx, prev_hash, data, timestamp, hash FROM audit_blocks ORDER BY idx DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn count_blocks<'e, E>(executor: E) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_blocks")
            .fetch_one(executor)
            .await
    }

    /// Plain INSERT: a taken `idx` fails with a unique violation rather
    /// than replacing the existing row.
    pub async fn insert_block<'e, E>(executor: E, row: &BlockRow) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO audit_blocks (idx, prev_hash, data, timestamp, hash)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(row.idx)
        .bind(&row.prev_hash)
        .bind(&row.data)
        .bind(&row.timestamp)
        .bind(&row.hash)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// True when `err` is the store rejecting an already-claimed index
pub fn is_index_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// True when SQLite refused the write because another connection holds
/// the write lock or committed ahead of this transaction's snapshot
pub fn is_write_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("6") | Some("517"))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}
