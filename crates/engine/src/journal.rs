use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use common::{Resolution, Result, Signal, SignalId};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Durable record of every signal the watchlist opens, resolves or discards.
///
/// The watchlist itself stays in memory; the journal is write-behind and its
/// failures are logged by callers, never propagated into the lifecycle.
#[derive(Clone)]
pub struct SignalJournal {
    db: SqlitePool,
}

/// One row of the `signals` table.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct JournalEntry {
    pub id: i64,
    pub symbol: String,
    pub direction: String,
    pub entry: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub tp4: f64,
    pub sequence_today: i64,
    pub status: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
    pub exit_price: Option<f64>,
    pub profit_percent: Option<f64>,
    pub targets_reached: Option<i64>,
}

impl SignalJournal {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (creating the file if needed) and migrate the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new().connect_with(options).await?;
        MIGRATOR.run(&db).await.map_err(sqlx::Error::from)?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn record_opened(&self, signal: &Signal) -> Result<()> {
        let direction = signal.direction.to_string();
        let opened_at = signal.opened_at.to_rfc3339();
        let [tp1, tp2, tp3, tp4] = signal.targets;

        sqlx::query(
            r#"
            INSERT INTO signals
                (id, symbol, direction, entry, stop_loss, tp1, tp2, tp3, tp4,
                 sequence_today, status, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'open', ?11)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(signal.id as i64)
        .bind(&signal.symbol)
        .bind(direction)
        .bind(signal.entry)
        .bind(signal.stop_loss)
        .bind(tp1)
        .bind(tp2)
        .bind(tp3)
        .bind(tp4)
        .bind(signal.sequence_today as i64)
        .bind(opened_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn record_resolved(&self, resolution: &Resolution) -> Result<()> {
        let status = resolution.outcome.to_string().to_lowercase();
        let closed_at = resolution.resolved_at.to_rfc3339();

        sqlx::query(
            r#"
            UPDATE signals
            SET status = ?2, closed_at = ?3, exit_price = ?4,
                profit_percent = ?5, targets_reached = ?6
            WHERE id = ?1 AND status = 'open'
            "#,
        )
        .bind(resolution.signal.id as i64)
        .bind(status)
        .bind(closed_at)
        .bind(resolution.exit_price)
        .bind(resolution.profit_percent)
        .bind(resolution.targets_reached as i64)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Mark signals discarded at rollover. They carry no outcome.
    pub async fn record_expired(&self, signals: &[Signal], at: DateTime<Utc>) -> Result<()> {
        if signals.is_empty() {
            return Ok(());
        }
        let closed_at = at.to_rfc3339();
        let mut tx = self.db.begin().await?;
        for signal in signals {
            sqlx::query(
                "UPDATE signals SET status = 'expired', closed_at = ?2 WHERE id = ?1 AND status = 'open'",
            )
            .bind(signal.id as i64)
            .bind(&closed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Most recent signals first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT id, symbol, direction, entry, stop_loss, tp1, tp2, tp3, tp4,
                   sequence_today, status, opened_at, closed_at, exit_price,
                   profit_percent, targets_reached
            FROM signals
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Highest id ever journaled, 0 for an empty table.
    pub async fn last_id(&self) -> Result<SignalId> {
        let id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM signals")
            .fetch_one(&self.db)
            .await?;
        Ok(id.max(0) as SignalId)
    }
}

#[cfg(test)]
pub(crate) async fn in_memory() -> SignalJournal {
    // A single connection keeps every query on the same in-memory database.
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    MIGRATOR.run(&db).await.unwrap();
    SignalJournal::new(db)
}
