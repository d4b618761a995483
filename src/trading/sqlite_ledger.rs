//! SqliteLedger - SQLite implementation of the trading ledger.
//!
//! Persists every terminal TradeRecord and the kill-switch latch. `run()`
//! consumes the engine event bus so trading never waits on the database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::trading::safety::KillSwitchInfo;
use crate::trading::storage::{persist_trades, LedgerStorage};
use crate::trading::types::{EngineEvent, TradeRecord};

/// Helper type for deserializing trade rows
#[derive(FromRow)]
struct TradeRecordRow {
    id: i64,
    timestamp_ms: i64,
    action: String,
    mint: String,
    symbol: String,
    requested_amount: f64,
    realized_amount: Option<f64>,
    price_impact_pct: Option<f64>,
    slippage_bps: Option<i64>,
    latency_ms: i64,
    retry_count: i64,
    status: String,
    failure: Option<String>,
    error: Option<String>,
    reason: Option<String>,
    signature: Option<String>,
    pnl: Option<f64>,
    pnl_pct: Option<f64>,
}

#[derive(FromRow)]
struct KillSwitchRow {
    reason: String,
    activated_at_ms: i64,
    error_count: i64,
}

pub struct SqliteLedger {
    pool: Pool<Sqlite>,
}

impl SqliteLedger {
    /// Connect to `database_url` and create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to SQLite database {}", database_url))?;

        Self::create_schema(&pool).await?;
        info!("SqliteLedger initialized and connected to {}", database_url);

        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                action TEXT NOT NULL,
                mint TEXT NOT NULL,
                symbol TEXT NOT NULL,
                requested_amount REAL NOT NULL,
                realized_amount REAL,
                price_impact_pct REAL,
                slippage_bps INTEGER,
                latency_ms INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                failure TEXT,
                error TEXT,
                reason TEXT,
                signature TEXT,
                pnl REAL,
                pnl_pct REAL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create trade_records table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_records_ts ON trade_records (timestamp_ms);")
            .execute(pool)
            .await
            .context("Failed to create trade_records index")?;

        // Single-row latch table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kill_switch (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                reason TEXT NOT NULL,
                activated_at_ms INTEGER NOT NULL,
                error_count INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create kill_switch table")?;

        Ok(())
    }

    /// Persist every TradeRecord seen on the event bus until it closes.
    pub async fn run(self: Arc<Self>, events: broadcast::Receiver<EngineEvent>) {
        info!("SqliteLedger is running...");
        persist_trades(self, events).await;
    }

    fn row_to_record(row: TradeRecordRow) -> Result<TradeRecord> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(row.timestamp_ms)
            .with_context(|| format!("Invalid timestamp {} in trade record {}", row.timestamp_ms, row.id))?;

        Ok(TradeRecord {
            id: Some(row.id),
            timestamp,
            action: serde_json::from_str(&row.action)?,
            mint: row.mint,
            symbol: row.symbol,
            requested_amount: row.requested_amount,
            realized_amount: row.realized_amount,
            price_impact_pct: row.price_impact_pct,
            slippage_bps: row.slippage_bps.map(|s| s as u16),
            latency_ms: row.latency_ms as u64,
            retry_count: row.retry_count as u32,
            status: serde_json::from_str(&row.status)?,
            failure: row.failure.as_deref().map(serde_json::from_str).transpose()?,
            error: row.error,
            reason: row.reason,
            signature: row.signature,
            pnl: row.pnl,
            pnl_pct: row.pnl_pct,
        })
    }
}

#[async_trait]
impl LedgerStorage for SqliteLedger {
    async fn insert_trade(&self, record: &TradeRecord) -> Result<i64> {
        debug!("Inserting {} trade record for mint: {}", record.action, record.mint);

        let failure = record.failure.map(|f| serde_json::to_string(&f)).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO trade_records (
                timestamp_ms, action, mint, symbol, requested_amount, realized_amount,
                price_impact_pct, slippage_bps, latency_ms, retry_count, status,
                failure, error, reason, signature, pnl, pnl_pct
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(record.timestamp.timestamp_millis())
        .bind(serde_json::to_string(&record.action)?)
        .bind(&record.mint)
        .bind(&record.symbol)
        .bind(record.requested_amount)
        .bind(record.realized_amount)
        .bind(record.price_impact_pct)
        .bind(record.slippage_bps.map(|s| s as i64))
        .bind(record.latency_ms as i64)
        .bind(record.retry_count as i64)
        .bind(serde_json::to_string(&record.status)?)
        .bind(failure)
        .bind(&record.error)
        .bind(&record.reason)
        .bind(&record.signature)
        .bind(record.pnl)
        .bind(record.pnl_pct)
        .execute(&self.pool)
        .await
        .context("Failed to insert trade record into DB")?;

        Ok(result.last_insert_rowid())
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows: Vec<TradeRecordRow> = sqlx::query_as(
            r#"
            SELECT * FROM trade_records
            WHERE timestamp_ms >= ?
            ORDER BY timestamp_ms ASC, id ASC;
            "#,
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trade records")?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn trade_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_records")
            .fetch_one(&self.pool)
            .await
            .context("Failed to get trade record count")?;

        Ok(count.0)
    }

    async fn save_kill_switch(&self, info: &KillSwitchInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kill_switch (id, reason, activated_at_ms, error_count)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                reason = excluded.reason,
                activated_at_ms = excluded.activated_at_ms,
                error_count = excluded.error_count;
            "#,
        )
        .bind(&info.reason)
        .bind(info.activated_at.timestamp_millis())
        .bind(info.error_count as i64)
        .execute(&self.pool)
        .await
        .context("Failed to persist kill-switch")?;

        Ok(())
    }

    async fn load_kill_switch(&self) -> Result<Option<KillSwitchInfo>> {
        let row: Option<KillSwitchRow> = sqlx::query_as(
            "SELECT reason, activated_at_ms, error_count FROM kill_switch WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load kill-switch")?;

        match row {
            Some(row) => {
                let activated_at = DateTime::<Utc>::from_timestamp_millis(row.activated_at_ms)
                    .context("Invalid kill-switch timestamp")?;
                Ok(Some(KillSwitchInfo {
                    reason: row.reason,
                    activated_at,
                    error_count: row.error_count as usize,
                }))
            }
            None => Ok(None),
        }
    }

    async fn clear_kill_switch(&self) -> Result<()> {
        sqlx::query("DELETE FROM kill_switch")
            .execute(&self.pool)
            .await
            .context("Failed to clear kill-switch")?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
