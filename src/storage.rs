//! SQLite storage layer for FiberWatch.
//!
//! Three tables back the workflow state:
//!
//! - `decisions`: terminal operator decision per incident id
//! - `cooldowns`: last dispatch time per fault signature
//! - `audit_log`: append-only record of every decision with its snapshot
//!
//! A decision and its audit entry are written in one transaction, so
//! concurrent actions never interleave partial state. `decisions.incident_id`
//! is the primary key: a second decision for the same incident fails instead
//! of overwriting the first.
//!
//! Cooldowns are claimed on their own, before any message goes out, with a
//! conditional upsert that only one caller per window can win.

use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::RecordError;
use crate::model::{
    AuditEntry, CooldownEntry, Decision, DispatchOutcome, IncidentId, IncidentSignature,
    COOLDOWN_HOURS,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:fiberwatch.db?mode=rwc" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database sees its own empty
        // database, so those get exactly one long-lived connection.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("opening database {database_url}"))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                incident_id TEXT PRIMARY KEY,
                decision TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cooldowns (
                signature TEXT PRIMARY KEY,
                last_dispatch INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                acted_at INTEGER NOT NULL,
                action TEXT NOT NULL,
                outcome TEXT NOT NULL,
                snapshot TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a decision with its audit entry, atomically.
    ///
    /// Fails with [`RecordError::AlreadyDecided`] if the incident already has
    /// a decision; nothing is written in that case.
    pub async fn record_decision(&self, entry: &AuditEntry) -> Result<(), RecordError> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO decisions (incident_id, decision)
            VALUES (?, ?)
            "#,
        )
        .bind(entry.incident_id.as_str())
        .bind(entry.action.as_str())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(RecordError::AlreadyDecided(entry.incident_id.clone()));
            }
            Err(e) => return Err(anyhow::Error::from(e).context("inserting decision").into()),
        }

        let snapshot = serde_json::to_string(&entry.snapshot).context("encoding snapshot")?;
        sqlx::query(
            r#"
            INSERT INTO audit_log (incident_id, acted_at, action, outcome, snapshot)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.incident_id.as_str())
        .bind(entry.acted_at.timestamp())
        .bind(entry.action.as_str())
        .bind(entry.outcome.as_str())
        .bind(snapshot)
        .execute(&mut *tx)
        .await
        .context("inserting audit entry")?;

        tx.commit().await.context("committing decision")?;
        Ok(())
    }

    /// Get the decision recorded for an incident, if any.
    pub async fn decision_for(&self, id: &IncidentId) -> anyhow::Result<Option<Decision>> {
        let row = sqlx::query(
            r#"
            SELECT decision FROM decisions WHERE incident_id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let raw: String = r.get("decision");
            Decision::parse(&raw).with_context(|| format!("unknown decision {raw:?}"))
        })
        .transpose()
    }

    /// Get all incident ids that have a decision.
    pub async fn decided_ids(&self) -> anyhow::Result<HashSet<IncidentId>> {
        let rows = sqlx::query(
            r#"
            SELECT incident_id FROM decisions
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| IncidentId::new(r.get::<String, _>("incident_id")))
            .collect())
    }

    /// Start a cooldown for `signature` at `now`, unless one is still running.
    ///
    /// Returns `false` without touching the stored entry if the signature is
    /// cooling at `now`. The check and the write are one statement, so of two
    /// concurrent claims on the same signature at most one succeeds.
    pub async fn claim_cooldown(
        &self,
        signature: &IncidentSignature,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO cooldowns (signature, last_dispatch)
            VALUES (?, ?)
            ON CONFLICT(signature) DO UPDATE SET last_dispatch = excluded.last_dispatch
            WHERE cooldowns.last_dispatch <= ?
            "#,
        )
        .bind(signature.as_str())
        .bind(now.timestamp())
        .bind(cooldown_threshold(now))
        .execute(&self.pool)
        .await
        .context("claiming cooldown")?;

        Ok(result.rows_affected() == 1)
    }

    /// Get the cooldown entry for a signature, if one was ever recorded.
    pub async fn cooldown_for(
        &self,
        signature: &IncidentSignature,
    ) -> anyhow::Result<Option<CooldownEntry>> {
        let row = sqlx::query(
            r#"
            SELECT last_dispatch FROM cooldowns WHERE signature = ?
            "#,
        )
        .bind(signature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> anyhow::Result<CooldownEntry> {
            Ok(CooldownEntry {
                signature: signature.clone(),
                last_dispatch: from_timestamp(r.get("last_dispatch"))?,
            })
        })
        .transpose()
    }

    /// Get the signatures still cooling at `now`.
    pub async fn active_cooldowns(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<HashSet<IncidentSignature>> {
        let rows = sqlx::query(
            r#"
            SELECT signature FROM cooldowns WHERE last_dispatch > ?
            "#,
        )
        .bind(cooldown_threshold(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| IncidentSignature::from_stored(r.get("signature")))
            .collect())
    }

    /// Get the full audit log, newest first.
    pub async fn audit_log(&self) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT incident_id, acted_at, action, outcome, snapshot
            FROM audit_log
            ORDER BY seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> anyhow::Result<AuditEntry> {
                let action: String = r.get("action");
                let outcome: String = r.get("outcome");
                let snapshot: String = r.get("snapshot");

                Ok(AuditEntry {
                    incident_id: IncidentId::new(r.get::<String, _>("incident_id")),
                    acted_at: from_timestamp(r.get("acted_at"))?,
                    action: Decision::parse(&action)
                        .with_context(|| format!("unknown audit action {action:?}"))?,
                    outcome: DispatchOutcome::parse(&outcome)
                        .with_context(|| format!("unknown audit outcome {outcome:?}"))?,
                    snapshot: serde_json::from_str(&snapshot).context("decoding audit snapshot")?,
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Signatures dispatched after this instant are still cooling at `now`.
fn cooldown_threshold(now: DateTime<Utc>) -> i64 {
    // Cooling while now - last_dispatch < window, i.e. last_dispatch > now - window.
    now.timestamp() - COOLDOWN_HOURS * 3600
}

fn from_timestamp(ts: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .with_context(|| format!("invalid stored timestamp {ts}"))
}
