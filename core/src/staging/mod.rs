//! The staging manager: every proposed transformation becomes a `stages`
//! row, reversible until applied, expired by TTL, and bounded per session.
//! Applying is transactional: the database is only committed if the file
//! write committed, and the file write is only kept if the database
//! committed.

pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::StagingConfig;
use crate::digest::sha256_hex;
use crate::error::MorfxErr;
use crate::error::Result;
use crate::safety::IntegrityCheck;
use crate::safety::SafetyManager;
use crate::safety::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Applied,
    Expired,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Applied => "applied",
            StageStatus::Expired => "expired",
            StageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted transformation proposal. JSON-valued columns stay as raw
/// strings here; accessors parse on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Stage {
    pub id: String,
    pub session_id: Option<String>,
    pub language: String,
    pub operation: String,
    pub target_type: String,
    pub target_name: String,
    pub target_query: String,
    pub original: String,
    pub modified: String,
    pub content: Option<String>,
    pub diff: String,
    pub base_digest: String,
    pub after_digest: String,
    pub confidence_score: f64,
    pub confidence_level: String,
    pub confidence_factors: String,
    pub scope_ast: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
}

impl Stage {
    /// The on-disk target recorded in the stage's scope, when the stage was
    /// computed in file mode.
    pub fn scope_file_path(&self) -> Option<PathBuf> {
        let scope: serde_json::Value = serde_json::from_str(&self.scope_ast).ok()?;
        scope
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }

    pub fn is_pending(&self) -> bool {
        self.status == StageStatus::Pending.as_str()
    }
}

/// Audit row written for every apply. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApplyRecord {
    pub id: String,
    pub stage_id: String,
    pub auto_applied: bool,
    pub applied_by: String,
    pub applied_at: String,
}

/// Proof that the caller already placed the stage's bytes on disk through
/// the safety manager (uncommitted); apply must not write again.
#[derive(Debug, Clone)]
pub struct PreparedWrite {
    pub path: PathBuf,
    pub after_digest: String,
}

pub struct StagingManager {
    pool: SqlitePool,
    cfg: StagingConfig,
    safety: Arc<SafetyManager>,
}

impl StagingManager {
    pub fn new(pool: SqlitePool, cfg: StagingConfig, safety: Arc<SafetyManager>) -> Self {
        Self { pool, cfg, safety }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &StagingConfig {
        &self.cfg
    }

    pub async fn ensure_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(now_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a new stage. Assigns the id, status and TTL window; enforces
    /// the per-session pending limit; writes nothing if `cancel` fires
    /// first.
    pub async fn create_stage(&self, cancel: &CancellationToken, stage: Stage) -> Result<Stage> {
        if cancel.is_cancelled() {
            return Err(MorfxErr::Cancelled("stage creation aborted".to_string()));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(MorfxErr::Cancelled("stage creation aborted".to_string()))
            }
            res = self.insert_stage(stage) => res,
        }
    }

    async fn insert_stage(&self, mut stage: Stage) -> Result<Stage> {
        if stage.id.is_empty() {
            stage.id = format!("stg_{}", uuid::Uuid::new_v4().simple());
        }
        stage.status = StageStatus::Pending.as_str().to_string();
        let now = chrono::Utc::now();
        stage.created_at = rfc3339(now);
        let ttl = chrono::Duration::from_std(self.cfg.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        stage.expires_at = rfc3339(now + ttl);

        let mut tx = self.pool.begin().await?;

        if let Some(session_id) = &stage.session_id {
            sqlx::query("INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?, ?)")
                .bind(session_id)
                .bind(&stage.created_at)
                .execute(&mut *tx)
                .await?;
            let (pending,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM stages WHERE session_id = ? AND status = 'pending'",
            )
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;
            if pending >= self.cfg.max_stages_per_session {
                return Err(MorfxErr::StageLimitExceeded {
                    session_id: session_id.clone(),
                    limit: self.cfg.max_stages_per_session,
                });
            }
            sqlx::query("UPDATE sessions SET stages_count = stages_count + 1 WHERE id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO stages (
                id, session_id, language, operation, target_type, target_name,
                target_query, original, modified, content, diff, base_digest,
                after_digest, confidence_score, confidence_level,
                confidence_factors, scope_ast, status, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stage.id)
        .bind(&stage.session_id)
        .bind(&stage.language)
        .bind(&stage.operation)
        .bind(&stage.target_type)
        .bind(&stage.target_name)
        .bind(&stage.target_query)
        .bind(&stage.original)
        .bind(&stage.modified)
        .bind(&stage.content)
        .bind(&stage.diff)
        .bind(&stage.base_digest)
        .bind(&stage.after_digest)
        .bind(stage.confidence_score)
        .bind(&stage.confidence_level)
        .bind(&stage.confidence_factors)
        .bind(&stage.scope_ast)
        .bind(&stage.status)
        .bind(&stage.created_at)
        .bind(&stage.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stage)
    }

    pub async fn get_stage(&self, id: &str) -> Result<Stage> {
        sqlx::query_as::<_, Stage>("SELECT * FROM stages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MorfxErr::StageNotFound(id.to_string()))
    }

    /// Pending stages for a session, in insertion order.
    pub async fn list_pending_stages(&self, session_id: &str) -> Result<Vec<Stage>> {
        Ok(sqlx::query_as::<_, Stage>(
            "SELECT * FROM stages WHERE session_id = ? AND status = 'pending' ORDER BY rowid",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Apply one pending stage. When the stage's scope names a file and no
    /// [`PreparedWrite`] is given, the safety manager checks integrity,
    /// takes the lock and writes atomically; the database commit happens
    /// first and the file commit is the final step, so a half-applied state
    /// cannot be observed.
    pub async fn apply_stage(
        &self,
        cancel: &CancellationToken,
        id: &str,
        auto: bool,
        applied_by: &str,
        prepared: Option<&PreparedWrite>,
    ) -> Result<ApplyRecord> {
        if cancel.is_cancelled() {
            return Err(MorfxErr::Cancelled("apply aborted".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let stage = sqlx::query_as::<_, Stage>("SELECT * FROM stages WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MorfxErr::StageNotFound(id.to_string()))?;

        if !stage.is_pending() {
            return Err(MorfxErr::StageNotPending {
                id: stage.id,
                status: stage.status,
            });
        }
        let now = now_rfc3339();
        if stage.expires_at.as_str() <= now.as_str() {
            return Err(MorfxErr::StageExpired(stage.id));
        }

        if let Some(session_id) = &stage.session_id {
            let (applies,): (i64,) =
                sqlx::query_as("SELECT COALESCE(applies_count, 0) FROM sessions WHERE id = ?")
                    .bind(session_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .unwrap_or((0,));
            if applies >= self.cfg.max_applies_per_session {
                return Err(MorfxErr::ApplyLimitExceeded {
                    session_id: session_id.clone(),
                    limit: self.cfg.max_applies_per_session,
                });
            }
        }

        // Put the bytes in place (uncommitted) before touching the rows.
        let mut handle = None;
        let mut _lock = None;
        let after_digest = match stage.scope_file_path() {
            Some(path) => match prepared {
                Some(prepared) => {
                    if prepared.path != path {
                        return Err(MorfxErr::Internal(format!(
                            "prepared write targets {}, stage targets {}",
                            prepared.path.display(),
                            path.display()
                        )));
                    }
                    prepared.after_digest.clone()
                }
                None => {
                    if !stage.base_digest.is_empty() {
                        self.safety.validate_file_integrity(&[IntegrityCheck {
                            path: path.clone(),
                            expected: stage.base_digest.clone(),
                        }])?;
                    }
                    _lock = Some(self.safety.lock_file(&path).await?);
                    match self.safety.atomic_write(&path, stage.modified.as_bytes()) {
                        Ok(h) => {
                            handle = Some(h);
                            sha256_hex(stage.modified.as_bytes())
                        }
                        Err(e) if is_terminal_write_error(&e) => {
                            drop(tx);
                            self.mark_failed(&stage.id).await?;
                            return Err(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            },
            None => sha256_hex(stage.modified.as_bytes()),
        };

        let apply = ApplyRecord {
            id: format!("app_{}", uuid::Uuid::new_v4().simple()),
            stage_id: stage.id.clone(),
            auto_applied: auto,
            applied_by: applied_by.to_string(),
            applied_at: now,
        };

        sqlx::query("UPDATE stages SET status = 'applied', after_digest = ? WHERE id = ?")
            .bind(&after_digest)
            .bind(&stage.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO applies (id, stage_id, auto_applied, applied_by, applied_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&apply.id)
        .bind(&apply.stage_id)
        .bind(apply.auto_applied)
        .bind(&apply.applied_by)
        .bind(&apply.applied_at)
        .execute(&mut *tx)
        .await?;
        if let Some(session_id) = &stage.session_id {
            sqlx::query("UPDATE sessions SET applies_count = applies_count + 1 WHERE id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        // A cancellation that fired during the write must win: undo the
        // file, drop the row changes.
        if cancel.is_cancelled() {
            tx.rollback().await?;
            if let Some(handle) = handle {
                handle.rollback()?;
            }
            return Err(MorfxErr::Cancelled("apply aborted".to_string()));
        }

        if let Err(e) = tx.commit().await {
            if let Some(handle) = handle {
                handle.rollback()?;
            }
            return Err(e.into());
        }
        if let Some(handle) = handle
            && let Err(e) = handle.commit()
        {
            // The stage is applied and the bytes are in place; only the
            // transaction log is behind.
            tracing::warn!("file commit bookkeeping failed after apply: {e}");
        }

        Ok(apply)
    }

    /// Flip expired pending stages to `expired`. Rows are preserved for
    /// inspection; only retention deletes them.
    pub async fn cleanup_expired_stages(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE stages SET status = 'expired' WHERE status = 'pending' AND expires_at < ?")
                .bind(now_rfc3339())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Classify a stage as terminally failed.
    pub async fn mark_failed(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE stages SET status = 'failed' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn safety(&self) -> &Arc<SafetyManager> {
        &self.safety
    }
}

fn is_terminal_write_error(err: &MorfxErr) -> bool {
    matches!(
        err,
        MorfxErr::AtomicWriteFailed { .. } | MorfxErr::BackupFailed { .. }
    )
}

fn rfc3339(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
