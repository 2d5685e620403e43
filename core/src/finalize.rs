//! The tail of every transformation: hash the input, decide auto-apply,
//! stage the proposal, and either commit the bytes through the safety
//! manager or leave the stage pending for a manual apply.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::StagingConfig;
use crate::digest::sha256_hex;
use crate::error::MorfxErr;
use crate::error::Result;
use crate::provider::Confidence;
use crate::provider::TargetSpec;
use crate::provider::TransformMethod;
use crate::provider::TransformResult;
use crate::safety::FileCheck;
use crate::safety::IntegrityCheck;
use crate::safety::SafetyManager;
use crate::safety::SafetyOperation;
use crate::staging::ApplyRecord;
use crate::staging::PreparedWrite;
use crate::staging::Stage;
use crate::staging::StagingManager;

#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub language: String,
    pub operation: TransformMethod,
    pub target: TargetSpec,
    pub target_query: serde_json::Value,
    /// File mode when set; the transform came from disk and auto-apply may
    /// write back.
    pub path: Option<PathBuf>,
    pub original_source: String,
    pub content: Option<String>,
    pub result: TransformResult,
    pub response_text: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeStatus {
    Applied,
    Staged,
    Completed,
}

impl FinalizeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalizeStatus::Applied => "applied",
            FinalizeStatus::Staged => "staged",
            FinalizeStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for FinalizeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub text: String,
    pub status: FinalizeStatus,
    /// Apply id when applied, stage id when staged.
    pub id: Option<String>,
    pub modified: Option<String>,
    pub path: Option<PathBuf>,
    pub confidence: Confidence,
    pub matches: u32,
}

pub struct TransformFinalizer {
    staging_cfg: StagingConfig,
    staging: Option<Arc<StagingManager>>,
    safety: Arc<SafetyManager>,
}

impl TransformFinalizer {
    pub fn new(
        staging_cfg: StagingConfig,
        staging: Option<Arc<StagingManager>>,
        safety: Arc<SafetyManager>,
    ) -> Self {
        Self {
            staging_cfg,
            staging,
            safety,
        }
    }

    pub async fn finalize(
        &self,
        cancel: &CancellationToken,
        req: FinalizeRequest,
    ) -> Result<FinalizeOutcome> {
        let score = req.result.confidence.score;
        let should_auto_apply =
            self.staging_cfg.auto_apply && score >= self.staging_cfg.auto_apply_threshold;
        let mut text = req.response_text.clone();

        let (status, id) = match &self.staging {
            Some(staging) => {
                let stage = staging.create_stage(cancel, build_stage(&req)).await?;

                if should_auto_apply {
                    let attempt = match &req.path {
                        Some(path) => {
                            self.auto_apply_file(cancel, staging, &stage, path, &req).await
                        }
                        None => {
                            staging
                                .apply_stage(cancel, &stage.id, true, "auto_apply", None)
                                .await
                        }
                    };
                    match attempt {
                        Ok(apply) => {
                            text.push_str(&format!(
                                "\n\nApplied automatically (confidence {score:.2}). Apply id: {}.",
                                apply.id
                            ));
                            (FinalizeStatus::Applied, Some(apply.id))
                        }
                        Err(e @ MorfxErr::Cancelled(_)) => return Err(e),
                        Err(e) => {
                            tracing::warn!("auto-apply of {} failed: {e}", stage.id);
                            text.push_str(&format!(
                                "\n\nAuto-apply failed ({e}). Staged as {} for manual apply.",
                                stage.id
                            ));
                            (FinalizeStatus::Staged, Some(stage.id.clone()))
                        }
                    }
                } else {
                    text.push_str(&format!(
                        "\n\nStaged as {} (confidence {score:.2}, auto-apply threshold {:.2}). \
                         Expires {}.",
                        stage.id, self.staging_cfg.auto_apply_threshold, stage.expires_at
                    ));
                    (FinalizeStatus::Staged, Some(stage.id.clone()))
                }
            }
            None => {
                if should_auto_apply && req.path.is_some() {
                    let path = req.path.clone().unwrap_or_default();
                    self.stateless_write(&path, &req).await?;
                    text.push_str(&format!(
                        "\n\nApplied to {} (confidence {score:.2}, staging disabled).",
                        path.display()
                    ));
                    (FinalizeStatus::Applied, None)
                } else if should_auto_apply {
                    text.push_str("\n\nNo file target; modified source returned only.");
                    (FinalizeStatus::Completed, None)
                } else {
                    text.push_str(&format!(
                        "\n\nConfidence {score:.2} below auto-apply threshold {:.2}; \
                         the file was not modified.",
                        self.staging_cfg.auto_apply_threshold
                    ));
                    (FinalizeStatus::Completed, None)
                }
            }
        };

        Ok(FinalizeOutcome {
            text,
            status,
            id,
            modified: Some(req.result.modified),
            path: req.path,
            confidence: req.result.confidence,
            matches: req.result.match_count,
        })
    }

    /// Write through the safety manager first (validated, locked,
    /// uncommitted), then apply the stage; the file commit is the last step.
    async fn auto_apply_file(
        &self,
        cancel: &CancellationToken,
        staging: &Arc<StagingManager>,
        stage: &Stage,
        path: &Path,
        req: &FinalizeRequest,
    ) -> Result<ApplyRecord> {
        self.validate_single_file(path, req)?;

        let _lock = self.safety.lock_file(path).await?;
        let handle = self
            .safety
            .atomic_write(path, req.result.modified.as_bytes())?;
        let prepared = PreparedWrite {
            path: path.to_path_buf(),
            after_digest: sha256_hex(req.result.modified.as_bytes()),
        };

        match staging
            .apply_stage(cancel, &stage.id, true, "auto_apply", Some(&prepared))
            .await
        {
            Ok(apply) => {
                handle.commit()?;
                Ok(apply)
            }
            Err(e) => {
                handle.rollback()?;
                Err(e)
            }
        }
    }

    async fn stateless_write(&self, path: &Path, req: &FinalizeRequest) -> Result<()> {
        self.validate_single_file(path, req)?;
        let _lock = self.safety.lock_file(path).await?;
        let handle = self
            .safety
            .atomic_write(path, req.result.modified.as_bytes())?;
        handle.commit()
    }

    fn validate_single_file(&self, path: &Path, req: &FinalizeRequest) -> Result<()> {
        let score = req.result.confidence.score;
        self.safety.validate_operation(&SafetyOperation {
            files: vec![FileCheck {
                path: path.to_path_buf(),
                size: req.result.modified.len() as u64,
                confidence: score,
            }],
            global_confidence: score,
        })?;
        if !req.original_source.is_empty() {
            self.safety.validate_file_integrity(&[IntegrityCheck {
                path: path.to_path_buf(),
                expected: sha256_hex(req.original_source.as_bytes()),
            }])?;
        }
        Ok(())
    }
}

fn build_stage(req: &FinalizeRequest) -> Stage {
    let scope_ast = match &req.path {
        Some(path) => serde_json::json!({ "file_path": path }).to_string(),
        None => "{}".to_string(),
    };
    let base_digest = if req.original_source.is_empty() {
        String::new()
    } else {
        sha256_hex(req.original_source.as_bytes())
    };
    let confidence_factors = serde_json::to_string(&req.result.confidence.factors)
        .unwrap_or_else(|_| "[]".to_string());

    Stage {
        session_id: req.session_id.clone(),
        language: req.language.clone(),
        operation: req.operation.as_str().to_string(),
        target_type: req.target.kind.clone(),
        target_name: req.target.name.clone(),
        target_query: req.target_query.to_string(),
        original: req.original_source.clone(),
        modified: req.result.modified.clone(),
        content: req.content.clone(),
        diff: req.result.diff.clone(),
        base_digest,
        confidence_score: req.result.confidence.score,
        confidence_level: req.result.confidence.level.as_str().to_string(),
        confidence_factors,
        scope_ast,
        ..Default::default()
    }
}
