//! Backup job execution: staged progress from pending to a terminal status.

use super::processing::{
    EncryptionKey, SourceFile, compress_file, encrypt_file, inspect, staged_name,
};
use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::registry::JobRegistry;
use crate::types::{
    BackupArtifact, BackupJob, BackupJobId, BackupOptions, BackupStage, BackupStatus, Event,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every backup worker
#[derive(Clone)]
pub(crate) struct ExecutorContext {
    pub(crate) registry: JobRegistry,
    pub(crate) config: Arc<BackupConfig>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) encryption_key: Option<EncryptionKey>,
}

/// What a job's stages have produced so far
struct Staging {
    dir: PathBuf,
    sources: Vec<SourceFile>,
    /// Latest representation of each source, parallel to `sources`
    current: Vec<PathBuf>,
    /// Extensions added by the stages that ran, e.g. ".gz.enc"
    suffix: String,
}

/// Stages a job walks through, in order
pub(crate) fn stages_for(options: &BackupOptions) -> Vec<BackupStage> {
    let mut stages = vec![BackupStage::Validate];
    if options.compression {
        stages.push(BackupStage::Compress);
    }
    if options.encryption {
        stages.push(BackupStage::Encrypt);
    }
    stages.push(BackupStage::Upload);
    stages
}

/// Index of the stage owning the increment that ends at `percent`
fn stage_slot(stage_count: usize, percent: u8) -> usize {
    (usize::from(percent.saturating_sub(1)) * stage_count / 100).min(stage_count - 1)
}

/// Run one backup job to a terminal status
///
/// Never returns an error: every failure ends up on the job snapshot and is
/// announced with [`Event::BackupFailed`].
pub(crate) async fn execute_backup_job(
    ctx: &ExecutorContext,
    id: BackupJobId,
    shutdown: &CancellationToken,
) {
    let job = match ctx.registry.advance(id, BackupStatus::Running, 0).await {
        Ok(job) => job,
        Err(e) => {
            // Evicted or already terminal
            tracing::warn!(job_id = %id, error = %e, "skipping backup job");
            return;
        }
    };

    tracing::info!(
        job_id = %id,
        files = job.files.len(),
        destination = %job.destination,
        "executing backup job"
    );

    let mut staging = Staging {
        dir: ctx.config.staging_dir.join(id.to_string()),
        sources: Vec::new(),
        current: Vec::new(),
        suffix: String::new(),
    };

    match run_stages(ctx, &job, &mut staging, shutdown).await {
        Ok(()) => match ctx.registry.advance(id, BackupStatus::Completed, 100).await {
            Ok(_) => {
                tracing::info!(job_id = %id, "backup job completed");
                ctx.event_tx.send(Event::BackupCompleted { id }).ok();
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to complete backup job"),
        },
        Err(e) => {
            let reason = match e {
                Error::ShuttingDown => "interrupted by shutdown".to_string(),
                other => other.to_string(),
            };
            tracing::warn!(job_id = %id, error = %reason, "backup job failed");
            discard_staging(&staging.dir).await;
            if let Err(e) = ctx.registry.fail(id, reason.clone()).await {
                tracing::warn!(job_id = %id, error = %e, "failed to record backup failure");
            }
            ctx.event_tx
                .send(Event::BackupFailed { id, error: reason })
                .ok();
        }
    }
}

async fn discard_staging(dir: &std::path::Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!(?dir, "removed staging directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(?dir, error = %e, "failed to remove staging directory"),
    }
}

async fn run_stages(
    ctx: &ExecutorContext,
    job: &BackupJob,
    staging: &mut Staging,
    shutdown: &CancellationToken,
) -> Result<()> {
    let stages = stages_for(&job.options);
    let step = ctx.config.progress_step.clamp(1, 100);
    // Index of the first stage that has not run yet
    let mut pending_stage = 0;
    let mut percent = 0u8;

    while percent < 100 {
        let next = percent.saturating_add(step).min(100);
        let slot = stage_slot(stages.len(), next);

        // A coarse step can jump over a stage; run everything up to `slot`
        while pending_stage <= slot {
            run_stage(ctx, job, stages[pending_stage], staging).await?;
            pending_stage += 1;
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(Error::ShuttingDown),
            _ = tokio::time::sleep(ctx.config.step_delay) => {}
        }

        ctx.registry
            .advance(job.id, BackupStatus::Running, next)
            .await?;
        ctx.event_tx
            .send(Event::BackupProgress {
                id: job.id,
                stage: stages[slot],
                percent: next,
            })
            .ok();

        percent = next;
    }

    Ok(())
}

async fn run_stage(
    ctx: &ExecutorContext,
    job: &BackupJob,
    stage: BackupStage,
    staging: &mut Staging,
) -> Result<()> {
    tracing::debug!(job_id = %job.id, ?stage, "entering backup stage");
    match stage {
        BackupStage::Validate => {
            for file in &job.files {
                let source = inspect(PathBuf::from(file)).await?;
                staging.current.push(source.path.clone());
                staging.sources.push(source);
            }
        }
        BackupStage::Compress => {
            staging.suffix.push_str(".gz");
            tokio::fs::create_dir_all(&staging.dir).await?;
            for (index, source) in staging.sources.iter().enumerate() {
                let dst = staged_name(&staging.dir, index, &source.path, &staging.suffix);
                let src = std::mem::replace(&mut staging.current[index], dst.clone());
                compress_file(src, dst, ctx.config.compression_level).await?;
            }
        }
        BackupStage::Encrypt => {
            let key = ctx.encryption_key.clone().ok_or_else(|| Error::Config {
                message: "backup.encryption_key: required for encrypted backups".to_string(),
                key: Some("backup.encryption_key".to_string()),
            })?;
            staging.suffix.push_str(".enc");
            tokio::fs::create_dir_all(&staging.dir).await?;
            for (index, source) in staging.sources.iter().enumerate() {
                let dst = staged_name(&staging.dir, index, &source.path, &staging.suffix);
                let src = std::mem::replace(&mut staging.current[index], dst.clone());
                encrypt_file(src.clone(), dst, key.clone()).await?;
                // Drop the compressed intermediate, never the caller's source
                if src.starts_with(&staging.dir)
                    && let Err(e) = tokio::fs::remove_file(&src).await
                {
                    tracing::warn!(path = ?src, error = %e, "failed to remove intermediate file");
                }
            }
        }
        BackupStage::Upload => {
            let mut artifacts = Vec::with_capacity(staging.sources.len());
            for (source, staged) in staging.sources.iter().zip(&staging.current) {
                artifacts.push(BackupArtifact {
                    source: source.path.to_string_lossy().into_owned(),
                    size: source.size,
                    sha256: source.sha256.clone(),
                    modified: source.modified,
                    staged_path: staged.clone(),
                    staged_size: tokio::fs::metadata(staged).await?.len(),
                });
            }

            tokio::fs::create_dir_all(&staging.dir).await?;
            let manifest = staging.dir.join("manifest.json");
            tokio::fs::write(&manifest, serde_json::to_vec_pretty(&artifacts)?).await?;

            tracing::info!(
                job_id = %job.id,
                files = artifacts.len(),
                destination = %job.destination,
                manifest = %manifest.display(),
                "backup staged for storage"
            );
            ctx.registry.record_artifacts(job.id, artifacts).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_follow_options() {
        let all = BackupOptions {
            compression: true,
            encryption: true,
            schedule: String::new(),
        };
        assert_eq!(
            stages_for(&all),
            vec![
                BackupStage::Validate,
                BackupStage::Compress,
                BackupStage::Encrypt,
                BackupStage::Upload
            ]
        );
        assert_eq!(
            stages_for(&BackupOptions::default()),
            vec![BackupStage::Validate, BackupStage::Upload]
        );
    }

    #[test]
    fn test_stage_slot_splits_progress_evenly() {
        assert_eq!(stage_slot(2, 10), 0);
        assert_eq!(stage_slot(2, 50), 0);
        assert_eq!(stage_slot(2, 60), 1);
        assert_eq!(stage_slot(2, 100), 1);
        // With a 50% step over four stages, slot 0 is never landed on
        assert_eq!(stage_slot(4, 50), 1);
        assert_eq!(stage_slot(4, 100), 3);
    }
}
