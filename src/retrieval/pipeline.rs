//! Retrieval pipeline: resolve the file set, fetch each item, persist progress.

use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::extraction::{extract_payload, should_extract};
use crate::fetch::{
    ContentFetcher, FetchedContent, ScratchReaper, scratch_path, validate_identifier,
};
use crate::retry::with_retry;
use crate::store::RetrievalStore;
use crate::types::{
    Event, ResolvedTarget, RetrievalFormat, RetrievalJob, RetrievalJobId, RetrievalStatus,
    RetrievedFile, RetrievedFileStatus, WalletAddress,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Shared dependencies of every pipeline run
pub(crate) struct PipelineContext {
    pub(crate) store: Arc<dyn RetrievalStore>,
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Deletes files recorded on a job once `retrieval.file_retention` passes
    pub(crate) job_files: ScratchReaper,
}

/// How the per-item loop ended
enum LoopOutcome {
    Finished { failed: usize, last_error: Option<String> },
    Interrupted,
}

/// Run a retrieval job to a terminal status and return the stored record
///
/// Per-item fetch failures are recorded on the job and do not abort the run.
/// An `Err` means the job record itself could not be written.
pub(crate) async fn run_retrieval_pipeline(
    ctx: &PipelineContext,
    mut job: RetrievalJob,
    cancel: &CancellationToken,
) -> Result<RetrievalJob> {
    let id = job.id;

    job.status = RetrievalStatus::Processing;
    job.message = "Starting file retrieval...".to_string();
    persist(ctx, &job).await?;

    let targets = match resolve_targets(ctx, &job).await {
        Ok(targets) => targets,
        Err(e) => {
            tracing::warn!(job_id = %id, error = %e, "failed to resolve retrieval targets");
            let message = format!("Failed to resolve files: {}", e);
            return finish(ctx, job, RetrievalStatus::Failed, message).await;
        }
    };

    if targets.is_empty() {
        let message = "No files to retrieve".to_string();
        return finish(ctx, job, RetrievalStatus::Failed, message).await;
    }

    let total = targets.len();
    tracing::info!(
        job_id = %id,
        total_files = total,
        format = job.format.as_str(),
        "retrieval started"
    );
    ctx.event_tx
        .send(Event::RetrievalStarted {
            id,
            total_files: total,
        })
        .ok();

    match fetch_all(ctx, &mut job, &targets, cancel).await? {
        LoopOutcome::Interrupted => finish_interrupted(ctx, job).await,
        LoopOutcome::Finished { failed, last_error } => {
            let retrieved = job.files.len();
            job.record_attempts(total, total);
            if retrieved > 0 {
                let mut message =
                    format!("Successfully retrieved {} of {} files", retrieved, total);
                if failed > 0 {
                    message.push_str(&format!(" ({} failed)", failed));
                }
                finish(ctx, job, RetrievalStatus::Completed, message).await
            } else {
                let mut message = format!("Failed to retrieve any of {} files", total);
                if let Some(last) = last_error {
                    message.push_str(&format!(": {}", last));
                }
                finish(ctx, job, RetrievalStatus::Failed, message).await
            }
        }
    }
}

async fn fetch_all(
    ctx: &PipelineContext,
    job: &mut RetrievalJob,
    targets: &[ResolvedTarget],
    cancel: &CancellationToken,
) -> Result<LoopOutcome> {
    let id = job.id;
    let total = targets.len();
    let mut failed = 0;
    let mut last_error = None;

    for (index, target) in targets.iter().enumerate() {
        if cancel.is_cancelled() || cancelled_in_store(ctx, id).await? {
            tracing::info!(job_id = %id, attempted = index, total, "retrieval interrupted");
            return Ok(LoopOutcome::Interrupted);
        }

        let fetched =
            fetch_by_format(ctx, &target.cid, job.format, &job.wallet_address, cancel).await;
        match fetched {
            Ok(content) => {
                tracing::debug!(
                    job_id = %id,
                    cid = %target.cid,
                    size = content.size,
                    "file retrieved"
                );
                ctx.event_tx
                    .send(Event::RetrievalFileRetrieved {
                        id,
                        cid: target.cid.clone(),
                        size: content.size,
                    })
                    .ok();
                ctx.job_files.schedule(content.local_path.clone());
                job.record_file(RetrievedFile {
                    cid: target.cid.clone(),
                    file_path: target.file_path.clone(),
                    size: content.size,
                    content_type: content.content_type,
                    status: RetrievedFileStatus::Retrieved,
                    local_path: content.local_path,
                    download_url: download_url(ctx, &target.cid, job.format),
                });
            }
            Err(Error::Fetch(FetchError::Cancelled)) => {
                tracing::info!(job_id = %id, cid = %target.cid, "transfer cancelled");
                return Ok(LoopOutcome::Interrupted);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    cid = %target.cid,
                    error = %e,
                    "failed to retrieve file"
                );
                job.message = format!("Failed to retrieve {}: {}", target.cid, e);
                ctx.event_tx
                    .send(Event::RetrievalFileFailed {
                        id,
                        cid: target.cid.clone(),
                        error: e.to_string(),
                    })
                    .ok();
                failed += 1;
                last_error = Some(e.to_string());
            }
        }

        job.record_attempts(index + 1, total);
        persist(ctx, job).await?;
    }

    Ok(LoopOutcome::Finished { failed, last_error })
}

/// Settle a job whose run was interrupted before it finished
///
/// A job the store already records as cancelled stays cancelled and keeps the
/// files retrieved so far. Anything else was interrupted by shutdown.
pub(crate) async fn finish_interrupted(
    ctx: &PipelineContext,
    job: RetrievalJob,
) -> Result<RetrievalJob> {
    if cancelled_in_store(ctx, job.id).await? {
        finish(ctx, job, RetrievalStatus::Cancelled, "Job was cancelled".to_string()).await
    } else {
        finish(ctx, job, RetrievalStatus::Failed, "Interrupted by shutdown".to_string()).await
    }
}

async fn finish(
    ctx: &PipelineContext,
    mut job: RetrievalJob,
    status: RetrievalStatus,
    message: String,
) -> Result<RetrievalJob> {
    job.status = status;
    job.message = message;
    job.completed_at = Some(Utc::now());
    persist(ctx, &job).await?;

    // The store keeps whichever terminal status landed first
    let id = job.id;
    let stored = with_retry(&ctx.config.persistence.retry, move || {
        ctx.store.get_retrieval_job(id)
    })
    .await?
    .unwrap_or(job);

    let event = match stored.status {
        RetrievalStatus::Completed => Event::RetrievalCompleted {
            id,
            retrieved: stored.files.len(),
            total_size: stored.total_size,
        },
        RetrievalStatus::Cancelled => Event::RetrievalCancelled {
            id,
            retrieved: stored.files.len(),
        },
        _ => Event::RetrievalFailed {
            id,
            error: stored.message.clone(),
        },
    };
    ctx.event_tx.send(event).ok();

    tracing::info!(
        job_id = %id,
        status = stored.status.as_str(),
        retrieved = stored.files.len(),
        total_size = stored.total_size,
        message = %stored.message,
        "retrieval finished"
    );

    Ok(stored)
}

async fn persist(ctx: &PipelineContext, job: &RetrievalJob) -> Result<()> {
    with_retry(&ctx.config.persistence.retry, || ctx.store.update_retrieval_job(job))
        .await
        .inspect_err(|e| {
            tracing::error!(job_id = %job.id, error = %e, "failed to persist retrieval job");
        })
}

async fn cancelled_in_store(ctx: &PipelineContext, id: RetrievalJobId) -> Result<bool> {
    let status = with_retry(&ctx.config.persistence.retry, || {
        ctx.store.get_retrieval_status(id)
    })
    .await?;
    Ok(status == Some(RetrievalStatus::Cancelled))
}

/// Files a job covers, from the first input shape it names
///
/// A parent backup job wins over explicit identifiers, which win over paths.
pub(crate) async fn resolve_targets(
    ctx: &PipelineContext,
    job: &RetrievalJob,
) -> Result<Vec<ResolvedTarget>> {
    let retry = &ctx.config.persistence.retry;
    let owner = &job.wallet_address;

    if let Some(backup_job_id) = job.backup_job_id {
        with_retry(retry, || ctx.store.targets_for_backup_job(backup_job_id, owner)).await
    } else if !job.cids.is_empty() {
        Ok(job.cids.iter().map(|cid| ResolvedTarget::from_cid(cid)).collect())
    } else if !job.file_paths.is_empty() {
        with_retry(retry, || ctx.store.targets_for_paths(&job.file_paths, owner)).await
    } else {
        Ok(Vec::new())
    }
}

/// Produce one item in the requested representation
pub(crate) async fn fetch_by_format(
    ctx: &PipelineContext,
    cid: &str,
    format: RetrievalFormat,
    owner: &WalletAddress,
    cancel: &CancellationToken,
) -> Result<FetchedContent> {
    match format {
        RetrievalFormat::Metadata => write_metadata(ctx, cid, owner).await,
        RetrievalFormat::Car => {
            let content = ctx.fetcher.fetch(cid, cancel).await?;
            Ok(FetchedContent {
                content_type: "application/car".to_string(),
                ..content
            })
        }
        RetrievalFormat::Original => {
            let content = ctx.fetcher.fetch(cid, cancel).await?;
            if !should_extract(cid, content.size, ctx.config.retrieval.extract_threshold_bytes) {
                return Ok(content);
            }

            let dest = scratch_path(&ctx.config.gateway.scratch_dir, cid, "payload");
            match extract_payload(&content.local_path, &dest).await {
                Ok(size) => {
                    if let Err(e) = tokio::fs::remove_file(&content.local_path).await {
                        tracing::warn!(cid, error = %e, "failed to remove container after extraction");
                    }
                    Ok(FetchedContent {
                        local_path: dest,
                        content_type: "application/octet-stream".to_string(),
                        size,
                    })
                }
                Err(e) => {
                    tracing::warn!(cid, error = %e, "extraction failed, keeping raw content");
                    Ok(content)
                }
            }
        }
    }
}

async fn write_metadata(
    ctx: &PipelineContext,
    cid: &str,
    owner: &WalletAddress,
) -> Result<FetchedContent> {
    validate_identifier(cid)?;
    let gateway = ctx.config.gateway.url.clone();

    let record = with_retry(&ctx.config.persistence.retry, || {
        ctx.store.get_file_metadata(cid, owner)
    })
    .await?;

    let value = match record {
        Some(mut metadata) if metadata.wallet_address.as_ref() == Some(owner) => {
            metadata.gateway = Some(gateway);
            serde_json::to_value(metadata)?
        }
        _ => serde_json::json!({
            "cid": cid,
            "file_path": cid,
            "gateway": gateway,
        }),
    };

    let body = serde_json::to_vec_pretty(&value)?;
    tokio::fs::create_dir_all(&ctx.config.gateway.scratch_dir).await?;
    let local_path = scratch_path(&ctx.config.gateway.scratch_dir, cid, "json");
    tokio::fs::write(&local_path, &body).await?;

    Ok(FetchedContent {
        local_path,
        content_type: "application/json".to_string(),
        size: body.len() as u64,
    })
}

fn download_url(ctx: &PipelineContext, cid: &str, format: RetrievalFormat) -> String {
    format!(
        "{}/{}?format={}",
        ctx.config.retrieval.download_url_base.trim_end_matches('/'),
        cid,
        format.as_str()
    )
}
