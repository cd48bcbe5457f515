//! One pipeline run: wait for the name, fetch, extract, commit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::error::PipelineError;
use super::guard::WorkAreaGuard;
use super::progress;
use super::slots::SlotTicket;
use super::state::{Failure, FailureKind, RequestId, RunState};
use super::Inner;
use crate::commit::{commit, ModInstallation};
use crate::extract::{extract, ExtractError, ExtractOptions, ExtractSummary};
use crate::fetch::{fetch_with_attempts, TransferCounters};
use crate::layout::WorkPaths;
use crate::request::InstallRequest;
use crate::retry::RetryPolicy;

/// Run `drive` on its own task so a panic still ends in a terminal state.
pub(super) async fn supervise(
    inner: Arc<Inner>,
    id: RequestId,
    request: InstallRequest,
    ticket: SlotTicket,
    cancel: CancellationToken,
) {
    let task = tokio::spawn(drive(Arc::clone(&inner), id, request, ticket, cancel));
    if let Err(e) = task.await {
        inner.finish(
            id,
            RunState::Failed(Failure {
                kind: FailureKind::Internal,
                message: format!("run task failed: {e}"),
            }),
            None,
            None,
        );
    }
}

async fn drive(
    inner: Arc<Inner>,
    id: RequestId,
    request: InstallRequest,
    ticket: SlotTicket,
    cancel: CancellationToken,
) {
    let slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            inner.finish(id, RunState::Cancelled, None, None);
            return;
        }
        slot = ticket.acquire() => slot,
    };

    let mut work = WorkAreaGuard::new(inner.layout.new_work_paths());
    inner.update(id, |run| {
        run.temp_archive_path = Some(work.paths().archive.clone());
        run.staging_dir_path = Some(work.paths().staging.clone());
    });

    let result = stages(&inner, id, &request, work.paths(), &cancel).await;

    // Whoever observes the terminal state may immediately reuse the name and
    // expects the work areas gone.
    work.cleanup();
    match result {
        Ok(installation) => inner.finish(id, RunState::Succeeded, Some(installation), Some(slot)),
        Err(e) => inner.finish(id, e.into_state(), None, Some(slot)),
    }
}

async fn stages(
    inner: &Arc<Inner>,
    id: RequestId,
    request: &InstallRequest,
    work: &WorkPaths,
    cancel: &CancellationToken,
) -> Result<ModInstallation, PipelineError> {
    let policy = inner.config.retry;
    let counters = TransferCounters::new();
    // Attempts are shared between network failures and archives that arrive
    // complete but fail to unpack as a zip.
    let mut spent = 0u32;
    loop {
        inner.transition(id, RunState::Fetching);
        counters.continue_after(spent);
        let budget = RetryPolicy {
            max_attempts: policy.max_attempts.saturating_sub(spent).max(1),
            ..policy
        };
        let ticker = progress::spawn_ticker(Arc::clone(inner), id, counters.clone());
        let outcome = fetch_with_attempts(
            request.source_url(),
            &work.archive,
            &inner.config.fetch,
            &budget,
            cancel,
            Some(counters.clone()),
        )
        .await;
        ticker.abort();
        spent += outcome.attempts;
        inner.update(id, |run| run.attempt_count = spent);
        let fetched = outcome.result?;
        inner.update(id, |run| {
            run.archive_sha256 = Some(fetched.sha256.clone());
            run.archive_bytes = Some(fetched.bytes);
        });

        inner.transition(id, RunState::Extracting);
        match unpack(inner, work, cancel).await {
            Ok(summary) => {
                tracing::debug!(
                    request_id = %id,
                    files = summary.files,
                    dirs = summary.dirs,
                    symlinks = summary.symlinks,
                    bytes = summary.bytes,
                    "staging ready"
                );
                break;
            }
            Err(PipelineError::Extract(ExtractError::CorruptArchive(reason)))
                if spent < policy.max_attempts =>
            {
                let delay = policy.backoff(spent);
                tracing::warn!(
                    request_id = %id,
                    attempt = spent,
                    delay_ms = delay.as_millis() as u64,
                    "archive is corrupt, fetching again: {}",
                    reason
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                }
            }
            Err(e) => return Err(e),
        }
    }

    if !inner.begin_commit(id, cancel) {
        return Err(PipelineError::Cancelled);
    }
    let committer = Arc::clone(inner);
    let work = work.clone();
    let mod_name = request.mod_name().to_string();
    let installation = tokio::task::spawn_blocking(move || {
        commit(&work, &mod_name, &committer.layout, &committer.commit_locks)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("commit task: {e}")))??;
    Ok(installation)
}

/// Extract the fetched archive into a fresh staging directory. A failed
/// extraction leaves no staging directory behind.
async fn unpack(
    inner: &Inner,
    work: &WorkPaths,
    cancel: &CancellationToken,
) -> Result<ExtractSummary, PipelineError> {
    let opts = ExtractOptions {
        max_unpacked_bytes: inner.config.max_unpacked_bytes,
    };
    let (archive, staging, token) = (work.archive.clone(), work.staging.clone(), cancel.clone());
    let summary = tokio::task::spawn_blocking(move || extract(&archive, &staging, &opts, &token))
        .await
        .map_err(|e| PipelineError::Internal(format!("extract task: {e}")))??;
    Ok(summary)
}
