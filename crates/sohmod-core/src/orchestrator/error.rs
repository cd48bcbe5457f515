//! Orchestrator-level errors.

use super::state::{Failure, FailureKind, RequestId, RunState};
use crate::commit::CommitError;
use crate::extract::ExtractError;
use crate::fetch::FetchError;
use crate::request::ParseError;

/// A same-name run is active and the policy is `reject`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error("mod `{mod_name}` is already being installed")]
    AlreadyInstalling {
        mod_name: String,
        active: Option<RequestId>,
    },
}

/// Why `submit` refused a request. Neither case leaves anything on disk.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

impl SubmitError {
    /// CLI exit code: 1 parse, 5 conflict.
    pub fn exit_code(&self) -> i32 {
        match self {
            SubmitError::Parse(_) => 1,
            SubmitError::Conflict(_) => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    #[error("no such request: {0}")]
    UnknownRequest(RequestId),
    /// The run is committing or already finished.
    #[error("request {id} cannot be cancelled while {state}")]
    NotCancellable { id: RequestId, state: &'static str },
}

/// Failure of one stage of a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("extract failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),
    #[error("cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Fetch(FetchError::Cancelled)
                | PipelineError::Extract(ExtractError::Cancelled)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::Fetch(_) => FailureKind::Fetch,
            PipelineError::Extract(_) => FailureKind::Extract,
            PipelineError::Commit(e) if e.needs_manual_recovery() => FailureKind::RollbackFailed,
            PipelineError::Commit(_) => FailureKind::Commit,
            PipelineError::Cancelled | PipelineError::Internal(_) => FailureKind::Internal,
        }
    }

    /// Terminal state this error ends a run in.
    pub fn into_state(self) -> RunState {
        if self.is_cancelled() {
            return RunState::Cancelled;
        }
        RunState::Failed(Failure {
            kind: self.failure_kind(),
            message: self.to_string(),
        })
    }
}
