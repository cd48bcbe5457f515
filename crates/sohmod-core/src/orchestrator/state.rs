//! Run state machine and snapshots.
//!
//! ```text
//! Queued -> Fetching -> Extracting -> Committing -> Succeeded
//!    \_________\____________\_____________\______-> Failed
//!    \_________\____________\_________________-> Cancelled
//! ```
//!
//! A corrupt archive sends the run from `Extracting` back to `Fetching` while
//! attempts remain. Cancellation is not accepted once `Committing` has begun.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::commit::ModInstallation;
use crate::request::InstallRequest;

/// Identifier handed back by `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Which stage a failed run died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fetch,
    Extract,
    Commit,
    /// Commit failed and the previous installation could not be restored.
    RollbackFailed,
    Internal,
}

impl FailureKind {
    /// CLI exit code: 2 fetch, 3 extract, 4 commit.
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::Fetch => 2,
            FailureKind::Extract => 3,
            FailureKind::Commit | FailureKind::RollbackFailed | FailureKind::Internal => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Fetching,
    Extracting,
    Committing,
    Succeeded,
    Failed(Failure),
    Cancelled,
}

/// Exit code for a cancelled run (outside the failure taxonomy).
pub const CANCELLED_EXIT_CODE: i32 = 130;

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed(_) | RunState::Cancelled
        )
    }

    /// States from which `cancel` is honored.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            RunState::Queued | RunState::Fetching | RunState::Extracting
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Fetching => "fetching",
            RunState::Extracting => "extracting",
            RunState::Committing => "committing",
            RunState::Succeeded => "succeeded",
            RunState::Failed(_) => "failed",
            RunState::Cancelled => "cancelled",
        }
    }

    /// Exit code for terminal states, `None` while the run is active.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunState::Succeeded => Some(0),
            RunState::Failed(f) => Some(f.kind.exit_code()),
            RunState::Cancelled => Some(CANCELLED_EXIT_CODE),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Failed(failure) => write!(f, "failed ({failure})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Snapshot of one install attempt, as returned by `status` and `wait`.
///
/// Work paths are set once the run leaves the queue; all of them are gone
/// from disk by the time a terminal state is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub id: RequestId,
    pub request: InstallRequest,
    pub state: RunState,
    pub temp_archive_path: Option<PathBuf>,
    pub staging_dir_path: Option<PathBuf>,
    pub final_dir_path: PathBuf,
    /// Fetch attempts made so far, including the current one.
    pub attempt_count: u32,
    pub archive_sha256: Option<String>,
    pub archive_bytes: Option<u64>,
    pub installation: Option<ModInstallation>,
}

impl PipelineRun {
    pub(crate) fn new(id: RequestId, request: InstallRequest, final_dir_path: PathBuf) -> Self {
        Self {
            id,
            request,
            state: RunState::Queued,
            temp_archive_path: None,
            staging_dir_path: None,
            final_dir_path,
            attempt_count: 0,
            archive_sha256: None,
            archive_bytes: None,
            installation: None,
        }
    }

    pub fn error(&self) -> Option<&Failure> {
        match &self.state {
            RunState::Failed(f) => Some(f),
            _ => None,
        }
    }
}
