//! Event stream for UI/CLI consumers.

use serde::Serialize;
use tokio::sync::broadcast;

use super::progress::FetchProgress;
use super::state::{Failure, RequestId, RunState};

/// Buffered events per subscriber before it starts lagging.
pub(super) const EVENT_CAPACITY: usize = 256;

/// One state transition or progress sample of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub request_id: RequestId,
    pub mod_name: String,
    pub state: RunState,
    /// Set on progress samples while fetching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<FetchProgress>,
    /// Current fetch attempt (0 before fetching starts).
    pub attempt: u32,
}

impl PipelineEvent {
    pub fn error(&self) -> Option<&Failure> {
        match &self.state {
            RunState::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Single-line JSON form, for machine consumers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Which runs a subscription follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Request(RequestId),
}

impl EventFilter {
    fn matches(&self, ev: &PipelineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Request(id) => ev.request_id == *id,
        }
    }
}

/// Receiving end returned by `Orchestrator::subscribe`.
pub struct Subscription {
    rx: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(super) fn new(rx: broadcast::Receiver<PipelineEvent>, filter: EventFilter) -> Self {
        Self { rx, filter }
    }

    /// Next matching event; `None` once the orchestrator is gone. A lagging
    /// subscriber skips what it missed (progress samples are the bulk of it);
    /// use `Orchestrator::wait` for a lossless terminal result.
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) if self.filter.matches(&ev) => return Some(ev),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
