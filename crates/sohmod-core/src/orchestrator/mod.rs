//! Pipeline orchestrator.
//!
//! Owns every run from `submit` to a terminal state: admits it under the
//! per-name conflict policy, drives fetch → extract → commit on its own task,
//! publishes an event for each transition, and guarantees the run's work
//! areas are gone before the terminal state becomes visible.
//!
//! An `Orchestrator` is an explicit instance built from a [`PipelineConfig`];
//! several can coexist (one per mods root), which is what the tests do.

mod error;
mod events;
mod guard;
mod progress;
mod run;
mod slots;
mod state;

pub use error::{CancelError, ConflictError, PipelineError, SubmitError};
pub use events::{EventFilter, PipelineEvent, Subscription};
pub use progress::FetchProgress;
pub use state::{Failure, FailureKind, PipelineRun, RequestId, RunState, CANCELLED_EXIT_CODE};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::commit::{CommitLocks, ModInstallation};
use crate::config::PipelineConfig;
use crate::layout::ModsLayout;
use crate::request::{self, InstallRequest};

/// Finished runs kept for `status`/`wait` before the oldest are forgotten.
const RETAIN_FINISHED: usize = 1024;

struct RunEntry {
    snapshot: watch::Sender<PipelineRun>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Runs {
    by_id: HashMap<RequestId, RunEntry>,
    finished: VecDeque<RequestId>,
}

struct Inner {
    config: PipelineConfig,
    layout: ModsLayout,
    commit_locks: CommitLocks,
    events: broadcast::Sender<PipelineEvent>,
    runs: Mutex<Runs>,
    slots: slots::NameSlots,
}

/// Cheap to clone; clones share the same runs and event stream.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Initialize the mods root (creating it and purging stale work areas)
    /// and build an orchestrator over it. Needs a Tokio runtime for `submit`.
    pub fn new(config: PipelineConfig) -> io::Result<Self> {
        let layout = ModsLayout::init(&config.mods_root)?;
        let (events, _) = broadcast::channel(events::EVENT_CAPACITY);
        tracing::debug!(
            mods_root = %layout.root().display(),
            policy = ?config.conflict_policy,
            "orchestrator ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                layout,
                commit_locks: CommitLocks::new(),
                events,
                runs: Mutex::new(Runs::default()),
                slots: slots::NameSlots::default(),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn layout(&self) -> &ModsLayout {
        &self.inner.layout
    }

    /// Parse a raw invocation (`<scheme>:<url>,<name>,<id>`) and submit it.
    pub fn submit(&self, raw: &str) -> Result<RequestId, SubmitError> {
        let request = request::parse_with_scheme(raw, &self.inner.config.scheme)?;
        self.submit_request(request)
    }

    /// Admit an already-built request. Conflicts are reported here, before
    /// anything touches disk; everything later arrives as events.
    pub fn submit_request(&self, request: InstallRequest) -> Result<RequestId, SubmitError> {
        let id = RequestId::new();
        let ticket = self.inner.slots.reserve(
            id,
            request.mod_name(),
            self.inner.config.conflict_policy,
        )?;
        let cancel = CancellationToken::new();
        let run = PipelineRun::new(
            id,
            request.clone(),
            self.inner.layout.final_dir(request.mod_name()),
        );
        {
            let mut runs = self.inner.lock_runs();
            self.inner.emit(&run, None);
            let (snapshot, _) = watch::channel(run);
            runs.by_id.insert(
                id,
                RunEntry {
                    snapshot,
                    cancel: cancel.clone(),
                },
            );
        }
        tracing::info!(
            request_id = %id,
            mod_name = request.mod_name(),
            url = request.source_url(),
            "install request accepted"
        );
        tokio::spawn(run::supervise(
            Arc::clone(&self.inner),
            id,
            request,
            ticket,
            cancel,
        ));
        Ok(id)
    }

    /// Subscribe to events. Subscribe before `submit` to be sure of seeing
    /// the `Queued` event of the new run.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription::new(self.inner.events.subscribe(), filter)
    }

    pub fn status(&self, id: RequestId) -> Option<PipelineRun> {
        let runs = self.inner.lock_runs();
        runs.by_id.get(&id).map(|e| e.snapshot.borrow().clone())
    }

    /// Runs not yet in a terminal state.
    pub fn active_runs(&self) -> Vec<PipelineRun> {
        let runs = self.inner.lock_runs();
        runs.by_id
            .values()
            .map(|e| e.snapshot.borrow().clone())
            .filter(|r| !r.state.is_terminal())
            .collect()
    }

    /// Resolve once run `id` reaches a terminal state (immediately if it
    /// already has). `None` for unknown ids.
    pub async fn wait(&self, id: RequestId) -> Option<PipelineRun> {
        let mut rx = {
            let runs = self.inner.lock_runs();
            runs.by_id.get(&id)?.snapshot.subscribe()
        };
        let done = rx
            .wait_for(|run| run.state.is_terminal())
            .await
            .map(|run| run.clone());
        Some(done.unwrap_or_else(|_| rx.borrow().clone()))
    }

    /// Request cancellation. Refused once the run is committing or finished;
    /// otherwise the run ends `Cancelled` (or, if a stage completes first and
    /// the commit check sees the request, still `Cancelled`).
    pub fn cancel(&self, id: RequestId) -> Result<(), CancelError> {
        let runs = self.inner.lock_runs();
        let entry = runs
            .by_id
            .get(&id)
            .ok_or(CancelError::UnknownRequest(id))?;
        let state = entry.snapshot.borrow().state.clone();
        if !state.is_cancellable() {
            return Err(CancelError::NotCancellable {
                id,
                state: state.name(),
            });
        }
        entry.cancel.cancel();
        tracing::info!(request_id = %id, state = state.name(), "cancellation requested");
        Ok(())
    }

    /// Cancel every cancellable run; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let runs = self.inner.lock_runs();
        let mut n = 0;
        for entry in runs.by_id.values() {
            if entry.snapshot.borrow().state.is_cancellable() {
                entry.cancel.cancel();
                n += 1;
            }
        }
        n
    }
}

impl Inner {
    fn lock_runs(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Broadcast an event for `run`. Called with the runs lock held so event
    /// order matches snapshot order.
    fn emit(&self, run: &PipelineRun, progress: Option<FetchProgress>) {
        // No subscribers is fine.
        let _ = self.events.send(PipelineEvent {
            request_id: run.id,
            mod_name: run.request.mod_name().to_string(),
            state: run.state.clone(),
            progress,
            attempt: run.attempt_count,
        });
    }

    fn update(&self, id: RequestId, f: impl FnOnce(&mut PipelineRun)) {
        let runs = self.lock_runs();
        if let Some(entry) = runs.by_id.get(&id) {
            entry.snapshot.send_modify(f);
        }
    }

    fn transition(&self, id: RequestId, state: RunState) {
        let runs = self.lock_runs();
        let Some(entry) = runs.by_id.get(&id) else {
            return;
        };
        tracing::debug!(request_id = %id, state = state.name(), "run state changed");
        entry.snapshot.send_modify(|run| run.state = state);
        self.emit(&entry.snapshot.borrow(), None);
    }

    /// Enter `Committing` unless cancellation was requested first. Checked
    /// under the same lock `cancel` takes, so exactly one of them wins.
    fn begin_commit(&self, id: RequestId, cancel: &CancellationToken) -> bool {
        let runs = self.lock_runs();
        let Some(entry) = runs.by_id.get(&id) else {
            return false;
        };
        if cancel.is_cancelled() {
            return false;
        }
        tracing::debug!(request_id = %id, "run state changed: committing");
        entry
            .snapshot
            .send_modify(|run| run.state = RunState::Committing);
        self.emit(&entry.snapshot.borrow(), None);
        true
    }

    fn report_progress(
        &self,
        id: RequestId,
        expected: RunState,
        attempt: u32,
        progress: FetchProgress,
    ) {
        let runs = self.lock_runs();
        let Some(entry) = runs.by_id.get(&id) else {
            return;
        };
        if entry.snapshot.borrow().state != expected {
            return;
        }
        entry.snapshot.send_modify(|run| run.attempt_count = attempt);
        self.emit(&entry.snapshot.borrow(), Some(progress));
    }

    /// Publish the terminal state. Work areas must already be cleaned up.
    ///
    /// The name is released under the runs lock, before the state changes:
    /// a queued successor cannot publish anything ahead of this run's
    /// terminal event, and whoever observes that event finds the name free.
    fn finish(
        &self,
        id: RequestId,
        state: RunState,
        installation: Option<ModInstallation>,
        slot: Option<slots::SlotGuard>,
    ) {
        let mut runs = self.lock_runs();
        drop(slot);
        let Some(entry) = runs.by_id.get(&id) else {
            return;
        };
        if entry.snapshot.borrow().state.is_terminal() {
            return;
        }
        let mod_name = entry.snapshot.borrow().request.mod_name().to_string();
        match &state {
            RunState::Succeeded => {
                tracing::info!(request_id = %id, mod_name = %mod_name, "install succeeded")
            }
            RunState::Cancelled => {
                tracing::info!(request_id = %id, mod_name = %mod_name, "install cancelled")
            }
            RunState::Failed(f) if f.kind == FailureKind::RollbackFailed => tracing::error!(
                request_id = %id,
                mod_name = %mod_name,
                "install failed and the previous installation needs manual recovery: {}",
                f.message
            ),
            RunState::Failed(f) => {
                tracing::warn!(request_id = %id, mod_name = %mod_name, kind = ?f.kind, "install failed: {}", f.message)
            }
            _ => {}
        }
        entry.snapshot.send_modify(|run| {
            run.state = state;
            if installation.is_some() {
                run.installation = installation;
            }
        });
        self.emit(&entry.snapshot.borrow(), None);

        runs.finished.push_back(id);
        while runs.finished.len() > RETAIN_FINISHED {
            if let Some(old) = runs.finished.pop_front() {
                runs.by_id.remove(&old);
            }
        }
    }
}
