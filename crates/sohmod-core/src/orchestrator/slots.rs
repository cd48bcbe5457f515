//! Per-mod-name admission: at most one active run per name.
//!
//! Reservation happens synchronously inside `submit`, so queued runs start in
//! submission order regardless of how their tasks get scheduled.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::error::ConflictError;
use super::state::RequestId;
use crate::config::ConflictPolicy;

#[derive(Default)]
struct NameQueue {
    /// Run currently holding the name (granted, possibly not yet started).
    active: Option<RequestId>,
    waiting: VecDeque<(RequestId, oneshot::Sender<()>)>,
}

#[derive(Clone, Default)]
pub(super) struct NameSlots {
    names: Arc<Mutex<HashMap<String, NameQueue>>>,
}

impl NameSlots {
    /// Claim `name` for `id`, or line up behind the active run. Under
    /// [`ConflictPolicy::Reject`] a busy name is refused.
    pub(super) fn reserve(
        &self,
        id: RequestId,
        name: &str,
        policy: ConflictPolicy,
    ) -> Result<SlotTicket, ConflictError> {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        let rx = match names.get_mut(name) {
            None => {
                names.insert(
                    name.to_string(),
                    NameQueue {
                        active: Some(id),
                        waiting: VecDeque::new(),
                    },
                );
                None
            }
            Some(queue) => {
                let holder = queue
                    .active
                    .or_else(|| queue.waiting.front().map(|(w, _)| *w));
                if policy == ConflictPolicy::Reject {
                    return Err(ConflictError::AlreadyInstalling {
                        mod_name: name.to_string(),
                        active: holder,
                    });
                }
                let (tx, rx) = oneshot::channel();
                queue.waiting.push_back((id, tx));
                tracing::debug!(mod_name = name, request_id = %id, "queued behind active run");
                Some(rx)
            }
        };
        Ok(SlotTicket {
            slots: self.clone(),
            name: name.to_string(),
            id,
            rx,
            armed: true,
        })
    }

    /// Hand the name from `id` to the next live waiter, or free it.
    fn release(&self, name: &str, id: RequestId) {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        let Some(queue) = names.get_mut(name) else {
            return;
        };
        if queue.active == Some(id) {
            queue.active = None;
            while let Some((next, tx)) = queue.waiting.pop_front() {
                if tx.send(()).is_ok() {
                    queue.active = Some(next);
                    break;
                }
            }
        } else {
            queue.waiting.retain(|(w, _)| *w != id);
        }
        if queue.active.is_none() && queue.waiting.is_empty() {
            names.remove(name);
        }
    }

    pub(super) fn is_busy(&self, name: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }
}

/// A place in a name's queue. Dropping it gives the place up.
pub(super) struct SlotTicket {
    slots: NameSlots,
    name: String,
    id: RequestId,
    rx: Option<oneshot::Receiver<()>>,
    armed: bool,
}

impl SlotTicket {
    /// Wait until this run holds the name.
    pub(super) async fn acquire(mut self) -> SlotGuard {
        if let Some(rx) = self.rx.take() {
            // The sender only drops unsent if the queue entry was removed,
            // which never happens while we are waiting in it.
            let _ = rx.await;
        }
        self.armed = false;
        SlotGuard {
            slots: self.slots.clone(),
            name: std::mem::take(&mut self.name),
            id: self.id,
        }
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        if self.armed {
            self.slots.release(&self.name, self.id);
        }
    }
}

/// Holds the name for the run; released on drop.
pub(super) struct SlotGuard {
    slots: NameSlots,
    name: String,
    id: RequestId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release(&self.name, self.id);
    }
}
