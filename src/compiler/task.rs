//! One compilation of one page path.
//!
//! Each task is a single-writer state machine published through a
//! `tokio::sync::watch` channel:
//!
//! ```text
//!            publish(Ok)
//! Pending ─────────────────► Ready
//!    │   publish(Err)
//!    ├─────────────────────► Failed
//!    │   cancel()
//!    └─────────────────────► Cancelled
//! ```
//!
//! Only `Pending` transitions. A result that arrives after cancellation is
//! dropped, so a superseded task never becomes `Ready`.

use super::page::CompiledPage;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::watch, task::AbortHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A newer task replaced this one.
    Superseded,
    /// The source file disappeared.
    Deleted,
}

#[derive(Debug, Clone)]
pub enum TaskState {
    Pending,
    Ready(Arc<CompiledPage>),
    Failed(Arc<str>),
    Cancelled(CancelReason),
}

impl TaskState {
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Last successful compile for a path: content hash and page.
pub type Fallback = Option<(blake3::Hash, Arc<CompiledPage>)>;

pub struct CompileTask {
    name: String,
    hash: Option<blake3::Hash>,
    state: watch::Sender<TaskState>,
    /// Carried across supersession, served while the newest task is `Failed`.
    fallback: Fallback,
    abort: Mutex<Option<AbortHandle>>,
}

impl CompileTask {
    /// A task about to compile content with `hash`.
    pub fn pending(name: &str, hash: blake3::Hash, fallback: Fallback) -> Self {
        Self::with_state(name, Some(hash), TaskState::Pending, fallback)
    }

    /// A task that reuses an earlier page without compiling.
    pub fn restored(name: &str, hash: blake3::Hash, page: Arc<CompiledPage>) -> Self {
        let fallback = Some((hash, Arc::clone(&page)));
        Self::with_state(name, Some(hash), TaskState::Ready(page), fallback)
    }

    /// Marker left behind when the source file is deleted.
    pub fn tombstone(name: &str) -> Self {
        Self::with_state(
            name,
            None,
            TaskState::Cancelled(CancelReason::Deleted),
            None,
        )
    }

    fn with_state(name: &str, hash: Option<blake3::Hash>, state: TaskState, fallback: Fallback) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            name: name.to_owned(),
            hash,
            state,
            fallback,
            abort: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Hash of the compiled content, when the task may still produce a page.
    pub fn live_hash(&self) -> Option<blake3::Hash> {
        match *self.state.borrow() {
            TaskState::Pending | TaskState::Ready(_) => self.hash,
            TaskState::Failed(_) | TaskState::Cancelled(_) => None,
        }
    }

    pub fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    /// Fallback for the task that will replace this one.
    pub fn successor_fallback(&self) -> Fallback {
        match (&*self.state.borrow(), self.hash) {
            (TaskState::Ready(page), Some(hash)) => Some((hash, Arc::clone(page))),
            (TaskState::Cancelled(CancelReason::Deleted), _) => None,
            _ => self.fallback.clone(),
        }
    }

    pub fn set_abort(&self, handle: AbortHandle) {
        *self.abort.lock() = Some(handle);
    }

    /// Publish a compile result. Returns `false` if the task was cancelled first.
    pub fn publish(&self, result: Result<Arc<CompiledPage>, Arc<str>>) -> bool {
        self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            *state = match result {
                Ok(page) => TaskState::Ready(page),
                Err(diagnostic) => TaskState::Failed(diagnostic),
            };
            true
        })
    }

    /// Cancel a pending task. Ready, failed and cancelled tasks are untouched,
    /// so existing holders of a ready page keep it.
    pub fn cancel(&self, reason: CancelReason) {
        let cancelled = self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            *state = TaskState::Cancelled(reason);
            true
        });
        if cancelled && let Some(handle) = self.abort.lock().take() {
            handle.abort();
        }
    }

    /// Wait until the task leaves `Pending`.
    pub async fn settled(&self) -> TaskState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so this only happens on teardown.
            Err(_) => TaskState::Cancelled(CancelReason::Superseded),
        }
    }
}
