//! Recursive change notifier.
//!
//! Runs `notify` on a dedicated thread and forwards matching paths into a
//! tokio channel:
//!
//! ```text
//! ┌────────────────────── notifier thread ──────────────────────┐
//! │ watch(root, Recursive)                                      │
//! │ enumerate(root) ──► Created events                          │
//! │ loop:                                                       │
//! │   create(dir)  ──► enumerate(dir) (contents may predate it) │
//! │   rescan       ──► tear down, restart from enumerate(root)  │
//! │   other        ──► Created / Modified / Deleted             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sequence never ends on its own. It stops when [`Notifier::stop`] is
//! called, the handle is dropped, or the receiver is closed.

use crate::log;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::Duration,
};
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// How often the thread checks for a stop request while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    fn new(path: PathBuf, kind: ChangeKind) -> Self {
        Self { path, kind }
    }
}

/// Handle to a running notifier thread.
pub struct Notifier {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Notifier {
    /// Watch `root`, emitting events for paths accepted by `predicate`.
    pub fn spawn<P>(root: &Path, predicate: P) -> Result<(Self, mpsc::Receiver<ChangeEvent>)>
    where
        P: Fn(&Path) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            root: root.to_path_buf(),
            predicate,
            tx,
            stop: Arc::clone(&stop),
        };
        let thread = thread::Builder::new()
            .name(format!("notify:{}", root.display()))
            .spawn(move || worker.run())
            .context("Failed to spawn watcher thread")?;

        Ok((
            Self {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why a watch session ended.
enum Exit {
    Stop,
    Restart,
}

struct Worker<P> {
    root: PathBuf,
    predicate: P,
    tx: mpsc::Sender<ChangeEvent>,
    stop: Arc<AtomicBool>,
}

impl<P: Fn(&Path) -> bool> Worker<P> {
    fn run(self) {
        loop {
            match self.session() {
                Ok(Exit::Stop) => return,
                Ok(Exit::Restart) => log!("watch"; "rescan required, restarting {}", self.root.display()),
                Err(err) => {
                    log!("watch"; "{err:#}");
                    return;
                }
            }
        }
    }

    /// One watch lifetime: register, enumerate, then forward live events.
    fn session(&self) -> Result<Exit> {
        let (raw_tx, raw_rx) = std_mpsc::channel();
        let mut watcher = notify::recommended_watcher(raw_tx).context("Failed to create file watcher")?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;

        // Registered before enumerating, so nothing falls between the two.
        if !self.enumerate(&self.root) {
            return Ok(Exit::Stop);
        }

        loop {
            if self.stop.load(Ordering::Relaxed) || self.tx.is_closed() {
                return Ok(Exit::Stop);
            }

            match raw_rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) if event.need_rescan() => return Ok(Exit::Restart),
                Ok(Ok(event)) => {
                    if !self.forward(event) {
                        return Ok(Exit::Stop);
                    }
                }
                Ok(Err(err)) => {
                    log!("watch"; "error: {err}");
                    return Ok(Exit::Restart);
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return Ok(Exit::Restart),
            }
        }
    }

    /// Emit `Created` for every matching file under `dir`.
    fn enumerate(&self, dir: &Path) -> bool {
        WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .all(|entry| self.emit(entry.into_path(), ChangeKind::Created))
    }

    fn forward(&self, event: Event) -> bool {
        for path in event.paths {
            let delivered = match event.kind {
                EventKind::Create(_) if path.is_dir() => self.enumerate(&path),
                EventKind::Create(_) => self.emit(path, ChangeKind::Created),
                EventKind::Remove(_) => self.emit(path, ChangeKind::Deleted),
                // Renames and unspecified changes carry no reliable direction.
                EventKind::Modify(_) | EventKind::Any => {
                    let kind = match path.try_exists() {
                        Ok(true) if path.is_dir() => {
                            if !self.enumerate(&path) {
                                return false;
                            }
                            continue;
                        }
                        Ok(true) => ChangeKind::Modified,
                        _ => ChangeKind::Deleted,
                    };
                    self.emit(path, kind)
                }
                EventKind::Access(_) | EventKind::Other => true,
            };
            if !delivered {
                return false;
            }
        }
        true
    }

    /// Returns `false` once the receiver is gone.
    fn emit(&self, path: PathBuf, kind: ChangeKind) -> bool {
        if !(self.predicate)(&path) {
            return true;
        }
        self.tx.blocking_send(ChangeEvent::new(path, kind)).is_ok()
    }
}
