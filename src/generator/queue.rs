//! Single-slot regeneration queue.
//!
//! One worker runs generation passes one at a time. The trigger never blocks:
//! while a pass runs at most one more is queued, further triggers collapse
//! into it.

use super::{Providers, generate};
use crate::{log, portal::Portal};
use std::{
    path::PathBuf,
    sync::Arc,
    time::Instant,
};
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Clone)]
pub struct Regenerator {
    tx: mpsc::Sender<()>,
}

impl Regenerator {
    /// Spawn the worker. It exits once every `Regenerator` clone is dropped,
    /// or after the first pass that fails outright.
    pub fn spawn(portal: Arc<Portal>, output: PathBuf) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let worker = tokio::spawn(run(rx, portal, output));
        (Self { tx }, worker)
    }

    /// Request a pass. Returns `false` when one is already queued or the
    /// worker has stopped.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

async fn run(mut rx: mpsc::Receiver<()>, portal: Arc<Portal>, output: PathBuf) {
    let providers = Providers::default();

    while rx.recv().await.is_some() {
        let start = Instant::now();
        let model = portal.models.model();
        let names = portal.cache.list_compiled_names();

        match generate(&output, &portal.cache, &model, &names, &providers).await {
            Ok(report) => log!(
                "generate";
                "{} files in {:.0?} ({} skipped, {} failed)",
                report.written,
                start.elapsed(),
                report.skipped,
                report.failed
            ),
            Err(err) => {
                log!("error"; "{err:#}, regeneration stopped");
                break;
            }
        }
    }
}
