//! Live pipeline while serving.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │  pages/                                                            │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐  │
//! │  │ Notifier │──▶│ debounce  │──▶│ on_changed + │──▶│ register   │  │
//! │  │ (thread) │   │ (per path)│   │ resolve      │   │ route      │  │
//! │  └──────────┘   └───────────┘   └──────────────┘   └─────┬──────┘  │
//! │                                                          │         │
//! │  plugins.d/                                              ▼         │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐  │
//! │  │ Notifier │──▶│ debounce  │──▶│ ModelHandle  │──▶│ Regenerator│  │
//! │  │ (thread) │   │ (burst)   │   │ ::reload     │   │ (1 slot)   │  │
//! │  └──────────┘   └───────────┘   └──────────────┘   └────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both drivers stop when the shutdown flag flips, and stop their notifier.

mod debounce;
mod notifier;

pub use debounce::debounce;
pub use notifier::{ChangeEvent, ChangeKind, Notifier};

use crate::{
    catalog, compiler::PAGE_EXTENSION, config::SiteConfig, debug, error::PageError,
    generator::Regenerator, log, portal::Portal,
};
use anyhow::Result;
use std::{path::Path, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

fn is_page_source(path: &Path) -> bool {
    !is_temp_file(path)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PAGE_EXTENSION))
}

/// Format absolute path as relative to root, with trailing slash.
fn format_rel(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    format!("{}/", rel.display())
}

/// Start the page and catalog drivers.
pub fn start(
    portal: Arc<Portal>,
    regen: Option<Regenerator>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let config: &SiteConfig = portal.config;
    let window = config.serve.debounce();

    let (page_notifier, page_events) = Notifier::spawn(&config.build.pages, is_page_source)?;
    let page_events = debounce(page_events, window, |a: &ChangeEvent, b: &ChangeEvent| {
        a.path == b.path
    });

    let (catalog_notifier, catalog_events) =
        Notifier::spawn(&config.build.catalog, catalog::is_descriptor)?;
    // Any catalog change invalidates the whole model, so a burst is one reload.
    let catalog_events = debounce(catalog_events, window, |_: &ChangeEvent, _: &ChangeEvent| true);

    let root = config.get_root();
    log!(
        "watch";
        "pages: {}, catalog: {}",
        format_rel(&config.build.pages, root),
        format_rel(&config.build.catalog, root)
    );

    Ok(vec![
        tokio::spawn(drive_pages(
            Arc::clone(&portal),
            page_notifier,
            page_events,
            regen.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(drive_catalog(
            portal,
            catalog_notifier,
            catalog_events,
            regen,
            shutdown,
        )),
    ])
}

/// Wait for the next batch: one event plus whatever is already buffered.
/// `None` on shutdown or when the stream ends.
async fn next_batch(
    events: &mut mpsc::Receiver<ChangeEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Vec<ChangeEvent>> {
    let first = tokio::select! {
        _ = shutdown.changed() => return None,
        event = events.recv() => event?,
    };

    let mut batch = vec![first];
    while let Ok(event) = events.try_recv() {
        batch.push(event);
    }
    Some(batch)
}

async fn stop_notifier(mut notifier: Notifier) {
    // `stop` joins the thread, keep it off the async workers.
    tokio::task::spawn_blocking(move || notifier.stop()).await.ok();
}

async fn drive_pages(
    portal: Arc<Portal>,
    notifier: Notifier,
    mut events: mpsc::Receiver<ChangeEvent>,
    regen: Option<Regenerator>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(batch) = next_batch(&mut events, &mut shutdown).await {
        let updated = recompile(&portal, &batch).await;
        if updated > 0 {
            log!("watch"; "{updated} pages updated");
            if let Some(regen) = &regen {
                regen.trigger();
            }
        }
    }
    // A notifier blocked on a full channel only wakes once the receiver is gone.
    drop(events);
    stop_notifier(notifier).await;
}

/// Feed a batch through the cache and mount what compiled.
/// Returns how many pages changed availability or content.
async fn recompile(portal: &Portal, batch: &[ChangeEvent]) -> usize {
    let mut updated = 0;

    for event in batch {
        let Some(name) = portal.cache.on_changed(&event.path) else {
            continue;
        };
        match portal.cache.resolve(&name).await {
            Ok(page) => {
                debug!("watch"; "{name} ({:?}) → {}", event.kind, page.route());
                portal.routes.register(&page);
                updated += 1;
            }
            Err(PageError::NotFound(_)) => {
                log!("watch"; "{name} removed");
                updated += 1;
            }
            // Already logged by the cache.
            Err(_) => {}
        }
    }
    updated
}

async fn drive_catalog(
    portal: Arc<Portal>,
    notifier: Notifier,
    mut events: mpsc::Receiver<ChangeEvent>,
    regen: Option<Regenerator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let dir = &portal.config.build.catalog;

    while next_batch(&mut events, &mut shutdown).await.is_some() {
        match portal.models.reload(dir) {
            Ok(true) => {
                let model = portal.models.current();
                log!("catalog"; "reloaded {} plugins", model.plugins().len());
                catalog::log_report(model.report());
                if let Some(regen) = &regen {
                    regen.trigger();
                }
            }
            Ok(false) => debug!("catalog"; "unchanged"),
            Err(err) => log!("catalog"; "{:#}, keeping previous catalog", anyhow::Error::from(err)),
        }
    }
    // A notifier blocked on a full channel only wakes once the receiver is gone.
    drop(events);
    stop_notifier(notifier).await;
}
