//! One-shot static build.
//!
//! ```text
//! build_site()
//!     │
//!     ├── Portal::load()        catalog → model, report logged
//!     │
//!     ├── compile_all()         every page, routes mounted
//!     │
//!     └── generate()            output wiped and rewritten
//! ```

use crate::{
    config::SiteConfig,
    generator::{Providers, generate},
    log,
    portal::Portal,
};
use anyhow::{Result, bail};
use std::time::Instant;

/// Compile every page and write the static tree once.
///
/// Fails when any page failed to compile; the tree is still written from
/// the pages that did compile.
pub async fn build_site(config: &'static SiteConfig) -> Result<()> {
    let start = Instant::now();
    let portal = Portal::load(config)?;
    let failed = portal.compile_all().await;

    let model = portal.models.model();
    let names = portal.cache.list_compiled_names();
    let report = generate(
        &config.build.output,
        &portal.cache,
        &model,
        &names,
        &Providers::default(),
    )
    .await?;

    log!(
        "generate";
        "{} files in {:.0?} ({} skipped, {} failed)",
        report.written,
        start.elapsed(),
        report.skipped,
        report.failed
    );

    if !failed.is_empty() {
        bail!("{} pages failed to compile: {}", failed.len(), failed.join(", "));
    }
    if report.failed > 0 {
        bail!("{} pages failed to render", report.failed);
    }
    Ok(())
}
