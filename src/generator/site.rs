//! Static site generation: every page × every parameter tuple → file tree.
//!
//! ```text
//! names ──► resolve ──► provide tuples ──► substitute route ──► render ──► write
//!                                                │
//!                      `/` → index.html, `/a/` → a/index.html
//! ```
//!
//! The output directory is wiped first, so each run produces exactly the
//! current page set. Rendering and writing run in parallel on rayon.

use super::provider::Providers;
use crate::{
    catalog::{Model, Parameters},
    compiler::{CompiledPage, PageCache},
    debug,
    error::PageError,
    log,
    render::{render, with_doctype},
};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Outcome of one generation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct Job {
    page: Arc<CompiledPage>,
    params: Parameters,
}

/// Regenerate `output` from `names`.
pub async fn generate(
    output: &Path,
    cache: &PageCache,
    model: &Model,
    names: &[String],
    providers: &Providers,
) -> Result<GenerateReport> {
    let mut report = GenerateReport::default();
    // Keyed by target file; the first page in name order claims a path.
    let mut jobs: BTreeMap<PathBuf, Job> = BTreeMap::new();

    for name in names {
        let page = match cache.resolve(name).await {
            Ok(page) => page,
            Err(err) => {
                debug!("generate"; "{err}");
                report.skipped += 1;
                continue;
            }
        };

        for params in providers.provide(&page, model.catalog()) {
            if page.params().iter().any(|p| !params.contains_key(p)) {
                report.skipped += 1;
                continue;
            }
            let Some(route) = page.route().substitute(&params) else {
                report.skipped += 1;
                continue;
            };
            jobs.entry(output_path(output, &route)).or_insert_with(|| Job {
                page: Arc::clone(&page),
                params,
            });
        }
    }

    clear_output(output)?;

    let model = model.clone();
    let written = tokio::task::spawn_blocking(move || write_all(jobs, &model))
        .await
        .context("Generation worker panicked")??;

    report.written = written.written;
    report.skipped += written.skipped;
    report.failed = written.failed;
    Ok(report)
}

fn clear_output(output: &Path) -> Result<()> {
    if output.exists() {
        fs::remove_dir_all(output)
            .with_context(|| format!("Failed to clear {}", output.display()))?;
    }
    fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))
}

fn write_all(jobs: BTreeMap<PathBuf, Job>, model: &Model) -> Result<GenerateReport> {
    let outcomes: Vec<Result<Option<bool>>> = jobs
        .into_par_iter()
        .map(|(path, job)| write_one(&path, &job, model))
        .collect();

    let mut report = GenerateReport::default();
    for outcome in outcomes {
        match outcome? {
            Some(true) => report.written += 1,
            Some(false) => report.failed += 1,
            None => report.skipped += 1,
        }
    }
    Ok(report)
}

/// `Some(true)` written, `Some(false)` render failure, `None` not found.
fn write_one(path: &Path, job: &Job, model: &Model) -> Result<Option<bool>> {
    let markup = match render(&job.page, &model.with_params(job.params.clone())) {
        Ok(markup) => with_doctype(markup),
        Err(PageError::NotFound(_)) => return Ok(None),
        Err(err) => {
            log!("generate"; "{err}");
            return Ok(Some(false));
        }
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, markup).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(Some(true))
}

/// `/` → `index.html`, `/docs/` → `docs/index.html`, `/a/b.html` → `a/b.html`.
fn output_path(output: &Path, route: &str) -> PathBuf {
    let rel = route.trim_start_matches('/');
    if rel.is_empty() || rel.ends_with('/') {
        output.join(rel).join("index.html")
    } else {
        output.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::sample_catalog,
        compiler::{HandlebarsCompiler, PageCompiler},
    };
    use walkdir::WalkDir;

    struct Fixture {
        _pages: tempfile::TempDir,
        out: tempfile::TempDir,
        cache: PageCache,
    }

    impl Fixture {
        fn new(pages: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (name, source) in pages {
                let path = dir.path().join(format!("{name}.page.hbs"));
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, source).unwrap();
            }
            let cache = PageCache::new(dir.path(), Arc::new(HandlebarsCompiler) as Arc<dyn PageCompiler>);
            Self {
                _pages: dir,
                out: tempfile::tempdir().unwrap(),
                cache,
            }
        }

        async fn run(&self) -> GenerateReport {
            let names = self.cache.compile_all();
            let model = Model::new(sample_catalog());
            generate(self.out.path(), &self.cache, &model, &names, &Providers::default())
                .await
                .unwrap()
        }

        fn tree(&self) -> BTreeMap<String, Vec<u8>> {
            WalkDir::new(self.out.path())
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    let rel = e.path().strip_prefix(self.out.path()).unwrap();
                    (rel.to_string_lossy().replace('\\', "/"), fs::read(e.path()).unwrap())
                })
                .collect()
        }
    }

    const PAGES: &[(&str, &str)] = &[
        ("index", "{{#each plugins}}<a href=\"/plugins/{{id}}.html\">{{title}}</a>{{/each}}"),
        ("plugin", "{{!-- @location plugin --}}<h1>{{location.title}}</h1>"),
        ("tag", "{{!-- @location tag --}}{{#each location.plugins}}{{id}} {{/each}}"),
        ("docs/intro", "intro"),
    ];

    #[test]
    fn test_output_path() {
        let out = Path::new("/out");
        assert_eq!(output_path(out, "/"), Path::new("/out/index.html"));
        assert_eq!(output_path(out, "/docs/"), Path::new("/out/docs/index.html"));
        assert_eq!(output_path(out, "/plugins/a.html"), Path::new("/out/plugins/a.html"));
    }

    #[tokio::test]
    async fn test_generates_every_tuple() {
        let fx = Fixture::new(PAGES);
        let report = fx.run().await;

        // index + 3 plugins + 3 tags + docs/intro
        assert_eq!(report.written, 8);
        assert_eq!(report.failed, 0);

        let tree = fx.tree();
        assert_eq!(tree["plugins/ktor-auth.html"], b"<!DOCTYPE html>\n<h1>Title ktor-auth</h1>");
        assert_eq!(tree["plugins/tag/security.html"], b"<!DOCTYPE html>\nktor-auth ktor-jwt ");
        assert!(tree.contains_key("index.html"));
        assert!(tree.contains_key("docs/intro.html"));
    }

    #[tokio::test]
    async fn test_generation_is_idempotent() {
        let fx = Fixture::new(PAGES);
        fx.run().await;
        let first = fx.tree();
        fx.run().await;
        assert_eq!(first, fx.tree());
    }

    #[tokio::test]
    async fn test_stale_files_are_removed() {
        let fx = Fixture::new(PAGES);
        fs::write(fx.out.path().join("stale.html"), "old").unwrap();
        fx.run().await;
        assert!(!fx.out.path().join("stale.html").exists());
    }

    #[tokio::test]
    async fn test_render_failures_are_counted() {
        let fx = Fixture::new(&[("index", "ok"), ("broken", "{{missing}}")]);
        let report = fx.run().await;

        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert!(!fx.out.path().join("broken.html").exists());
    }

    #[tokio::test]
    async fn test_unprovided_pages_are_skipped() {
        let fx = Fixture::new(&[("search", "{{!-- @route /search/{query}.html --}}x")]);
        let report = fx.run().await;
        assert_eq!(report, GenerateReport::default());
    }
}
