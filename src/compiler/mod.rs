//! Compilation cache: page path → current [`CompileTask`].
//!
//! - **page**: directives, routes and the Handlebars entry point
//! - **task**: per-path compile state machine
//!
//! # Flow
//!
//! ```text
//! on_changed(path) ──► hash content ──┬── same as live task ──► reuse
//!                                     ├── same as fallback ───► restore (Ready)
//!                                     └── otherwise ──────────► new Pending task
//!                                                                 │ CAS install
//!                                                                 ▼
//!                                                         spawn_blocking(compile)
//!                                                                 │
//! resolve(name) ◄──── wait until settled ◄──── publish(Ready | Failed)
//! ```
//!
//! The map is replaced wholesale with compare-and-swap, so readers never see a
//! torn entry and a task is only spawned once it is the installed one.

mod page;
mod task;

pub use page::{CompileError, CompiledPage, HandlebarsCompiler, LocationKind, PageCompiler, RenderFn};
pub use task::{CancelReason, CompileTask, TaskState};

use crate::{debug, error::PageError, log};
use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

/// Page source extension, stripped to form the page name.
pub const PAGE_EXTENSION: &str = ".page.hbs";

type TaskMap = FxHashMap<PathBuf, Arc<CompileTask>>;

pub struct PageCache {
    root: PathBuf,
    compiler: Arc<dyn PageCompiler>,
    tasks: ArcSwap<TaskMap>,
}

/// Who asked for an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A file event: the content on disk supersedes whatever is installed.
    Change,
    /// `resolve` found no usable task.
    Lookup,
}

/// What `on_changed` decided for a path.
enum Decision {
    Reuse(Arc<CompileTask>),
    Install(Arc<CompileTask>),
}

impl PageCache {
    pub fn new(root: impl Into<PathBuf>, compiler: Arc<dyn PageCompiler>) -> Self {
        Self {
            root: root.into(),
            compiler,
            tasks: ArcSwap::from_pointee(TaskMap::default()),
        }
    }

    /// `docs/intro` → `<root>/docs/intro.page.hbs`
    pub fn page_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{PAGE_EXTENSION}"))
    }

    /// `<root>/docs/intro.page.hbs` → `docs/intro`
    pub fn page_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        let name = rel.strip_suffix(PAGE_EXTENSION)?;
        (!name.is_empty() && !name.ends_with('/')).then(|| name.to_owned())
    }

    /// Suspend until a page for `name` is ready.
    pub async fn resolve(&self, name: &str) -> Result<Arc<CompiledPage>, PageError> {
        let path = self.page_path(name);
        let not_found = || PageError::NotFound(format!("page `{name}`"));

        loop {
            // The file is the source of truth, a missed delete event must not
            // keep a page servable.
            if !path.is_file() {
                if self.tasks.load().contains_key(&path) {
                    self.tombstone(&path, name);
                }
                return Err(not_found());
            }

            let installed = self.tasks.load().get(&path).cloned();
            let task = match installed {
                Some(task) if !matches!(task.state(), TaskState::Cancelled(_)) => task,
                _ => self.install(&path, name, Origin::Lookup).ok_or_else(not_found)?,
            };

            match task.settled().await {
                TaskState::Ready(page) => return Ok(page),
                TaskState::Failed(diagnostic) => {
                    return match task.fallback() {
                        Some((_, page)) => Ok(Arc::clone(page)),
                        None => Err(PageError::CompileFailure {
                            page: name.to_owned(),
                            diagnostic,
                        }),
                    };
                }
                TaskState::Cancelled(CancelReason::Deleted) if !path.is_file() => {
                    return Err(not_found());
                }
                // Superseded, or deleted and recreated: retry against the newest task.
                TaskState::Cancelled(_) | TaskState::Pending => {}
            }
        }
    }

    /// React to a file event for `path`. Returns the page name when the path is
    /// a page.
    pub fn on_changed(&self, path: &Path) -> Option<String> {
        let name = self.page_name(path)?;
        if !path.is_file() {
            self.tombstone(path, &name);
        } else {
            self.install(path, &name, Origin::Change);
        }
        Some(name)
    }

    /// Names of every cached, non-cancelled page, sorted.
    pub fn list_compiled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .load()
            .values()
            .filter(|task| !matches!(task.state(), TaskState::Cancelled(_)))
            .map(|task| task.name().to_owned())
            .collect();
        names.sort_unstable();
        names
    }

    /// Start compiling every page under the root, returning their names sorted.
    pub fn compile_all(&self) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = self.page_name(entry.path())?;
                self.install(entry.path(), &name, Origin::Change)?;
                Some(name)
            })
            .collect();
        names.sort_unstable();
        names
    }

    /// Read the file and install (or reuse) the task for its current content.
    ///
    /// A lookup only fills a missing or tombstoned slot. Replacing a live task
    /// is left to change events, so a lookup holding older content can never
    /// displace a newer compile.
    fn install(&self, path: &Path, name: &str, origin: Origin) -> Option<Arc<CompileTask>> {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(_) => {
                self.tombstone(path, name);
                return None;
            }
        };
        let hash = blake3::hash(source.as_bytes());

        let decide = |current: Option<&Arc<CompileTask>>| match current {
            Some(task)
                if origin == Origin::Lookup && !matches!(task.state(), TaskState::Cancelled(_)) =>
            {
                Decision::Reuse(Arc::clone(task))
            }
            Some(task) if task.live_hash() == Some(hash) => Decision::Reuse(Arc::clone(task)),
            Some(task) => match task.successor_fallback() {
                Some((good, page)) if good == hash => {
                    Decision::Install(Arc::new(CompileTask::restored(name, hash, page)))
                }
                fallback => Decision::Install(Arc::new(CompileTask::pending(name, hash, fallback))),
            },
            None => Decision::Install(Arc::new(CompileTask::pending(name, hash, None))),
        };

        let (decision, displaced) = self.swap_in(path, decide);
        let task = match decision {
            Decision::Reuse(task) => return Some(task),
            Decision::Install(task) => task,
        };

        if let Some(old) = displaced {
            old.cancel(CancelReason::Superseded);
        }
        if task.state().is_pending() {
            self.spawn_compile(Arc::clone(&task), source);
        } else {
            debug!("compile"; "{name}: restored previous page");
        }
        Some(task)
    }

    fn tombstone(&self, path: &Path, name: &str) {
        let decide = |current: Option<&Arc<CompileTask>>| match current {
            Some(task) if matches!(task.state(), TaskState::Cancelled(CancelReason::Deleted)) => {
                Decision::Reuse(Arc::clone(task))
            }
            _ => Decision::Install(Arc::new(CompileTask::tombstone(name))),
        };

        if let (Decision::Install(_), Some(old)) = self.swap_in(path, decide) {
            old.cancel(CancelReason::Deleted);
            debug!("compile"; "{name}: removed");
        }
    }

    /// Compare-and-swap loop over the task map. `decide` may run several
    /// times; only the winning decision is returned, with the displaced task.
    fn swap_in(
        &self,
        path: &Path,
        decide: impl Fn(Option<&Arc<CompileTask>>) -> Decision,
    ) -> (Decision, Option<Arc<CompileTask>>) {
        loop {
            let current = self.tasks.load_full();
            let existing = current.get(path);

            let task = match decide(existing) {
                reuse @ Decision::Reuse(_) => return (reuse, None),
                Decision::Install(task) => task,
            };

            let mut next = TaskMap::clone(&current);
            let displaced = next.insert(path.to_path_buf(), Arc::clone(&task));
            let previous = self.tasks.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                return (Decision::Install(task), displaced);
            }
        }
    }

    fn spawn_compile(&self, task: Arc<CompileTask>, source: String) {
        let compiler = Arc::clone(&self.compiler);
        let handle = tokio::spawn({
            let task = Arc::clone(&task);
            async move {
                let name = task.name().to_owned();
                let result = tokio::task::spawn_blocking(move || compiler.compile(&name, &source)).await;

                let result: Result<Arc<CompiledPage>, Arc<str>> = match result {
                    Ok(Ok(page)) => Ok(Arc::new(page)),
                    Ok(Err(err)) => Err(Arc::from(err.to_string())),
                    Err(_) => Err(Arc::from("compiler panicked")),
                };

                match &result {
                    Ok(_) => debug!("compile"; "{}: ready", task.name()),
                    Err(diagnostic) => log!("compile"; "{}: {diagnostic}", task.name()),
                }
                task.publish(result);
            }
        });
        task.set_abort(handle.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Counts compiles and sleeps on sources containing `slow`.
    #[derive(Default)]
    struct CountingCompiler {
        compiles: AtomicUsize,
    }

    impl PageCompiler for CountingCompiler {
        fn compile(&self, name: &str, source: &str) -> Result<CompiledPage, CompileError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            if source.contains("slow") {
                std::thread::sleep(Duration::from_millis(200));
            }
            HandlebarsCompiler.compile(name, source)
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<CountingCompiler>, PageCache) {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(CountingCompiler::default());
        let cache = PageCache::new(dir.path(), Arc::clone(&counter) as Arc<dyn PageCompiler>);
        (dir, counter, cache)
    }

    fn rendered(page: &CompiledPage) -> String {
        page.render(&json!({})).unwrap()
    }

    #[test]
    fn test_page_name_mapping() {
        let (dir, _, cache) = setup();
        assert_eq!(cache.page_name(&dir.path().join("docs/intro.page.hbs")).as_deref(), Some("docs/intro"));
        assert_eq!(cache.page_name(&dir.path().join("intro.hbs")), None);
        assert_eq!(cache.page_name(Path::new("/elsewhere/index.page.hbs")), None);
        assert_eq!(cache.page_path("docs/intro"), dir.path().join("docs/intro.page.hbs"));
    }

    #[tokio::test]
    async fn test_resolve_missing_page_is_not_found() {
        let (_dir, _, cache) = setup();
        assert!(matches!(cache.resolve("nope").await, Err(PageError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_compiles_once() {
        let (dir, counter, cache) = setup();
        fs::write(dir.path().join("index.page.hbs"), "slow index").unwrap();
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.resolve("index").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(rendered(&handle.await.unwrap().unwrap()), "slow index");
        }

        assert_eq!(counter.compiles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identical_content_is_a_cache_hit() {
        let (dir, counter, cache) = setup();
        let path = dir.path().join("about.page.hbs");
        fs::write(&path, "about").unwrap();

        let first = cache.resolve("about").await.unwrap();
        assert_eq!(cache.on_changed(&path).as_deref(), Some("about"));
        let second = cache.resolve("about").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.compiles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_superseded_task_never_becomes_ready() {
        let (dir, _, cache) = setup();
        let path = dir.path().join("index.page.hbs");

        fs::write(&path, "slow v1").unwrap();
        cache.on_changed(&path);
        let first = cache.tasks.load().get(&path).cloned().unwrap();

        fs::write(&path, "v2").unwrap();
        cache.on_changed(&path);

        assert_eq!(rendered(&cache.resolve("index").await.unwrap()), "v2");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(matches!(
            first.state(),
            TaskState::Cancelled(CancelReason::Superseded)
        ));
    }

    #[tokio::test]
    async fn test_resolve_is_monotonic_across_edits() {
        let (dir, _, cache) = setup();
        let path = dir.path().join("index.page.hbs");

        for version in ["v1", "v2", "v3"] {
            fs::write(&path, version).unwrap();
            cache.on_changed(&path);
            assert_eq!(rendered(&cache.resolve("index").await.unwrap()), version);
        }
    }

    #[tokio::test]
    async fn test_deleted_page_is_not_found() {
        let (dir, _, cache) = setup();
        let path = dir.path().join("about.page.hbs");
        fs::write(&path, "about").unwrap();
        cache.resolve("about").await.unwrap();

        fs::remove_file(&path).unwrap();
        cache.on_changed(&path);

        assert!(matches!(cache.resolve("about").await, Err(PageError::NotFound(_))));
        assert!(cache.list_compiled_names().is_empty());

        // Recreating the file brings the page back.
        fs::write(&path, "again").unwrap();
        assert_eq!(rendered(&cache.resolve("about").await.unwrap()), "again");
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_found_without_event() {
        let (dir, _, cache) = setup();
        let path = dir.path().join("about.page.hbs");
        fs::write(&path, "about").unwrap();
        cache.resolve("about").await.unwrap();

        fs::remove_file(&path).unwrap();

        assert!(matches!(cache.resolve("about").await, Err(PageError::NotFound(_))));
        assert!(cache.list_compiled_names().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_never_displaces_live_task() {
        let (dir, _, cache) = setup();
        let path = dir.path().join("index.page.hbs");

        fs::write(&path, "v2").unwrap();
        cache.on_changed(&path);
        let live = cache.tasks.load().get(&path).cloned().unwrap();

        // A lookup that read different content than the installed task.
        fs::write(&path, "v1").unwrap();
        let task = cache.install(&path, "index", Origin::Lookup).unwrap();

        assert!(Arc::ptr_eq(&task, &live));
        assert_eq!(rendered(&cache.resolve("index").await.unwrap()), "v2");

        // The change event for that content still goes through.
        cache.on_changed(&path);
        assert_eq!(rendered(&cache.resolve("index").await.unwrap()), "v1");
    }

    #[tokio::test]
    async fn test_failed_compile_serves_previous_page() {
        let (dir, counter, cache) = setup();
        let path = dir.path().join("index.page.hbs");

        fs::write(&path, "good").unwrap();
        cache.on_changed(&path);
        assert_eq!(rendered(&cache.resolve("index").await.unwrap()), "good");

        fs::write(&path, "{{#if}}broken").unwrap();
        cache.on_changed(&path);
        assert_eq!(rendered(&cache.resolve("index").await.unwrap()), "good");

        // Reverting to the last good content reuses it without compiling.
        fs::write(&path, "good").unwrap();
        cache.on_changed(&path);
        assert_eq!(rendered(&cache.resolve("index").await.unwrap()), "good");
        assert_eq!(counter.compiles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_compile_without_fallback() {
        let (dir, _, cache) = setup();
        fs::write(dir.path().join("index.page.hbs"), "{{#each x}}").unwrap();

        assert!(matches!(
            cache.resolve("index").await,
            Err(PageError::CompileFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_compiled_names_sorted() {
        let (dir, _, cache) = setup();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        for name in ["tag", "index", "docs/intro"] {
            fs::write(cache.page_path(name), name).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let names = cache.compile_all();
        assert_eq!(names, ["docs/intro", "index", "tag"]);
        assert_eq!(cache.list_compiled_names(), names);
    }
}
