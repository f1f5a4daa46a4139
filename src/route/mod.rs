//! Dynamic route table.
//!
//! Grows at runtime as pages compile. One entry per distinct route template;
//! each entry holds the names of the pages that claimed it.
//!
//! ```text
//! GET /plugins/ktor-auth.html
//!        │
//!        ▼
//! ┌───────────────────────────────┐   most literal segments first,
//! │ entries matching the path     │   then mount order
//! └──────────────┬────────────────┘
//!                ▼
//!   members (page-name order) ──► cache.resolve(name)
//!                │
//!                ▼
//!   first page whose current route == entry template
//! ```
//!
//! Entries are never unmounted. A page that moved to another route simply
//! stops being accepted by its old entry.

mod template;

pub use template::{RouteError, RouteTemplate};

use crate::{
    catalog::Parameters,
    compiler::{CompiledPage, PageCache},
    debug,
    error::PageError,
    log,
};
use arc_swap::ArcSwap;
use std::{cmp::Reverse, collections::BTreeSet, sync::Arc};

pub struct RouteEntry {
    template: RouteTemplate,
    members: ArcSwap<BTreeSet<String>>,
}

impl RouteEntry {
    fn new(template: RouteTemplate, first: &str) -> Self {
        Self {
            template,
            members: ArcSwap::from_pointee(BTreeSet::from([first.to_owned()])),
        }
    }

    pub fn members(&self) -> Arc<BTreeSet<String>> {
        self.members.load_full()
    }
}

#[derive(Default)]
pub struct RouteTable {
    entries: ArcSwap<Vec<Arc<RouteEntry>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `page` under its route template. Idempotent per (template, name).
    pub fn register(&self, page: &CompiledPage) {
        let route = page.route();
        let name = page.name();

        loop {
            let current = self.entries.load_full();

            if let Some(entry) = current.iter().find(|e| e.template.as_str() == route.as_str()) {
                let previous = entry.members.rcu(|members| {
                    let mut members = BTreeSet::clone(members);
                    members.insert(name.to_owned());
                    members
                });
                if !previous.contains(name) {
                    let others: Vec<&str> = previous.iter().map(String::as_str).collect();
                    log!("route"; "{route} collision: `{name}` joins {}, first in name order wins", others.join(", "));
                }
                return;
            }

            let mut next = Vec::clone(&current);
            next.push(Arc::new(RouteEntry::new(route.clone(), name)));
            let previous = self.entries.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                debug!("route"; "mounted {route} → {name}");
                return;
            }
        }
    }

    /// Entries whose template matches `path`, best first.
    pub fn candidates(&self, path: &str) -> Vec<(Arc<RouteEntry>, Parameters)> {
        let mut found: Vec<(Arc<RouteEntry>, Parameters)> = self
            .entries
            .load()
            .iter()
            .filter_map(|entry| {
                let params = entry.template.matches(path)?;
                Some((Arc::clone(entry), params))
            })
            .collect();
        // Stable sort keeps mount order among equally specific templates.
        found.sort_by_key(|(entry, _)| Reverse(entry.template.literal_count()));
        found
    }

    /// Find the page serving `path`, with the parameters bound from it.
    pub async fn dispatch(
        &self,
        cache: &PageCache,
        path: &str,
    ) -> Result<(Arc<CompiledPage>, Parameters), PageError> {
        for (entry, params) in self.candidates(path) {
            for name in entry.members().iter() {
                let Ok(page) = cache.resolve(name).await else {
                    continue;
                };
                if page.route().as_str() == entry.template.as_str() {
                    return Ok((page, params));
                }
            }
        }
        Err(PageError::NotFound(path.to_owned()))
    }

    /// Mounted templates in mount order.
    pub fn templates(&self) -> Vec<String> {
        self.entries
            .load()
            .iter()
            .map(|entry| entry.template.as_str().to_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{HandlebarsCompiler, PageCompiler};
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: PageCache,
        routes: RouteTable,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let cache = PageCache::new(dir.path(), Arc::new(HandlebarsCompiler) as Arc<dyn PageCompiler>);
            Self {
                _dir: dir,
                cache,
                routes: RouteTable::new(),
            }
        }

        async fn page(&self, name: &str, source: &str) -> Arc<CompiledPage> {
            let path = self.cache.page_path(name);
            fs::write(&path, source).unwrap();
            self.cache.on_changed(&path);
            let page = self.cache.resolve(name).await.unwrap();
            self.routes.register(&page);
            page
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let fx = Fixture::new();
        let page = fx.page("index", "home").await;
        fx.routes.register(&page);
        fx.routes.register(&page);

        assert_eq!(fx.routes.templates(), ["/"]);
        assert_eq!(fx.routes.candidates("/")[0].0.members().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_binds_parameters() {
        let fx = Fixture::new();
        fx.page("plugin", "{{!-- @location plugin --}}x").await;

        let (page, params) = fx.routes.dispatch(&fx.cache, "/plugins/ktor-auth.html").await.unwrap();
        assert_eq!(page.name(), "plugin");
        assert_eq!(params["pluginId"], "ktor-auth");

        assert!(matches!(
            fx.routes.dispatch(&fx.cache, "/plugins/ktor-auth").await,
            Err(PageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_literal_route_beats_parameterized() {
        let fx = Fixture::new();
        fx.page("plugin", "{{!-- @location plugin --}}x").await;
        fx.page("all", "{{!-- @route /plugins/all.html --}}x").await;

        let (page, params) = fx.routes.dispatch(&fx.cache, "/plugins/all.html").await.unwrap();
        assert_eq!(page.name(), "all");
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn test_moved_page_leaves_old_entry() {
        let fx = Fixture::new();
        fx.page("about", "v1").await;
        assert!(fx.routes.dispatch(&fx.cache, "/about.html").await.is_ok());

        fx.page("about", "{{!-- @route /team.html --}}v2").await;

        assert!(fx.routes.dispatch(&fx.cache, "/about.html").await.is_err());
        let (page, _) = fx.routes.dispatch(&fx.cache, "/team.html").await.unwrap();
        assert_eq!(page.name(), "about");
        assert_eq!(fx.routes.templates(), ["/about.html", "/team.html"]);
    }

    #[tokio::test]
    async fn test_collision_resolved_by_page_name() {
        let fx = Fixture::new();
        fx.page("zeta", "{{!-- @route /same.html --}}z").await;
        fx.page("alpha", "{{!-- @route /same.html --}}a").await;

        let (page, _) = fx.routes.dispatch(&fx.cache, "/same.html").await.unwrap();
        assert_eq!(page.name(), "alpha");
    }

    #[tokio::test]
    async fn test_deleted_member_is_skipped() {
        let fx = Fixture::new();
        fx.page("zeta", "{{!-- @route /same.html --}}z").await;
        fx.page("alpha", "{{!-- @route /same.html --}}a").await;

        let alpha = fx.cache.page_path("alpha");
        fs::remove_file(&alpha).unwrap();
        fx.cache.on_changed(&alpha);

        let (page, _) = fx.routes.dispatch(&fx.cache, "/same.html").await.unwrap();
        assert_eq!(page.name(), "zeta");
    }
}
