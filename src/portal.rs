//! Shared state of a running portal: config, compiled pages, routes, catalog.

use crate::{
    catalog::{self, ModelHandle},
    compiler::{HandlebarsCompiler, PageCache, PageCompiler},
    config::SiteConfig,
    error::PageError,
    log,
    route::RouteTable,
};
use anyhow::{Context, Result};
use std::sync::Arc;

pub struct Portal {
    pub config: &'static SiteConfig,
    pub cache: PageCache,
    pub routes: RouteTable,
    pub models: ModelHandle,
}

impl Portal {
    /// Load the catalog and set up an empty page cache.
    pub fn load(config: &'static SiteConfig) -> Result<Self> {
        let models = ModelHandle::load(&config.build.catalog, config.site.clone())
            .context("Failed to load plugin catalog")?;
        catalog::log_report(models.current().report());

        Ok(Self {
            config,
            cache: PageCache::new(&config.build.pages, Arc::new(HandlebarsCompiler) as Arc<dyn PageCompiler>),
            routes: RouteTable::new(),
            models,
        })
    }

    /// Compile every page and mount the ones that succeed.
    ///
    /// Returns the names of pages that failed to compile.
    pub async fn compile_all(&self) -> Vec<String> {
        let names = self.cache.compile_all();
        let mut failed = Vec::new();

        for name in &names {
            match self.cache.resolve(name).await {
                Ok(page) => self.routes.register(&page),
                Err(PageError::CompileFailure { .. }) => failed.push(name.clone()),
                Err(err) => log!("compile"; "{err}"),
            }
        }

        log!(
            "compile";
            "{} pages, {} routes, {} failed",
            names.len(),
            self.routes.templates().len(),
            failed.len()
        );
        failed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use std::{fs, path::Path};

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// A project root with one catalog record and the given pages.
    pub(crate) fn test_site(pages: &[(&str, &str)]) -> (tempfile::TempDir, &'static SiteConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("plugins.d/server/ktor-auth.json"),
            r#"{
                "id": "ktor-auth",
                "title": "Authentication",
                "description": "Auth support",
                "webSite": "https://ktor.io",
                "tags": ["security"],
                "versionsMappings": [{
                    "ktorVersionRange": "[2.0,3.0)",
                    "coordinates": "io.ktor:ktor-server-auth:2.3.12"
                }]
            }"#,
        );
        fs::create_dir_all(root.join("pages")).unwrap();
        for (name, source) in pages {
            write(&root.join(format!("pages/{name}.page.hbs")), source);
        }

        let cli: &'static Cli = Box::leak(Box::new(Cli::parse_from([
            "portal",
            "--root",
            root.to_str().unwrap(),
            "build",
        ])));
        let mut config = SiteConfig::default();
        config.update_with_cli(cli);
        (dir, Box::leak(Box::new(config)))
    }

    #[tokio::test]
    async fn test_compile_all_mounts_and_reports_failures() {
        let (_dir, config) = test_site(&[("index", "home"), ("broken", "{{#each}}")]);
        let portal = Portal::load(config).unwrap();

        assert_eq!(portal.compile_all().await, ["broken"]);
        assert_eq!(portal.routes.templates(), ["/"]);
    }
}
