//! Plugin catalog: loading, validation and the published model.
//!
//! The catalog is a flat directory of `*.json` plugin descriptors. Loading is
//! a pure, synchronous transform:
//!
//! ```text
//! plugins.d/**/*.json ──► parse ──► validate ──► CatalogModel ──► ModelHandle
//!                                      │                              │
//!                                      ▼                              ▼
//!                               ValidationReport              lock-free reads
//! ```

mod descriptor;
mod handle;
mod model;
mod validate;

pub use descriptor::PluginDescriptor;
pub use handle::ModelHandle;
pub use model::{CatalogModel, Model, Parameters};
pub use validate::{ValidationReport, validate};

#[cfg(test)]
pub(crate) use model::tests::{descriptor as test_descriptor, sample_catalog};

use crate::{config::SiteInfo, log};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog entry `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to walk catalog directory")]
    Walk(#[from] walkdir::Error),

    #[error("malformed plugin descriptor `{0}`")]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Whether a path is a catalog entry.
pub fn is_descriptor(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json") && !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Collect descriptor file paths under `dir`, sorted, skipping hidden entries.
pub fn collect_descriptor_paths(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let mut paths = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()));

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && is_descriptor(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Read every descriptor under `dir` and validate the result.
pub fn load(dir: &Path) -> Result<(Vec<PluginDescriptor>, ValidationReport), CatalogError> {
    let mut plugins = Vec::new();

    for path in collect_descriptor_paths(dir)? {
        let content = fs::read_to_string(&path).map_err(|err| CatalogError::Io(path.clone(), err))?;
        let mut plugin: PluginDescriptor =
            serde_json::from_str(&content).map_err(|err| CatalogError::Parse(path.clone(), err))?;
        plugin.file_path = relative_path(&path, dir);
        plugins.push(plugin);
    }

    let report = validate(&plugins);
    Ok((plugins, report))
}

/// Load and build the model in one step.
pub fn load_model(dir: &Path, site: &SiteInfo) -> Result<CatalogModel, CatalogError> {
    let (plugins, report) = load(dir)?;
    Ok(CatalogModel::new(plugins, report, site))
}

/// Print every validation issue and a summary line.
pub fn log_report(report: &ValidationReport) {
    for issue in report.issues() {
        let level = if issue.is_error { "error" } else { "warning" };
        log!("catalog"; "{level}: {} ({}): {}", issue.plugin_id, issue.file_path, issue.text);
    }
    log!(
        "catalog";
        "{} errors, {} warnings",
        report.errors().count(),
        report.warnings().count()
    );
}

/// `/root/plugins.d/server/auth.json` → `server/auth.json`, always with `/`.
fn relative_path(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const AUTH: &str = r#"{
        "id": "ktor-auth", "title": "Authentication", "webSite": "https://ktor.io",
        "tags": ["security"],
        "versionsMappings": [{ "ktorVersionRange": "1.0+", "coordinates": "io.ktor:ktor-auth:1.0" }]
    }"#;

    #[test]
    fn test_load_walks_recursively_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("server")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("server/auth.json"), AUTH).unwrap();
        fs::write(dir.path().join(".git/config.json"), "not json").unwrap();
        fs::write(dir.path().join(".draft.json"), "not json").unwrap();
        fs::write(dir.path().join("README.md"), "# plugins").unwrap();

        let (plugins, report) = load(dir.path()).unwrap();

        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].file_path, "server/auth.json");
        assert!(!report.has_errors(), "{:?}", report.issues());
    }

    #[test]
    fn test_load_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ \"id\": ").unwrap();

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse(..)));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_load_model_builds_indexes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("auth.json"), AUTH).unwrap();

        let model = load_model(dir.path(), &SiteInfo::default()).unwrap();
        assert!(model.plugin("ktor-auth").is_some());
        assert_eq!(model.tag_names().collect::<Vec<_>>(), ["security"]);
    }

    #[test]
    fn test_is_descriptor() {
        assert!(is_descriptor(Path::new("/x/auth.json")));
        assert!(!is_descriptor(Path::new("/x/.auth.json")));
        assert!(!is_descriptor(Path::new("/x/auth.json.swp")));
    }
}
