//! The currently published catalog, with atomic reload support.
//!
//! Uses `arc-swap` for lock-free reads and atomic replacement, so page renders
//! never wait on a reload.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 ModelHandle (ArcSwap)                    │
//! │                                                          │
//! │   HTTP worker      HTTP worker      catalog watcher      │
//! │       │                │                   │             │
//! │       ▼                ▼                   ▼             │
//! │    current()        current()          reload()          │
//! │   (lock-free)      (lock-free)     (atomic replace)      │
//! └──────────────────────────────────────────────────────────┘
//! ```

use super::{CatalogError, CatalogModel, Model, collect_descriptor_paths, load_model};
use crate::config::SiteInfo;
use arc_swap::ArcSwap;
use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub struct ModelHandle {
    current: ArcSwap<CatalogModel>,
    site: SiteInfo,
    /// Hash of the catalog files behind `current`.
    content_hash: AtomicU64,
}

impl ModelHandle {
    /// Load the catalog once and publish it.
    pub fn load(dir: &Path, site: SiteInfo) -> Result<Self, CatalogError> {
        let hash = hash_catalog(dir)?;
        let model = load_model(dir, &site)?;
        Ok(Self {
            current: ArcSwap::from_pointee(model),
            site,
            content_hash: AtomicU64::new(hash),
        })
    }

    #[cfg(test)]
    pub fn from_model(model: Arc<CatalogModel>) -> Self {
        Self {
            current: ArcSwap::new(model),
            site: SiteInfo::default(),
            content_hash: AtomicU64::new(0),
        }
    }

    /// Current snapshot. Wait-free; the returned `Arc` stays valid across reloads.
    #[inline]
    pub fn current(&self) -> Arc<CatalogModel> {
        self.current.load_full()
    }

    /// Current snapshot without request parameters.
    pub fn model(&self) -> Model {
        Model::new(self.current())
    }

    /// Re-read the catalog directory and publish a new snapshot.
    ///
    /// Returns `false` when the files are byte-identical to the published ones.
    /// On error the previous snapshot stays published.
    pub fn reload(&self, dir: &Path) -> Result<bool, CatalogError> {
        let hash = hash_catalog(dir)?;
        if hash == self.content_hash.load(Ordering::Acquire) {
            return Ok(false);
        }

        let model = load_model(dir, &self.site)?;
        self.current.store(Arc::new(model));
        self.content_hash.store(hash, Ordering::Release);
        Ok(true)
    }
}

/// Content hash over every descriptor path and its bytes.
fn hash_catalog(dir: &Path) -> Result<u64, CatalogError> {
    let mut hasher = blake3::Hasher::new();
    for path in collect_descriptor_paths(dir)? {
        let bytes = fs::read(&path).map_err(|err| CatalogError::Io(path.clone(), err))?;
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    Ok(u64::from_le_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLUGIN: &str = r#"{ "id": "ktor-auth", "title": "Authentication", "tags": ["security"] }"#;

    #[test]
    fn test_reload_skips_unchanged_catalog() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("auth.json"), PLUGIN).unwrap();

        let handle = ModelHandle::load(dir.path(), SiteInfo::default()).unwrap();
        let before = handle.current();

        assert!(!handle.reload(dir.path()).unwrap());
        assert!(Arc::ptr_eq(&before, &handle.current()));
    }

    #[test]
    fn test_reload_publishes_new_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("auth.json"), PLUGIN).unwrap();
        let handle = ModelHandle::load(dir.path(), SiteInfo::default()).unwrap();
        let before = handle.current();

        fs::write(
            dir.path().join("gson.json"),
            r#"{ "id": "ktor-gson", "title": "Gson", "tags": ["json"] }"#,
        )
        .unwrap();

        assert!(handle.reload(dir.path()).unwrap());
        assert_eq!(handle.current().plugins().len(), 2);
        // Holders of the old snapshot are unaffected.
        assert_eq!(before.plugins().len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("auth.json"), PLUGIN).unwrap();
        let handle = ModelHandle::load(dir.path(), SiteInfo::default()).unwrap();

        fs::write(dir.path().join("broken.json"), "{").unwrap();

        assert!(handle.reload(dir.path()).is_err());
        assert_eq!(handle.current().plugins().len(), 1);
    }
}
