//! Portal configuration management for `portal.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `[site]`    | Values exposed to pages (title)                  |
//! | `[build]`   | Pages, catalog and output directories            |
//! | `[serve]`   | Live server (port, interface, watch, debounce)   |
//!
//! # Example
//!
//! ```toml
//! [site]
//! title = "Ktor plugin portal"
//!
//! [build]
//! pages = "pages"
//! catalog = "plugins.d"
//! output = "public"
//!
//! [serve]
//! port = 8080
//! debounce_ms = 300
//! ```

mod build;
pub mod defaults;
mod error;
mod serve;
mod site;

use build::BuildConfig;
use error::ConfigError;
use serve::ServeConfig;
pub use site::SiteInfo;

use crate::cli::{Cli, Commands};
use anyhow::{Result, bail};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing portal.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// CLI arguments reference
    #[serde(skip)]
    pub cli: Option<&'static Cli>,

    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Values exposed to pages
    #[serde(default)]
    pub site: SiteInfo,

    /// Directory layout
    #[serde(default)]
    pub build: BuildConfig,

    /// Live server settings
    #[serde(default)]
    pub serve: ServeConfig,
}

impl SiteConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: SiteConfig = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf())
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &'static Cli) {
        self.cli = Some(cli);

        let root = cli
            .root
            .as_ref()
            .cloned()
            .unwrap_or_else(|| self.get_root().to_owned());
        self.update_path_with_root(cli, &root);

        if let Commands::Serve {
            interface,
            port,
            watch,
        } = &cli.command
        {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
            Self::update_option(&mut self.serve.watch, watch.as_ref());
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Update all paths relative to root directory and normalize to absolute paths
    fn update_path_with_root(&mut self, cli: &Cli, root: &Path) {
        Self::update_option(&mut self.build.pages, cli.pages.as_ref());
        Self::update_option(&mut self.build.catalog, cli.catalog.as_ref());
        Self::update_option(&mut self.build.output, cli.output.as_ref());

        let root = Self::normalize_path(root);
        self.set_root(&root);

        self.config_path = Self::normalize_path(&root.join(&cli.config));
        self.build.pages = Self::normalize_path(&root.join(&self.build.pages));
        self.build.catalog = Self::normalize_path(&root.join(&self.build.catalog));
        self.build.output = Self::normalize_path(&root.join(&self.build.output));
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// Validate configuration for the current command
    pub fn validate(&self) -> Result<()> {
        if !self.build.catalog.is_dir() {
            bail!(ConfigError::Validation(format!(
                "[build.catalog] `{}` is not a directory",
                self.build.catalog.display()
            )));
        }

        let needs_pages = self.cli.is_none_or(|cli| !cli.is_validate());
        if needs_pages && !self.build.pages.is_dir() {
            bail!(ConfigError::Validation(format!(
                "[build.pages] `{}` is not a directory",
                self.build.pages.display()
            )));
        }

        if self.build.output == self.build.pages || self.build.output == self.build.catalog {
            bail!(ConfigError::Validation(
                "[build.output] must differ from the pages and catalog directories, it is wiped on every generation".into()
            ));
        }

        if self.serve.workers == 0 {
            bail!(ConfigError::Validation(
                "[serve.workers] must be at least 1".into()
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
