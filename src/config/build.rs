//! `[build]` section configuration.
//!
//! Contains the source and output directory layout.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[build]` section in portal.toml - directory layout.
///
/// # Example
/// ```toml
/// [build]
/// pages = "pages"        # *.page.hbs templates
/// catalog = "plugins.d"  # plugin descriptors (*.json)
/// output = "public"      # static site output
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Page templates directory.
    #[serde(default = "defaults::build::pages")]
    #[educe(Default = defaults::build::pages())]
    pub pages: PathBuf,

    /// Plugin catalog directory.
    #[serde(default = "defaults::build::catalog")]
    #[educe(Default = defaults::build::catalog())]
    pub catalog: PathBuf,

    /// Static site output directory. Wiped on every generation.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,
}
