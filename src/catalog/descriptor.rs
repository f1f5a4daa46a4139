//! Plugin descriptor records as stored in the catalog directory.

use serde::{Deserialize, Serialize};

/// One plugin entry, parsed from a `*.json` file.
///
/// Keys are camelCase on disk (`webSite`, `versionsMappings`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub web_site: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub versions_mappings: Vec<VersionsMapping>,

    #[serde(default)]
    pub deprecated: bool,

    /// Path relative to the catalog root, filled in by the loader.
    #[serde(skip_deserializing, default)]
    pub file_path: String,
}

/// Maps a framework version range to the plugin's Maven coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsMapping {
    pub ktor_version_range: String,
    pub coordinates: String,
}
