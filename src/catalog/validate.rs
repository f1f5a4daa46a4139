//! Rule-based checks over the loaded plugin records.
//!
//! Validation never fails the load: every finding is collected into a
//! [`ValidationReport`] as an error or a warning, and the portal keeps
//! serving a catalog with errors (the dev page shows them).

use super::descriptor::{PluginDescriptor, VersionsMapping};
use regex::Regex;
use serde::Serialize;
use std::{collections::BTreeMap, sync::LazyLock};
use url::Url;

static PLUGIN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.:+*-]*$").unwrap());

static MAVEN_COORDINATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_.-]+:[a-zA-Z_.-]+:[\[(]?[0-9a-zA-Z_,.-]*[\])+]?$").unwrap()
});

const RESERVED_IDS: &[&str] = &["example"];

/// A single finding attached to a plugin record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub plugin_id: String,
    pub file_path: String,
    pub text: String,
    pub is_error: bool,
}

/// All findings of one validation pass, in discovery order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|issue| issue.is_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|issue| !issue.is_error)
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|issue| issue.is_error)
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Worst finding for one record: `"errors"`, `"warnings"` or `""`.
    pub fn status(&self, plugin: &PluginDescriptor) -> &'static str {
        let mut status = "";
        for issue in self
            .issues
            .iter()
            .filter(|issue| issue.plugin_id == plugin.id && issue.file_path == plugin.file_path)
        {
            if issue.is_error {
                return "errors";
            }
            status = "warnings";
        }
        status
    }

    fn push(&mut self, plugin: &PluginDescriptor, text: impl Into<String>, is_error: bool) {
        self.issues.push(Issue {
            plugin_id: plugin.id.clone(),
            file_path: plugin.file_path.clone(),
            text: text.into(),
            is_error,
        });
    }

    fn error(&mut self, plugin: &PluginDescriptor, text: impl Into<String>) {
        self.push(plugin, text, true);
    }

    fn warning(&mut self, plugin: &PluginDescriptor, text: impl Into<String>) {
        self.push(plugin, text, false);
    }
}

/// Run every rule over `plugins`.
pub fn validate(plugins: &[PluginDescriptor]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for plugin in plugins {
        validate_plugin(plugin, &mut report);
    }
    validate_duplicates(plugins, &mut report);

    report
}

fn validate_plugin(plugin: &PluginDescriptor, report: &mut ValidationReport) {
    validate_id(plugin, report);
    validate_title(plugin, report);
    validate_description(plugin, report);
    validate_web_site(plugin, report);
    validate_tags(plugin, report);

    for mapping in &plugin.versions_mappings {
        validate_mapping(plugin, mapping, report);
    }
    if plugin.versions_mappings.is_empty() {
        report.error(plugin, "No version mappings provided.");
    }
}

fn validate_duplicates(plugins: &[PluginDescriptor], report: &mut ValidationReport) {
    let group_by = |key: fn(&PluginDescriptor) -> String| {
        let mut groups: BTreeMap<String, Vec<&PluginDescriptor>> = BTreeMap::new();
        for plugin in plugins {
            groups.entry(key(plugin)).or_default().push(plugin);
        }
        groups.into_values().filter(|group| group.len() > 1)
    };

    let duplicates: Vec<_> = group_by(|p| p.id.to_lowercase())
        .chain(group_by(|p| p.title.trim().to_lowercase()))
        .collect();

    for group in duplicates {
        let ids: Vec<_> = group.iter().map(|p| p.id.as_str()).collect();
        report.error(group[0], format!("Found duplicate plugins: {}", ids.join(", ")));
    }
}

fn validate_id(plugin: &PluginDescriptor, report: &mut ValidationReport) {
    let id = plugin.id.as_str();
    if id.is_empty() {
        report.error(plugin, "id should be at least 4 characters long.");
        return;
    }

    if id.chars().count() < 4 {
        report.error(plugin, format!("id '{id}' is too short: at least 4 required"));
    }

    if !PLUGIN_ID.is_match(id) {
        report.error(
            plugin,
            format!(
                "id '{id}' is not valid. Only latin letters, digits and the following characters are allowed: _ . : + * -."
            ),
        );
    }

    if RESERVED_IDS.contains(&id) && plugin.file_path != format!("{id}.json") {
        report.error(plugin, format!("id {id} is reserved."));
    }
}

fn validate_title(plugin: &PluginDescriptor, report: &mut ValidationReport) {
    let title = plugin.title.as_str();
    if title.trim().is_empty() {
        report.error(plugin, "title shouldn't be blank.");
        return;
    }

    if title.trim() != title {
        report.warning(plugin, "title contains leading or trailing whitespaces.");
    }

    let length = title.trim().chars().count();
    if length > 30 {
        report.error(plugin, "title is too long: at most 30 characters allowed.");
    }
    if length < 4 {
        report.error(plugin, "title is too short: at least 4 characters required.");
    }

    if title.chars().any(|c| c < ' ') {
        report.error(plugin, "Control characters in title are not allowed.");
    }
}

fn validate_description(plugin: &PluginDescriptor, report: &mut ValidationReport) {
    let description = plugin.description.as_str();
    if description.trim() != description {
        report.warning(plugin, "description contains leading or trailing whitespaces.");
    }

    if description.chars().any(|c| c < ' ' && c != '\n' && c != '\r') {
        report.error(
            plugin,
            "Control characters in description are not allowed except for line feed.",
        );
    }
}

fn validate_web_site(plugin: &PluginDescriptor, report: &mut ValidationReport) {
    let web_site = plugin.web_site.trim();
    if web_site != plugin.web_site {
        report.warning(plugin, "webSite contains leading or trailing whitespaces.");
    }

    if web_site.contains(':') {
        if !web_site.starts_with("https://") {
            report.error(plugin, "Website should use https.");
        }
    } else {
        report.warning(
            plugin,
            "webSite url should contain explicit https protocol specification.",
        );
    }

    let url = match Url::parse(web_site) {
        Ok(url) => url,
        Err(err) => {
            report.error(plugin, format!("webSite url is not valid: {err}"));
            return;
        }
    };

    if url.query().is_some_and(|query| !query.is_empty()) {
        report.warning(plugin, "webSite query parameters are not recommended.");
    }

    if url.host_str().is_none_or(str::is_empty) {
        report.error(plugin, "webSite host is not valid: no host");
    }

    if !url.username().is_empty() || url.password().is_some() {
        report.error(plugin, "webSite should have no user:pass specification.");
    }
}

fn validate_tags(plugin: &PluginDescriptor, report: &mut ValidationReport) {
    if plugin.tags.is_empty() {
        report.error(plugin, format!("No tags specified for plugin {}", plugin.id));
    }

    for tag in &plugin.tags {
        if tag.trim() != tag {
            report.error(plugin, format!("Trailing or leading spaces in tag '{tag}'"));
        }

        if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            report.error(
                plugin,
                format!("Only latin letters, digits and minus sign are allowed in tag, got tag '{tag}'"),
            );
        }
    }
}

fn validate_mapping(
    plugin: &PluginDescriptor,
    mapping: &VersionsMapping,
    report: &mut ValidationReport,
) {
    let coordinates = mapping.coordinates.trim();
    if coordinates != mapping.coordinates {
        report.warning(
            plugin,
            format!(
                "Maven coordinates '{}' should have no trailing or leading spaces.",
                mapping.coordinates
            ),
        );
    }

    if !MAVEN_COORDINATES.is_match(coordinates) {
        report.error(plugin, format!("Maven coordinates are illegal: '{coordinates}'"));
        return;
    }

    // The grammar above guarantees exactly three parts.
    let version = coordinates.splitn(3, ':').nth(2).unwrap_or_default();

    let is_range_start = |c: char| c == '[' || c == '(';
    let is_range_end = |c: char| c == ']' || c == ')';
    let starts_range = version.starts_with(is_range_start);
    let ends_range = version.ends_with(is_range_end);

    if starts_range || ends_range {
        if !starts_range || !ends_range {
            report.error(plugin, format!("Maven version has illegal range: '{version}'"));
        }
        if version.matches(',').count() != 1 {
            report.error(plugin, "Maven range version should have a single comma.");
        }

        let inner_start = if starts_range { &version[1..] } else { version };
        let inner_end = if ends_range {
            &version[..version.len() - 1]
        } else {
            version
        };
        let range_start = inner_start.split(',').next().unwrap_or_default();
        let range_end = inner_end.split_once(',').map_or(inner_end, |(_, end)| end);

        validate_version(plugin, range_start, true, report);
        validate_version(plugin, range_end, true, report);
    } else if let Some(base) = version.strip_suffix('+') {
        validate_version(plugin, base, true, report);
    } else {
        validate_version(plugin, version, false, report);
    }
}

fn validate_version(
    plugin: &PluginDescriptor,
    version: &str,
    allow_empty: bool,
    report: &mut ValidationReport,
) {
    if version.is_empty() {
        if !allow_empty {
            report.error(plugin, "Empty version");
        }
        return;
    }

    if version.split(['-', '_']).any(str::is_empty) {
        report.warning(plugin, format!("Empty version component in '{version}'"));
    }
}
