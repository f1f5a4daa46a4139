//! Immutable catalog snapshot and the per-request model built on top of it.

use super::descriptor::PluginDescriptor;
use super::validate::{Issue, ValidationReport};
use crate::config::SiteInfo;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value, json};
use std::{collections::BTreeMap, sync::Arc};

/// Request parameter bindings, name → value.
pub type Parameters = BTreeMap<String, String>;

/// One published catalog: records plus the indexes derived from them.
///
/// Never mutated after construction, so any number of renders can read it
/// concurrently.
#[derive(Debug)]
pub struct CatalogModel {
    plugins: Vec<PluginDescriptor>,
    by_id: FxHashMap<String, usize>,
    tags: BTreeMap<String, Vec<usize>>,
    report: ValidationReport,
    /// Template context shared by every render of this snapshot.
    context: Map<String, Value>,
}

impl CatalogModel {
    pub fn new(plugins: Vec<PluginDescriptor>, report: ValidationReport, site: &SiteInfo) -> Self {
        // Later records win, matching lookups by id on the rendered pages.
        let by_id = plugins
            .iter()
            .enumerate()
            .map(|(index, plugin)| (plugin.id.clone(), index))
            .collect();

        let mut tags: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, plugin) in plugins.iter().enumerate() {
            for tag in &plugin.tags {
                let members = tags.entry(tag.clone()).or_default();
                if members.last() != Some(&index) {
                    members.push(index);
                }
            }
        }

        let mut model = Self {
            plugins,
            by_id,
            tags,
            report,
            context: Map::new(),
        };
        model.context = model.build_context(site);
        model
    }

    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// The first record is featured on the index page.
    pub fn featured(&self) -> &[PluginDescriptor] {
        &self.plugins[..self.plugins.len().min(1)]
    }

    pub fn plugin(&self, id: &str) -> Option<&PluginDescriptor> {
        self.by_id.get(id).map(|&index| &self.plugins[index])
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn tagged(&self, tag: &str) -> Vec<&PluginDescriptor> {
        self.tags
            .get(tag)
            .map(|members| members.iter().map(|&i| &self.plugins[i]).collect())
            .unwrap_or_default()
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    fn build_context(&self, site: &SiteInfo) -> Map<String, Value> {
        let by_id: Map<String, Value> = self
            .by_id
            .iter()
            .map(|(id, &index)| (id.clone(), json!(self.plugins[index])))
            .collect();

        let tags: Map<String, Value> = self
            .tags
            .keys()
            .map(|tag| (tag.clone(), json!(self.tagged(tag))))
            .collect();

        let statuses: Vec<Value> = self
            .plugins
            .iter()
            .map(|plugin| {
                json!({
                    "id": plugin.id,
                    "title": plugin.title,
                    "webSite": plugin.web_site,
                    "status": self.report.status(plugin),
                })
            })
            .collect();

        let mut context = Map::new();
        context.insert("plugins".into(), json!(self.plugins));
        context.insert("featured".into(), json!(self.featured()));
        context.insert("byId".into(), Value::Object(by_id));
        context.insert("tags".into(), Value::Object(tags));
        context.insert(
            "validation".into(),
            json!({
                "errors": issues_json(self.report.errors()),
                "warnings": issues_json(self.report.warnings()),
                "count": self.report.issues().len(),
                "hasErrors": self.report.has_errors(),
                "hasWarnings": self.report.warnings().next().is_some(),
                "hasIssues": self.report.has_issues(),
                "plugins": statuses,
            }),
        );
        context.insert(
            "site".into(),
            json!({
                "title": site.title,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
        context
    }
}

fn issues_json<'a>(issues: impl Iterator<Item = &'a Issue>) -> Vec<Value> {
    issues.map(|issue| json!(issue)).collect()
}

/// The catalog snapshot paired with one request's parameter bindings.
#[derive(Debug, Clone)]
pub struct Model {
    catalog: Arc<CatalogModel>,
    params: Parameters,
}

impl Model {
    pub fn new(catalog: Arc<CatalogModel>) -> Self {
        Self {
            catalog,
            params: Parameters::new(),
        }
    }

    pub fn with_params(&self, params: Parameters) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            params,
        }
    }

    pub fn catalog(&self) -> &CatalogModel {
        &self.catalog
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }
}
