//! Data providers: which parameter tuples a page is generated for.

use crate::{
    catalog::{CatalogModel, Parameters},
    compiler::{CompiledPage, LocationKind},
    debug,
};
use rustc_hash::FxHashMap;

/// Enumerates parameter tuples for one page.
pub type Provider = fn(&CatalogModel) -> Vec<Parameters>;

pub struct Providers {
    by_page: FxHashMap<String, Provider>,
}

impl Default for Providers {
    fn default() -> Self {
        let mut providers = Self::empty();
        providers.insert("plugin", plugin_ids);
        providers.insert("tag", tag_names);
        providers
    }
}

impl Providers {
    pub fn empty() -> Self {
        Self {
            by_page: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, page: &str, provider: Provider) {
        self.by_page.insert(page.to_owned(), provider);
    }

    /// Parameter tuples for `page`.
    ///
    /// Parameterless pages get exactly one empty tuple. Otherwise the provider
    /// registered under the page name is used, then the one implied by the
    /// page's location kind. A parameterized page without either gets none.
    pub fn provide(&self, page: &CompiledPage, catalog: &CatalogModel) -> Vec<Parameters> {
        if page.params().is_empty() {
            return vec![Parameters::new()];
        }

        let provider = self
            .by_page
            .get(page.name())
            .copied()
            .or_else(|| page.location().map(location_provider));

        match provider {
            Some(provider) => provider(catalog),
            None => {
                debug!("generate"; "{}: no data provider, skipped", page.name());
                Vec::new()
            }
        }
    }
}

const fn location_provider(kind: LocationKind) -> Provider {
    match kind {
        LocationKind::Plugin => plugin_ids,
        LocationKind::Tag => tag_names,
    }
}

fn single(key: &str, value: &str) -> Parameters {
    Parameters::from([(key.to_owned(), value.to_owned())])
}

fn plugin_ids(catalog: &CatalogModel) -> Vec<Parameters> {
    catalog
        .plugins()
        .iter()
        .map(|plugin| single(LocationKind::Plugin.param(), &plugin.id))
        .collect()
}

fn tag_names(catalog: &CatalogModel) -> Vec<Parameters> {
    catalog
        .tag_names()
        .map(|tag| single(LocationKind::Tag.param(), tag))
        .collect()
}
