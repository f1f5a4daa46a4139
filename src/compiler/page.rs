//! Page source → [`CompiledPage`].
//!
//! A page is a Handlebars template. Leading comments carry directives:
//!
//! ```text
//! {{!-- @location plugin --}}
//! {{!-- @route /plugins/{pluginId}.html --}}
//! <h1>{{location.title}}</h1>
//! ```

use crate::route::{RouteError, RouteTemplate};
use handlebars::Handlebars;
use serde_json::Value;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown directive `@{0}`")]
    UnknownDirective(String),

    #[error("directive `@{0}` declared twice")]
    DuplicateDirective(String),

    #[error("unknown location kind `{0}`, expected `plugin` or `tag`")]
    UnknownLocation(String),

    #[error("location `{kind}` needs parameter `{param}` in route `{route}`")]
    LocationParam {
        kind: LocationKind,
        param: &'static str,
        route: String,
    },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("template error: {0}")]
    Template(String),
}

// ============================================================================
// Location
// ============================================================================

/// Typed location a page is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// One plugin record, bound by `pluginId`.
    Plugin,
    /// One tag group, bound by `tag`.
    Tag,
}

impl LocationKind {
    /// Parameter carrying the location key.
    pub const fn param(self) -> &'static str {
        match self {
            Self::Plugin => "pluginId",
            Self::Tag => "tag",
        }
    }

    pub const fn default_route(self) -> &'static str {
        match self {
            Self::Plugin => "/plugins/{pluginId}.html",
            Self::Tag => "/plugins/tag/{tag}.html",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Tag => "tag",
        }
    }
}

impl FromStr for LocationKind {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plugin" => Ok(Self::Plugin),
            "tag" => Ok(Self::Tag),
            other => Err(CompileError::UnknownLocation(other.to_owned())),
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Compiled Page
// ============================================================================

/// Executable entry point: full render context in, markup out.
pub type RenderFn = Box<dyn Fn(&Value) -> Result<String, String> + Send + Sync>;

/// A ready-to-invoke page. Immutable once published.
pub struct CompiledPage {
    name: String,
    route: RouteTemplate,
    params: Vec<String>,
    location: Option<LocationKind>,
    entry: RenderFn,
}

impl CompiledPage {
    pub fn new(
        name: impl Into<String>,
        route: RouteTemplate,
        location: Option<LocationKind>,
        entry: RenderFn,
    ) -> Self {
        Self {
            name: name.into(),
            params: route.param_names(),
            route,
            location,
            entry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> &RouteTemplate {
        &self.route
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn location(&self) -> Option<LocationKind> {
        self.location
    }

    pub fn render(&self, context: &Value) -> Result<String, String> {
        (self.entry)(context)
    }
}

impl fmt::Debug for CompiledPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPage")
            .field("name", &self.name)
            .field("route", &self.route.as_str())
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Turns page source into a [`CompiledPage`].
pub trait PageCompiler: Send + Sync + 'static {
    fn compile(&self, name: &str, source: &str) -> Result<CompiledPage, CompileError>;
}

/// Compiles pages into strict-mode Handlebars templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandlebarsCompiler;

impl PageCompiler for HandlebarsCompiler {
    fn compile(&self, name: &str, source: &str) -> Result<CompiledPage, CompileError> {
        let directives = Directives::parse(source)?;
        let route = directives.route(name)?;

        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(name, source)
            .map_err(|err| CompileError::Template(err.to_string()))?;

        let registry = Arc::new(registry);
        let template = name.to_owned();
        let entry: RenderFn = Box::new(move |context: &Value| {
            registry
                .render(&template, context)
                .map_err(|err| err.to_string())
        });

        Ok(CompiledPage::new(name, route, directives.location, entry))
    }
}

// ============================================================================
// Directives
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct Directives {
    route: Option<String>,
    location: Option<LocationKind>,
}

impl Directives {
    /// Scan leading `{{!-- ... --}}` comments. Comments whose body does not
    /// start with `@` are skipped; the first non-comment content ends the scan.
    fn parse(source: &str) -> Result<Self, CompileError> {
        let mut directives = Self::default();
        let mut rest = source;

        loop {
            rest = rest.trim_start();
            let Some(after_open) = rest.strip_prefix("{{!--") else {
                break;
            };
            let Some(close) = after_open.find("--}}") else {
                break;
            };
            let body = after_open[..close].trim();
            rest = &after_open[close + 4..];

            let Some(directive) = body.strip_prefix('@') else {
                continue;
            };
            let (key, value) = directive
                .split_once(char::is_whitespace)
                .map_or((directive, ""), |(k, v)| (k, v.trim()));

            match key {
                "route" => {
                    if directives.route.replace(value.to_owned()).is_some() {
                        return Err(CompileError::DuplicateDirective(key.to_owned()));
                    }
                }
                "location" => {
                    let kind = value.parse()?;
                    if directives.location.replace(kind).is_some() {
                        return Err(CompileError::DuplicateDirective(key.to_owned()));
                    }
                }
                other => return Err(CompileError::UnknownDirective(other.to_owned())),
            }
        }

        Ok(directives)
    }

    /// Explicit `@route`, else the location default, else `/` for `index`,
    /// else `/<name>.html`.
    fn route(&self, name: &str) -> Result<RouteTemplate, CompileError> {
        let source = match (&self.route, self.location) {
            (Some(route), _) => route.clone(),
            (None, Some(kind)) => kind.default_route().to_owned(),
            (None, None) if name == "index" => "/".to_owned(),
            (None, None) => format!("/{name}.html"),
        };
        let route = RouteTemplate::parse(&source)?;

        if let Some(kind) = self.location
            && !route.param_names().iter().any(|p| p == kind.param())
        {
            return Err(CompileError::LocationParam {
                kind,
                param: kind.param(),
                route: source,
            });
        }
        Ok(route)
    }
}
