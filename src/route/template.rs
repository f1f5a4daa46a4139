//! Route-path templates: `/plugins/tag/{tag}.html`.
//!
//! A template is a `/`-separated list of segments. A segment is either a
//! literal or holds exactly one `{param}` placeholder, optionally surrounded
//! by literal text (`{pluginId}.html`).
//!
//! | Placeholder   | Meaning                                         |
//! |---------------|-------------------------------------------------|
//! | `{name}`      | required, one path segment                      |
//! | `{name?}`     | optional, last segment only                     |
//! | `{name...}`   | tailcard, rest of the path, last segment only   |

use crate::catalog::Parameters;
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route `{0}` must start with `/`")]
    NotAbsolute(String),

    #[error("route `{0}` has an empty segment")]
    EmptySegment(String),

    #[error("route `{route}`: malformed placeholder in `{segment}`")]
    Placeholder { route: String, segment: String },

    #[error("route `{route}`: `{name}` must be the last segment")]
    NotLast { route: String, name: String },

    #[error("route `{route}`: parameter `{name}` declared twice")]
    Duplicate { route: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Required,
    Optional,
    Tailcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param {
        prefix: String,
        name: String,
        suffix: String,
        arity: Arity,
    },
}

/// Parsed route-path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    source: String,
    segments: SmallVec<[Segment; 4]>,
}

impl RouteTemplate {
    pub fn parse(source: &str) -> Result<Self, RouteError> {
        let Some(body) = source.strip_prefix('/') else {
            return Err(RouteError::NotAbsolute(source.to_owned()));
        };

        let mut segments = SmallVec::new();
        let mut seen: Vec<String> = Vec::new();
        let parts: Vec<&str> = if body.is_empty() {
            Vec::new()
        } else {
            body.split('/').collect()
        };

        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err(RouteError::EmptySegment(source.to_owned()));
            }
            let segment = parse_segment(source, part)?;
            if let Segment::Param { name, arity, .. } = &segment {
                if *arity != Arity::Required && index + 1 != parts.len() {
                    return Err(RouteError::NotLast {
                        route: source.to_owned(),
                        name: name.clone(),
                    });
                }
                if seen.contains(name) {
                    return Err(RouteError::Duplicate {
                        route: source.to_owned(),
                        name: name.clone(),
                    });
                }
                seen.push(name.clone());
            }
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param { name, .. } => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Number of fully literal segments, used to rank overlapping routes.
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count()
    }

    /// Match a decoded request path, returning the bound parameters.
    pub fn matches(&self, path: &str) -> Option<Parameters> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let parts: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };

        let mut params = Parameters::new();
        let mut index = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                    index += 1;
                }
                Segment::Param {
                    prefix,
                    name,
                    suffix,
                    arity,
                } => {
                    let raw = match arity {
                        Arity::Tailcard if index < parts.len() => parts[index..].join("/"),
                        Arity::Tailcard | Arity::Optional if index >= parts.len() => {
                            return Some(params);
                        }
                        _ => parts.get(index)?.to_string(),
                    };
                    let value = raw.strip_prefix(prefix.as_str())?.strip_suffix(suffix.as_str())?;
                    if value.is_empty() && *arity == Arity::Required {
                        return None;
                    }
                    params.insert(name.clone(), value.to_owned());
                    index = if *arity == Arity::Tailcard {
                        parts.len()
                    } else {
                        index + 1
                    };
                }
            }
        }

        (index == parts.len()).then_some(params)
    }

    /// Build a concrete path from parameter values.
    ///
    /// Returns `None` when a required value is missing, or when a value would
    /// escape its segment (`/` outside a tailcard, `.` or `..` components).
    pub fn substitute(&self, params: &Parameters) -> Option<String> {
        let mut parts: Vec<String> = Vec::with_capacity(self.segments.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => parts.push(literal.clone()),
                Segment::Param {
                    prefix,
                    name,
                    suffix,
                    arity,
                } => {
                    let value = match (params.get(name), arity) {
                        (Some(value), _) if !value.is_empty() => value,
                        (_, Arity::Required) => return None,
                        _ => break,
                    };
                    let safe = value
                        .split('/')
                        .all(|component| !matches!(component, "" | "." | ".."));
                    if !safe || (*arity != Arity::Tailcard && value.contains('/')) {
                        return None;
                    }
                    parts.push(format!("{prefix}{value}{suffix}"));
                }
            }
        }

        Some(format!("/{}", parts.join("/")))
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segment(route: &str, part: &str) -> Result<Segment, RouteError> {
    let malformed = || RouteError::Placeholder {
        route: route.to_owned(),
        segment: part.to_owned(),
    };

    let Some(open) = part.find('{') else {
        if part.contains('}') {
            return Err(malformed());
        }
        return Ok(Segment::Literal(part.to_owned()));
    };
    let close = part.find('}').ok_or_else(malformed)?;
    if close < open || part[close + 1..].contains(['{', '}']) {
        return Err(malformed());
    }

    let inner = &part[open + 1..close];
    let (name, arity) = if let Some(name) = inner.strip_suffix("...") {
        (name, Arity::Tailcard)
    } else if let Some(name) = inner.strip_suffix('?') {
        (name, Arity::Optional)
    } else {
        (inner, Arity::Required)
    };

    let valid_name = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(malformed());
    }

    Ok(Segment::Param {
        prefix: part[..open].to_owned(),
        name: name.to_owned(),
        suffix: part[close + 1..].to_owned(),
        arity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_root_and_literals() {
        let root = RouteTemplate::parse("/").unwrap();
        assert!(root.param_names().is_empty());
        assert_eq!(root.matches("/"), Some(Parameters::new()));
        assert_eq!(root.substitute(&Parameters::new()).as_deref(), Some("/"));

        let about = RouteTemplate::parse("/about.html").unwrap();
        assert_eq!(about.literal_count(), 1);
        assert!(about.matches("/about.html").is_some());
        assert!(about.matches("/other.html").is_none());
    }

    #[test]
    fn test_param_names_strip_markers() {
        let route = RouteTemplate::parse("/docs/{section}/{rest...}").unwrap();
        assert_eq!(route.param_names(), ["section", "rest"]);

        let route = RouteTemplate::parse("/search/{query?}").unwrap();
        assert_eq!(route.param_names(), ["query"]);
    }

    #[test]
    fn test_plugin_route_round_trip() {
        let route = RouteTemplate::parse("/plugins/{pluginId}.html").unwrap();
        let bound = params(&[("pluginId", "ktor-auth")]);

        let path = route.substitute(&bound).unwrap();
        assert_eq!(path, "/plugins/ktor-auth.html");
        assert_eq!(route.matches(&path), Some(bound));
    }

    #[test]
    fn test_matches_rejects_wrong_shape() {
        let route = RouteTemplate::parse("/plugins/tag/{tag}.html").unwrap();
        assert!(route.matches("/plugins/tag/.html").is_none());
        assert!(route.matches("/plugins/tag/security").is_none());
        assert!(route.matches("/plugins/tag/security.html/extra").is_none());
        assert_eq!(
            route.matches("/plugins/tag/security.html"),
            Some(params(&[("tag", "security")]))
        );
    }

    #[test]
    fn test_optional_and_tailcard() {
        let search = RouteTemplate::parse("/search/{query?}").unwrap();
        assert_eq!(search.matches("/search"), Some(Parameters::new()));
        assert_eq!(search.matches("/search/ktor"), Some(params(&[("query", "ktor")])));
        assert_eq!(search.substitute(&Parameters::new()).as_deref(), Some("/search"));

        let docs = RouteTemplate::parse("/docs/{rest...}").unwrap();
        assert_eq!(docs.matches("/docs/a/b.html"), Some(params(&[("rest", "a/b.html")])));
        assert_eq!(
            docs.substitute(&params(&[("rest", "a/b.html")])).as_deref(),
            Some("/docs/a/b.html")
        );
    }

    #[test]
    fn test_substitute_rejects_escapes() {
        let route = RouteTemplate::parse("/plugins/{pluginId}.html").unwrap();
        assert!(route.substitute(&Parameters::new()).is_none());
        assert!(route.substitute(&params(&[("pluginId", "a/b")])).is_none());
        assert!(route.substitute(&params(&[("pluginId", "..")])).is_none());

        let docs = RouteTemplate::parse("/docs/{rest...}").unwrap();
        assert!(docs.substitute(&params(&[("rest", "../../etc")])).is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(RouteTemplate::parse("plugins"), Err(RouteError::NotAbsolute(_))));
        assert!(matches!(RouteTemplate::parse("/a//b"), Err(RouteError::EmptySegment(_))));
        assert!(matches!(RouteTemplate::parse("/{}"), Err(RouteError::Placeholder { .. })));
        assert!(matches!(RouteTemplate::parse("/{a"), Err(RouteError::Placeholder { .. })));
        assert!(matches!(RouteTemplate::parse("/{a}{b}"), Err(RouteError::Placeholder { .. })));
        assert!(matches!(RouteTemplate::parse("/{rest...}/x"), Err(RouteError::NotLast { .. })));
        assert!(matches!(RouteTemplate::parse("/{a}/{a}"), Err(RouteError::Duplicate { .. })));
    }
}
