//! Ordered pattern router.
//!
//! Every route is an anchored regular expression with named capture groups.
//! Routes are tried in declaration order and the first full match wins, so the
//! table below is order-sensitive: specific routes must come before the
//! generic slug route.

use axum::http::Method;
use regex::Regex;
use std::collections::HashMap;

/// RouteName
///
/// The closed set of handlers a request can be dispatched to. A path no
/// route accepts resolves to [`Resolution::NotFound`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteName {
    Index,
    PageView,
    Admin,
    PageEdit,
    PagePreview,
    Archive,
    Feed,
    Asset,
}

/// The route table, relative to the blog root (no leading slash).
pub const ROUTES: &[(&str, RouteName)] = &[
    ("", RouteName::Index),
    (
        r"(?P<year>[0-9]{4})/(?P<month>0[0-9]|1[0-2])/(?P<name>[a-z0-9]+(?:-[a-z0-9]+)*)",
        RouteName::PageView,
    ),
    ("admin/", RouteName::Admin),
    ("admin/edit/new(?P<id>post|page)", RouteName::PageEdit),
    ("admin/edit/(?P<id>[1-9][0-9]*)", RouteName::PageEdit),
    ("admin/edit/(?P<id>[1-9][0-9]*)/preview", RouteName::PagePreview),
    ("archive/", RouteName::Archive),
    (r"feed\.xml", RouteName::Feed),
    (r"assets/(?P<name>[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)", RouteName::Asset),
    (r"(?P<name>[a-z0-9]+(?:-[a-z0-9]+)*)", RouteName::PageView),
];

/// RouterError
///
/// Startup-time configuration failures. Never produced per request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid url prefix {0:?}: must be empty or start with '/' and not end with '/'")]
    InvalidPrefix(String),

    #[error("invalid route pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Params
///
/// Named captures of the matched route. Groups that did not participate in
/// the match map to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Resolution
///
/// What the router decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Dispatch { route: RouteName, params: Params },
    /// 301 to this absolute path (prefix included).
    Redirect(String),
    /// The CSRF check failed. No route was consulted.
    Forbidden,
    NotFound,
}

struct Route {
    pattern: Regex,
    name: RouteName,
}

/// Router
///
/// Built once at startup and shared read-only by every request.
pub struct Router {
    root: String,
    routes: Vec<Route>,
}

impl Router {
    /// Router over the default [`ROUTES`] table mounted at `prefix`.
    pub fn new(prefix: &str) -> Result<Self, RouterError> {
        Self::with_routes(prefix, ROUTES)
    }

    pub fn with_routes(prefix: &str, table: &[(&str, RouteName)]) -> Result<Self, RouterError> {
        if !valid_prefix(prefix) {
            return Err(RouterError::InvalidPrefix(prefix.to_string()));
        }

        let routes = table
            .iter()
            .map(|(pattern, name)| {
                Regex::new(&format!("^(?:{pattern})$"))
                    .map(|pattern| Route {
                        pattern,
                        name: *name,
                    })
                    .map_err(|source| RouterError::Pattern {
                        pattern: pattern.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: format!("{prefix}/"),
            routes,
        })
    }

    /// The blog root, always ending in `/`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// resolve
    ///
    /// Maps a request onto a route.
    ///
    /// 1. Paths outside the root are not found.
    /// 2. Methods other than GET and HEAD must pass `csrf_check` first.
    /// 3. The first matching route wins, unless the path with its trailing
    ///    slash toggled matches an earlier route. Then, and when nothing
    ///    matches the path itself, the toggled form becomes a 301.
    pub fn resolve(
        &self,
        method: &Method,
        path: &str,
        csrf_check: impl FnOnce() -> bool,
    ) -> Resolution {
        let Some(rest) = path.strip_prefix(self.root.as_str()) else {
            return Resolution::NotFound;
        };

        if method != Method::GET && method != Method::HEAD && !csrf_check() {
            return Resolution::Forbidden;
        }

        let exact = self.first_match(rest);

        let toggled = match rest.strip_suffix('/') {
            Some(without) => without.to_string(),
            None => format!("{rest}/"),
        };
        // "" is the index; stripping its slash would leave the root.
        let alternate = if rest.is_empty() {
            None
        } else {
            self.first_match(&toggled).map(|(index, _)| index)
        };

        match (exact, alternate) {
            (Some((index, _)), Some(alt)) if alt < index => {
                Resolution::Redirect(format!("{}{toggled}", self.root))
            }
            (Some((_, route)), _) => Resolution::Dispatch {
                route: route.name,
                params: extract_params(&route.pattern, rest),
            },
            (None, Some(_)) => Resolution::Redirect(format!("{}{toggled}", self.root)),
            (None, None) => Resolution::NotFound,
        }
    }

    fn first_match(&self, path: &str) -> Option<(usize, &Route)> {
        self.routes
            .iter()
            .enumerate()
            .find(|(_, route)| route.pattern.is_match(path))
    }
}

fn extract_params(pattern: &Regex, path: &str) -> Params {
    let Some(captures) = pattern.captures(path) else {
        return Params::default();
    };
    Params(
        pattern
            .capture_names()
            .flatten()
            .map(|name| {
                let value = captures.name(name).map(|m| m.as_str()).unwrap_or("");
                (name.to_string(), value.to_string())
            })
            .collect(),
    )
}

fn valid_prefix(prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    prefix.starts_with('/')
        && !prefix.ends_with('/')
        && !prefix
            .chars()
            .any(|c| c.is_whitespace() || c == '?' || c == '#')
}
