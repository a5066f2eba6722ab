//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for request
//! - Rewrite the request path onto the route's upstream URL
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Explicit no-match (`None`) rather than silent default

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::Request;
use url::Url;

use crate::config::RouteConfig;
use crate::resilience::BreakerKind;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route '{name}' has an invalid upstream URL: {source}")]
    InvalidUpstream {
        name: String,
        #[source]
        source: url::ParseError,
    },
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub breaker: BreakerKind,
    pub dedup: bool,
    pub headers: BTreeMap<String, String>,
    priority: u32,
    prefix: PathPrefixMatcher,
    matcher: AndMatcher,
    upstream: Url,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouteError> {
        let upstream = Url::parse(&config.upstream_url).map_err(|source| RouteError::InvalidUpstream {
            name: config.name.clone(),
            source,
        })?;

        let prefix = PathPrefixMatcher::new(config.path_prefix.as_str());
        let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(prefix.clone())];
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.as_str())));
        }

        Ok(Self {
            name: config.name.clone(),
            breaker: config.breaker,
            dedup: config.dedup,
            headers: config.headers.clone(),
            priority: config.priority,
            prefix,
            matcher: AndMatcher::new(matchers),
            upstream,
        })
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        self.matcher.matches(req)
    }

    /// Upstream URL for an incoming `path` and `query`, with the route prefix removed.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let rest = self.prefix.strip(path).unwrap_or(path);
        let base = self.upstream.path().trim_end_matches('/');

        let mut url = self.upstream.clone();
        let joined = format!("{}{}", base, rest);
        url.set_path(if joined.is_empty() { "/" } else { &joined });
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }
}

/// Routes ordered by priority, then by prefix length.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut routes = configs
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.prefix.prefix().len().cmp(&a.prefix.prefix().len()))
        });

        Ok(Self { routes })
    }

    /// First route matching `req`.
    pub fn match_request(&self, req: &Request<Body>) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(req))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
