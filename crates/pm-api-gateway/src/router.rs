//! Route table: maps request paths to backend routes.
//!
//! Prefixes match on segment boundaries (`/auth` owns `/auth` and
//! `/auth/login` but not `/authx`). The longest matching prefix wins.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::GatewayConfig;
use crate::middleware::rate_limit::RateLimiter;
use crate::ports::Clock;
use crate::resolver::ResolverPolicy;

/// A configured backend route with its own rate limiter
pub struct Route {
    pub id: Arc<str>,
    /// Normalised prefix, no trailing slash (`""` for the root route)
    prefix: String,
    upstream: String,
    strip_prefix: bool,
    pub resolver: ResolverPolicy,
    pub timeout: Duration,
    pub limiter: Arc<RateLimiter>,
}

impl Route {
    pub fn path_prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }

    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Full upstream URL for a request path and optional query.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let forwarded = if self.strip_prefix {
            match path.strip_prefix(self.prefix.as_str()) {
                Some("") | None => "/",
                Some(rest) => rest,
            }
        } else {
            path
        };

        let mut url = format!("{}{}", self.upstream, forwarded);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// All routes, longest prefix first
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Build routes (and their rate limiters) from validated configuration.
    pub fn from_config(config: &GatewayConfig, clock: Arc<dyn Clock>) -> Self {
        let mut routes: Vec<Arc<Route>> = config
            .routes
            .iter()
            .map(|route| {
                let id: Arc<str> = Arc::from(route.id.as_str());
                Arc::new(Route {
                    id: id.clone(),
                    prefix: route.path_prefix.trim_end_matches('/').to_string(),
                    upstream: route.upstream.trim_end_matches('/').to_string(),
                    strip_prefix: route.strip_prefix,
                    resolver: route.resolver,
                    timeout: config.timeout_for(route),
                    limiter: Arc::new(RateLimiter::new(
                        id,
                        config.rate_limit_for(route),
                        &config.bucket_store,
                        clock.clone(),
                    )),
                })
            })
            .collect();

        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// Route owning `path`, if any
    pub fn match_path(&self, path: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.matches(path))
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| &*route.id == id)
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Every route's limiter, for the cleanup task
    pub fn limiters(&self) -> Vec<Arc<RateLimiter>> {
        self.routes.iter().map(|r| r.limiter.clone()).collect()
    }
}
