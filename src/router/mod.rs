//! Route table
//!
//! Maps `(method, path)` to the name of an upstream. Rules are evaluated in
//! upstream declaration order, then mapping declaration order, and the first
//! match wins. Three pattern kinds are supported:
//! - literal paths (`/v1/user/login`)
//! - prefix wildcards (`/v1/post/*`)
//! - named segments (`/v1/post/:id`), whose values are not captured
//!
//! Literal rules are indexed in a hash map; wildcard and named-segment rules
//! are kept in a list that is scanned only up to the position of the best
//! literal hit, so the first-match order is the same as a plain linear scan.

use crate::config::UpstreamConfig;
use axum::http::Method;
use std::collections::HashMap;

/// A compiled path pattern
#[derive(Debug, Clone, PartialEq)]
pub enum PathPattern {
    /// Matches only the identical path
    Exact(String),
    /// `prefix/*`: matches `prefix` itself and anything below `prefix/`
    Prefix(String),
    /// Segment-wise match; `None` marks a `:name` segment
    Segments(Vec<Option<String>>),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return PathPattern::Prefix(prefix.to_string());
        }

        if pattern.split('/').any(|segment| segment.starts_with(':')) {
            let segments = pattern
                .split('/')
                .map(|segment| {
                    if segment.starts_with(':') {
                        None
                    } else {
                        Some(segment.to_string())
                    }
                })
                .collect();
            return PathPattern::Segments(segments);
        }

        PathPattern::Exact(pattern.to_string())
    }

    /// Check if `path` matches this pattern
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(literal) => literal == path,
            PathPattern::Prefix(prefix) => {
                // "/foo/*" must not match "/foobar"
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            PathPattern::Segments(segments) => {
                let parts: Vec<&str> = path.split('/').collect();
                parts.len() == segments.len()
                    && segments.iter().zip(parts).all(|(segment, part)| match segment {
                        Some(literal) => literal == part,
                        None => !part.is_empty(),
                    })
            }
        }
    }
}

/// A single mapping rule bound to an upstream
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub method: Method,
    pub pattern: PathPattern,
    upstream: usize,
}

impl MappingRule {
    /// Check if this rule matches the given method and path
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.pattern.matches(path)
    }
}

/// Immutable route table, built once at startup
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    upstreams: Vec<String>,
    rules: Vec<MappingRule>,
    /// method -> literal path -> ordinal of the first rule declaring it
    exact: HashMap<Method, HashMap<String, usize>>,
    /// ordinals of wildcard and named-segment rules, ascending
    dynamic: Vec<usize>,
}

impl RouteTable {
    /// Compile the route table from upstream configurations
    pub fn new(upstreams: &[UpstreamConfig]) -> anyhow::Result<Self> {
        let mut table = RouteTable::default();

        for (index, upstream) in upstreams.iter().enumerate() {
            table.upstreams.push(upstream.name.clone());

            for mapping in &upstream.mappings {
                let method = Method::from_bytes(mapping.method.as_bytes()).map_err(|_| {
                    anyhow::anyhow!(
                        "Upstream '{}' has invalid method '{}'",
                        upstream.name,
                        mapping.method
                    )
                })?;
                let ordinal = table.rules.len();
                let pattern = PathPattern::parse(&mapping.path);

                match &pattern {
                    PathPattern::Exact(path) => {
                        table
                            .exact
                            .entry(method.clone())
                            .or_default()
                            .entry(path.clone())
                            .or_insert(ordinal);
                    }
                    _ => table.dynamic.push(ordinal),
                }

                table.rules.push(MappingRule {
                    method,
                    pattern,
                    upstream: index,
                });
            }
        }

        Ok(table)
    }

    /// Find the upstream serving `method` and `path`
    pub fn find(&self, method: &Method, path: &str) -> Option<&str> {
        let exact = self
            .exact
            .get(method)
            .and_then(|paths| paths.get(path))
            .copied();

        let dynamic = self
            .dynamic
            .iter()
            .copied()
            .take_while(|&ordinal| exact.map_or(true, |first| ordinal < first))
            .find(|&ordinal| self.rules[ordinal].matches(method, path));

        let ordinal = dynamic.or(exact)?;
        Some(self.upstreams[self.rules[ordinal].upstream].as_str())
    }

    /// Names of all upstreams, in declaration order
    pub fn upstream_names(&self) -> impl Iterator<Item = &str> {
        self.upstreams.iter().map(String::as_str)
    }

    /// All compiled rules, in evaluation order
    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Number of mapping rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
