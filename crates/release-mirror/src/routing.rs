//! Mapping of inbound request paths to upstream URLs

use artifact_cache::DEFAULT_FILENAME;
use std::fmt;
use std::str::FromStr;

/// Requests under `prefix` are mirrored from `upstream`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRule {
    pub prefix: String,
    pub upstream: String,
}

/// Where a mirrored request is fetched from, and the name it is served under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub origin_url: String,
    pub filename: String,
}

impl MirrorRule {
    pub fn new(prefix: impl Into<String>, upstream: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            prefix,
            upstream: upstream.into(),
        }
    }

    fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix) || path == self.prefix.trim_end_matches('/')
    }
}

impl FromStr for MirrorRule {
    type Err = String;

    /// Parse `prefix=upstream`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, upstream) = s
            .split_once('=')
            .ok_or_else(|| format!("mirror rule {:?} must look like prefix=upstream", s))?;
        let upstream = upstream.trim();
        if !upstream.starts_with("http://") && !upstream.starts_with("https://") {
            return Err(format!("mirror upstream {:?} must be an http(s) URL", upstream));
        }
        Ok(Self::new(prefix.trim(), upstream))
    }
}

impl fmt::Display for MirrorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.prefix, self.upstream)
    }
}

/// Rules used when none are configured
pub fn default_rules() -> Vec<MirrorRule> {
    vec![MirrorRule::new("/", "https://github.com/")]
}

/// Resolve a request path (with optional query) against `rules`, first match wins
pub fn resolve(rules: &[MirrorRule], path_and_query: &str) -> Option<MirrorTarget> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let rule = rules.iter().find(|rule| rule.matches(path))?;
    let rest = path
        .strip_prefix(rule.prefix.trim_end_matches('/'))
        .unwrap_or(path)
        .trim_start_matches('/');

    let mut origin_url = format!("{}/{}", rule.upstream.trim_end_matches('/'), rest);
    if let Some(query) = query {
        origin_url.push('?');
        origin_url.push_str(query);
    }

    Some(MirrorTarget {
        origin_url,
        filename: display_filename(path),
    })
}

/// Last non-empty path segment
fn display_filename(path: &str) -> String {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string()
}
