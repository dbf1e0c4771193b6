use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EffectivePolicy, GlobalPolicy, RouteConfigEntry};
use crate::policy;

/// One compiled `METHOD:PATH` pattern; the grammar this enforces is
/// summarized in `compile`'s body.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    method: PatternMethod,
    path_raw: String,
    path_kind: PathKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternMethod {
    Any,
    Exact(String),
}

#[derive(Debug, Clone)]
enum PathKind {
    /// `P/*` (or the bare pattern `*`, equivalent to prefix `/`). Matches
    /// any path with `P` as a whole-segment prefix.
    Trailing(String),
    /// Segment-by-segment match; each element is either a literal or `*`.
    Segmented(Vec<String>),
}

impl RoutePattern {
    /// Compile and validate a `METHOD:PATH` pattern. Fatal at load time if
    /// malformed — route patterns are validated once, at load time.
    pub fn compile(pattern: &str) -> Result<RoutePattern, String> {
        let (method_raw, path_raw) = pattern
            .split_once(':')
            .ok_or_else(|| format!("pattern {pattern:?} is missing the METHOD: prefix"))?;

        let method = if method_raw == "*" {
            PatternMethod::Any
        } else {
            if method_raw.is_empty() || !method_raw.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(format!(
                    "pattern {pattern:?}: method {method_raw:?} must be an uppercase HTTP verb or *"
                ));
            }
            PatternMethod::Exact(method_raw.to_string())
        };

        if path_raw.is_empty() || (path_raw != "*" && !path_raw.starts_with('/')) {
            return Err(format!(
                "pattern {pattern:?}: path must start with / or be the lone token *"
            ));
        }

        let path_kind = if path_raw == "*" {
            PathKind::Trailing("/".to_string())
        } else {
            let segments: Vec<&str> = path_raw.split('/').collect();
            for seg in &segments {
                if seg.contains('*') && *seg != "*" {
                    return Err(format!(
                        "pattern {pattern:?}: * must appear as a whole path segment"
                    ));
                }
            }

            let last_is_star = segments.last() == Some(&"*");
            let other_star = segments[..segments.len() - 1].iter().any(|s| *s == "*");

            if last_is_star && !other_star {
                let prefix = &path_raw[..path_raw.len() - 2];
                let prefix = if prefix.is_empty() { "/" } else { prefix };
                PathKind::Trailing(prefix.to_string())
            } else {
                let trimmed = trim_empty_edges(&segments);
                PathKind::Segmented(trimmed.into_iter().map(str::to_string).collect())
            }
        };

        Ok(RoutePattern {
            raw: pattern.to_string(),
            method,
            path_raw: path_raw.to_string(),
            path_kind,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True if this pattern can match more than one `(method, path)` pair —
    /// used by `RouteTable` to decide when the exact-match fast path is safe.
    fn is_wildcard(&self) -> bool {
        self.method == PatternMethod::Any
            || matches!(self.path_kind, PathKind::Trailing(_))
            || matches!(&self.path_kind, PathKind::Segmented(segs) if segs.iter().any(|s| s == "*"))
    }

    pub fn matches(&self, method_upper: &str, path: &str) -> bool {
        let method_ok = match &self.method {
            PatternMethod::Any => true,
            PatternMethod::Exact(m) => m == method_upper,
        };
        method_ok && self.path_matches(path)
    }

    fn path_matches(&self, path: &str) -> bool {
        if self.path_raw == path {
            return true;
        }
        match &self.path_kind {
            PathKind::Trailing(prefix) => matches_trailing(prefix, path),
            PathKind::Segmented(pattern_segs) => {
                let req_segs: Vec<&str> = path.split('/').collect();
                let req_segs = trim_empty_edges(&req_segs);
                if req_segs.len() != pattern_segs.len() {
                    return false;
                }
                req_segs
                    .iter()
                    .zip(pattern_segs.iter())
                    .all(|(r, p)| p == "*" || r == p)
            }
        }
    }
}

fn matches_trailing(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn trim_empty_edges<'a>(segments: &[&'a str]) -> Vec<&'a str> {
    let mut start = 0;
    let mut end = segments.len();
    while start < end && segments[start].is_empty() {
        start += 1;
    }
    while end > start && segments[end - 1].is_empty() {
        end -= 1;
    }
    segments[start..end].to_vec()
}

/// Compiled route configuration: skip patterns, per-route policies, and the
/// global fallback. Built once at load time, immutable afterwards, and
/// shareable across request handlers.
pub struct RouteTable {
    skip_patterns: Vec<RoutePattern>,
    route_patterns: Vec<(RoutePattern, Arc<EffectivePolicy>)>,
    /// Fast path for literal (non-wildcard) route patterns, keyed by
    /// `METHOD:PATH`. Only consulted when the hit's index precedes every
    /// wildcard pattern, so precedence is never violated by the shortcut.
    exact_index: HashMap<String, usize>,
    first_wildcard_index: Option<usize>,
    global: Arc<EffectivePolicy>,
}

impl RouteTable {
    pub fn new(
        global_policy: &GlobalPolicy,
        route_configs: &[RouteConfigEntry],
        skip_routes: &[String],
    ) -> Result<RouteTable, String> {
        let skip_patterns = skip_routes
            .iter()
            .map(|p| RoutePattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut route_patterns = Vec::with_capacity(route_configs.len());
        for entry in route_configs {
            let pattern = RoutePattern::compile(&entry.pattern)?;
            let effective = policy::resolve(global_policy, &entry.policy);
            route_patterns.push((pattern, Arc::new(effective)));
        }

        let first_wildcard_index = route_patterns.iter().position(|(p, _)| p.is_wildcard());

        let mut exact_index = HashMap::new();
        for (idx, (pattern, _)) in route_patterns.iter().enumerate() {
            if !pattern.is_wildcard() {
                exact_index.entry(pattern.raw().to_string()).or_insert(idx);
            }
        }

        Ok(RouteTable {
            skip_patterns,
            route_patterns,
            exact_index,
            first_wildcard_index,
            global: Arc::new(EffectivePolicy::from(global_policy)),
        })
    }

    /// `resolve(method, path) -> (skip, policy)`: skip patterns are checked
    /// first, then route-config patterns, both in config order, else the
    /// global policy applies.
    pub fn resolve(&self, method: &str, path: &str) -> (bool, Arc<EffectivePolicy>) {
        let method_upper = method.to_ascii_uppercase();

        if self
            .skip_patterns
            .iter()
            .any(|p| p.matches(&method_upper, path))
        {
            return (true, self.global.clone());
        }

        let route_key = format!("{method_upper}:{path}");
        if let Some(&idx) = self.exact_index.get(&route_key) {
            if idx < self.first_wildcard_index.unwrap_or(usize::MAX) {
                return (false, self.route_patterns[idx].1.clone());
            }
        }

        for (pattern, policy) in &self.route_patterns {
            if pattern.matches(&method_upper, path) {
                return (false, policy.clone());
            }
        }

        (false, self.global.clone())
    }

    pub fn global_policy(&self) -> Arc<EffectivePolicy> {
        self.global.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteOverride;

    fn entry(pattern: &str, test_probability: u32) -> RouteConfigEntry {
        RouteConfigEntry {
            pattern: pattern.to_string(),
            policy: RouteOverride {
                test_probability,
                ..RouteOverride::default()
            },
        }
    }

    #[test]
    fn test_exact_pattern_matches() {
        let p = RoutePattern::compile("GET:/a/b").unwrap();
        assert!(p.matches("GET", "/a/b"));
        assert!(!p.matches("POST", "/a/b"));
        assert!(!p.matches("GET", "/a/b/c"));
    }

    #[test]
    fn test_method_wildcard_matches_any_method() {
        let p = RoutePattern::compile("*:/a/b").unwrap();
        assert!(p.matches("GET", "/a/b"));
        assert!(p.matches("DELETE", "/a/b"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        // scenario 5: GET:/u/*/p matches /u/42/p but not /u/42/43/p
        let p = RoutePattern::compile("GET:/u/*/p").unwrap();
        assert!(p.matches("GET", "/u/42/p"));
        assert!(!p.matches("GET", "/u/42/43/p"));
        assert!(!p.matches("GET", "/u/p"));
    }

    #[test]
    fn test_trailing_wildcard_matches_remaining_segments() {
        let p = RoutePattern::compile("GET:/u/*").unwrap();
        assert!(p.matches("GET", "/u"));
        assert!(p.matches("GET", "/u/42"));
        assert!(p.matches("GET", "/u/42/43"));
        assert!(!p.matches("GET", "/other"));
    }

    #[test]
    fn test_root_trailing_wildcard_matches_everything() {
        let p = RoutePattern::compile("*:/*").unwrap();
        assert!(p.matches("GET", "/"));
        assert!(p.matches("POST", "/anything/at/all"));
    }

    #[test]
    fn test_lone_star_path_is_equivalent_to_slash_star() {
        let p = RoutePattern::compile("GET:*").unwrap();
        assert!(p.matches("GET", "/anything"));
    }

    #[test]
    fn test_double_star_is_rejected() {
        assert!(RoutePattern::compile("GET:/a/**").is_err());
    }

    #[test]
    fn test_partial_segment_wildcard_is_rejected() {
        assert!(RoutePattern::compile("GET:/ab*").is_err());
    }

    #[test]
    fn test_missing_method_prefix_is_rejected() {
        assert!(RoutePattern::compile("/a/b").is_err());
    }

    #[test]
    fn test_lowercase_method_is_rejected() {
        assert!(RoutePattern::compile("get:/a").is_err());
    }

    #[test]
    fn test_path_not_starting_with_slash_is_rejected() {
        assert!(RoutePattern::compile("GET:a/b").is_err());
    }

    #[test]
    fn test_config_order_precedence() {
        // scenario 6
        let route_configs = vec![
            entry("GET:/u/me/p", 100),
            entry("GET:/u/*/p", 50),
            entry("GET:/u/*", 10),
        ];
        let table = RouteTable::new(&GlobalPolicy::default(), &route_configs, &[]).unwrap();

        let (_, policy) = table.resolve("GET", "/u/me/p");
        assert_eq!(policy.test_probability, 100);

        let (_, policy) = table.resolve("GET", "/u/42/p");
        assert_eq!(policy.test_probability, 50);

        let (_, policy) = table.resolve("GET", "/u/42/x");
        assert_eq!(policy.test_probability, 10);
    }

    #[test]
    fn test_reordering_changes_result_for_overlapping_patterns() {
        // Reordering two overlapping patterns changes which one wins.
        let a = vec![entry("GET:/u/*", 10), entry("GET:/u/me/p", 100)];
        let b = vec![entry("GET:/u/me/p", 100), entry("GET:/u/*", 10)];

        let table_a = RouteTable::new(&GlobalPolicy::default(), &a, &[]).unwrap();
        let table_b = RouteTable::new(&GlobalPolicy::default(), &b, &[]).unwrap();

        assert_eq!(table_a.resolve("GET", "/u/me/p").1.test_probability, 10);
        assert_eq!(table_b.resolve("GET", "/u/me/p").1.test_probability, 100);
    }

    #[test]
    fn test_no_match_returns_global_policy() {
        let global = GlobalPolicy {
            test_probability: 77,
            ..GlobalPolicy::default()
        };
        let table = RouteTable::new(&global, &[], &[]).unwrap();
        let (skip, policy) = table.resolve("GET", "/unrelated");
        assert!(!skip);
        assert_eq!(policy.test_probability, 77);
    }

    #[test]
    fn test_skip_pattern_dominates_route_config() {
        let route_configs = vec![entry("GET:/a", 100)];
        let skip_routes = vec!["GET:/a".to_string()];
        let table = RouteTable::new(&GlobalPolicy::default(), &route_configs, &skip_routes).unwrap();
        let (skip, _) = table.resolve("GET", "/a");
        assert!(skip);
    }

    #[test]
    fn test_exact_fast_path_agrees_with_linear_scan() {
        let route_configs = vec![entry("GET:/a", 11), entry("GET:/b", 22), entry("GET:/*", 33)];
        let table = RouteTable::new(&GlobalPolicy::default(), &route_configs, &[]).unwrap();
        assert_eq!(table.resolve("GET", "/a").1.test_probability, 11);
        assert_eq!(table.resolve("GET", "/b").1.test_probability, 22);
        assert_eq!(table.resolve("GET", "/anything-else").1.test_probability, 33);
    }

    #[test]
    fn test_invalid_pattern_in_route_table_construction_fails() {
        let route_configs = vec![entry("GET:/a/**", 1)];
        assert!(RouteTable::new(&GlobalPolicy::default(), &route_configs, &[]).is_err());
    }
}
