use std::collections::HashSet;

use serde_json::Value;

use crate::sink::ComparisonType;

/// Outcome of comparing a main/test response pair. Comparison runs in
/// order: status, then headers, then body. First divergence wins.
pub enum Outcome {
    Identical,
    Diverged {
        kind: ComparisonType,
        different_headers: Option<Vec<String>>,
    },
}

pub struct ResponsePair<'a> {
    pub main_status: u16,
    pub test_status: u16,
    pub main_headers: &'a [(String, String)],
    pub test_headers: &'a [(String, String)],
    pub main_body: &'a [u8],
    pub test_body: &'a [u8],
}

/// Run the full status → headers → body comparison.
pub fn compare(pair: &ResponsePair, compare_headers: bool, skip_headers: &[String], skip_json_paths: &[String]) -> Outcome {
    if pair.main_status != pair.test_status {
        return Outcome::Diverged {
            kind: ComparisonType::StatusDiff,
            different_headers: None,
        };
    }

    if compare_headers {
        if let Some(names) = diff_headers(pair.main_headers, pair.test_headers, skip_headers) {
            return Outcome::Diverged {
                kind: ComparisonType::HeaderDiff,
                different_headers: Some(names),
            };
        }
    }

    if bodies_diverge(pair, skip_json_paths) {
        return Outcome::Diverged {
            kind: ComparisonType::BodyDiff,
            different_headers: None,
        };
    }

    Outcome::Identical
}

/// Header comparison, excluding `skip_headers` (case-insensitive). Returns
/// the differing names — main-side-first-encountered order, then
/// test-only names — or `None` if the sets are equal.
pub fn diff_headers(
    main: &[(String, String)],
    test: &[(String, String)],
    skip_headers: &[String],
) -> Option<Vec<String>> {
    let skip_lc: HashSet<String> = skip_headers.iter().map(|s| s.to_ascii_lowercase()).collect();
    let main_g = grouped(main, &skip_lc);
    let test_g = grouped(test, &skip_lc);

    let test_by_key: std::collections::HashMap<&str, &Vec<String>> =
        test_g.iter().map(|(lower, _, values)| (lower.as_str(), values)).collect();
    let main_keys: HashSet<&str> = main_g.iter().map(|(lower, _, _)| lower.as_str()).collect();

    let mut diffs = Vec::new();
    for (lower, display, values) in &main_g {
        match test_by_key.get(lower.as_str()) {
            None => diffs.push(display.clone()),
            Some(test_values) => {
                if values.len() != test_values.len() || values != *test_values {
                    diffs.push(display.clone());
                }
            }
        }
    }
    for (lower, display, _) in &test_g {
        if !main_keys.contains(lower.as_str()) {
            diffs.push(display.clone());
        }
    }

    if diffs.is_empty() {
        None
    } else {
        Some(diffs)
    }
}

/// Group header `(name, value)` pairs by lowercased name, preserving
/// first-seen order and display casing, skipping names in `skip_lc`.
fn grouped(headers: &[(String, String)], skip_lc: &HashSet<String>) -> Vec<(String, String, Vec<String>)> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: std::collections::HashMap<String, (String, Vec<String>)> = std::collections::HashMap::new();

    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if skip_lc.contains(&lower) {
            continue;
        }
        let entry = by_key.entry(lower.clone()).or_insert_with(|| {
            order.push(lower.clone());
            (name.clone(), Vec::new())
        });
        entry.1.push(value.clone());
    }

    order
        .into_iter()
        .map(|lower| {
            let (display, values) = by_key.remove(&lower).expect("key was just inserted");
            (lower, display, values)
        })
        .collect()
}

/// `Content-Type` header value, media type only (no parameters), lowercased.
pub fn content_type_media(headers: &[(String, String)]) -> Option<String> {
    headers.iter().find_map(|(name, value)| {
        if name.eq_ignore_ascii_case("content-type") {
            Some(value.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        } else {
            None
        }
    })
}

fn is_json_media_type(media: &str) -> bool {
    media == "application/json" || media == "application/ld+json"
}

fn bodies_diverge(pair: &ResponsePair, skip_json_paths: &[String]) -> bool {
    let media = content_type_media(pair.main_headers).unwrap_or_default();

    if !is_json_media_type(&media) {
        return pair.main_body != pair.test_body;
    }

    let main_val = match serde_json::from_slice::<Value>(pair.main_body) {
        Ok(v) => v,
        Err(_) => {
            metrics::counter!("comparison_json_parse_errors_total").increment(1);
            return false;
        }
    };
    let test_val = match serde_json::from_slice::<Value>(pair.test_body) {
        Ok(v) => v,
        Err(_) => {
            metrics::counter!("comparison_json_parse_errors_total").increment(1);
            return false;
        }
    };

    if main_val == test_val {
        return false;
    }

    if pair.main_status == pair.test_status && !skip_json_paths.is_empty() {
        let mut masked_main = main_val.clone();
        let mut masked_test = test_val.clone();
        for path in skip_json_paths {
            mask_path(&mut masked_main, path);
            mask_path(&mut masked_test, path);
        }
        if masked_main == masked_test {
            return false;
        }
    }

    true
}

/// Set `value` at the dotted `path` to the sentinel `"useless"`, creating
/// intermediate objects as needed.
fn mask_path(value: &mut Value, path: &str) {
    let mut current = value;
    let parts: Vec<&str> = path.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        if i == parts.len() - 1 {
            map.insert(part.to_string(), Value::String("useless".to_string()));
            return;
        }
        current = map.entry(part.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_identical_status_and_body() {
        let pair = ResponsePair {
            main_status: 200,
            test_status: 200,
            main_headers: &[],
            test_headers: &[],
            main_body: b"{\"x\":1}",
            test_body: b"{\"x\":1}",
        };
        assert!(matches!(compare(&pair, true, &[], &[]), Outcome::Identical));
    }

    #[test]
    fn test_status_divergence_wins_over_body() {
        let pair = ResponsePair {
            main_status: 200,
            test_status: 500,
            main_headers: &[],
            test_headers: &[],
            main_body: b"same",
            test_body: b"same",
        };
        let outcome = compare(&pair, true, &[], &[]);
        assert!(matches!(
            outcome,
            Outcome::Diverged { kind: ComparisonType::StatusDiff, .. }
        ));
    }

    #[test]
    fn test_header_skip_list_excludes_configured_names() {
        let main = headers(&[("Date", "A"), ("X-Trace", "m"), ("ETag", "v1")]);
        let test = headers(&[("Date", "B"), ("X-Trace", "n"), ("ETag", "v2")]);
        let skip = vec!["Date".to_string(), "X-Trace".to_string()];
        let diff = diff_headers(&main, &test, &skip).unwrap();
        assert_eq!(diff, vec!["ETag".to_string()]);
    }

    #[test]
    fn test_header_present_only_on_test_side_is_reported_after_main() {
        let main = headers(&[("A", "1")]);
        let test = headers(&[("A", "1"), ("B", "2")]);
        let diff = diff_headers(&main, &test, &[]).unwrap();
        assert_eq!(diff, vec!["B".to_string()]);
    }

    #[test]
    fn test_multi_valued_header_length_mismatch_diverges() {
        let main = headers(&[("Set-Cookie", "a"), ("Set-Cookie", "b")]);
        let test = headers(&[("Set-Cookie", "a")]);
        assert!(diff_headers(&main, &test, &[]).is_some());
    }

    #[test]
    fn test_json_semantic_equality_ignores_key_order() {
        let main_body = json!({"a": 1, "b": 2}).to_string();
        let test_body = json!({"b": 2, "a": 1}).to_string();
        let headers = headers(&[("Content-Type", "application/json")]);
        let pair = ResponsePair {
            main_status: 200,
            test_status: 200,
            main_headers: &headers,
            test_headers: &headers,
            main_body: main_body.as_bytes(),
            test_body: test_body.as_bytes(),
        };
        assert!(matches!(compare(&pair, true, &[], &[]), Outcome::Identical));
    }

    #[test]
    fn test_json_array_order_is_significant() {
        let main_body = json!({"a": [1, 2]}).to_string();
        let test_body = json!({"a": [2, 1]}).to_string();
        let headers = headers(&[("Content-Type", "application/json")]);
        let pair = ResponsePair {
            main_status: 200,
            test_status: 200,
            main_headers: &headers,
            test_headers: &headers,
            main_body: main_body.as_bytes(),
            test_body: test_body.as_bytes(),
        };
        assert!(matches!(
            compare(&pair, true, &[], &[]),
            Outcome::Diverged { kind: ComparisonType::BodyDiff, .. }
        ));
    }

    #[test]
    fn test_json_path_mask_ignores_masked_field_differences() {
        let main_body = json!({"v": 1, "ts": "2025-01-01"}).to_string();
        let test_body = json!({"v": 1, "ts": "2025-02-02"}).to_string();
        let headers = headers(&[("Content-Type", "application/json")]);
        let pair = ResponsePair {
            main_status: 200,
            test_status: 200,
            main_headers: &headers,
            test_headers: &headers,
            main_body: main_body.as_bytes(),
            test_body: test_body.as_bytes(),
        };
        assert!(matches!(
            compare(&pair, true, &[], &["ts".to_string()]),
            Outcome::Identical
        ));
    }

    #[test]
    fn test_json_path_mask_creates_missing_path() {
        let mut v = json!({"a": 1});
        mask_path(&mut v, "b.c");
        assert_eq!(v, json!({"a": 1, "b": {"c": "useless"}}));
    }

    #[test]
    fn test_json_parse_error_skips_body_comparison() {
        let headers = headers(&[("Content-Type", "application/json")]);
        let pair = ResponsePair {
            main_status: 200,
            test_status: 200,
            main_headers: &headers,
            test_headers: &headers,
            main_body: b"not json",
            test_body: b"also not json",
        };
        // comparator error is not a body_diff
        assert!(matches!(compare(&pair, true, &[], &[]), Outcome::Identical));
    }

    #[test]
    fn test_byte_exact_comparison_for_non_json_content_type() {
        let headers = headers(&[("Content-Type", "text/plain")]);
        let pair = ResponsePair {
            main_status: 200,
            test_status: 200,
            main_headers: &headers,
            test_headers: &headers,
            main_body: b"hello",
            test_body: b"world",
        };
        assert!(matches!(
            compare(&pair, true, &[], &[]),
            Outcome::Diverged { kind: ComparisonType::BodyDiff, .. }
        ));
    }

    #[test]
    fn test_content_type_media_strips_parameters() {
        let headers = headers(&[("Content-Type", "application/json; charset=utf-8")]);
        assert_eq!(content_type_media(&headers), Some("application/json".to_string()));
    }
}
