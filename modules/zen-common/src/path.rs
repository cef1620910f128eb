//! Dotted field-path resolver shared by the Filter Engine and the Normalizer.
//!
//! `a.b[0].c` into a `serde_json::Value` payload. Missing intermediate
//! segments resolve to `None` — never panics, regardless of how malformed
//! the upstream payload is.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for raw in path.split('.') {
        if raw.is_empty() {
            continue;
        }
        // Split "b[0]" into key "b" and index 0, supporting multiple
        // brackets like "b[0][1]".
        let mut rest = raw;
        if let Some(bracket_pos) = rest.find('[') {
            let key = &rest[..bracket_pos];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &rest[bracket_pos..];
            while let Some(stripped) = rest.strip_prefix('[') {
                if let Some(end) = stripped.find(']') {
                    let idx_str = &stripped[..end];
                    if let Ok(idx) = idx_str.parse::<usize>() {
                        segments.push(Segment::Index(idx));
                    }
                    rest = &stripped[end + 1..];
                } else {
                    break;
                }
            }
        } else {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    segments
}

/// Resolve a dotted path into `value`. Returns `None` on any missing or
/// type-mismatched intermediate segment — this is the "not_exists" case for
/// the Filter Engine, never a panic.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path);
    let mut current = value;
    for segment in &segments {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_key() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(resolve_path(&v, "a.b.c"), Some(&json!(42)));
    }

    #[test]
    fn resolves_numeric_index() {
        let v = json!({"a": {"b": [{"c": "first"}, {"c": "second"}]}});
        assert_eq!(resolve_path(&v, "a.b[1].c"), Some(&json!("second")));
    }

    #[test]
    fn missing_intermediate_segment_is_none_not_panic() {
        let v = json!({"a": "not-an-object"});
        assert_eq!(resolve_path(&v, "a.b.c"), None);
        assert_eq!(resolve_path(&v, "x.y.z"), None);
    }

    #[test]
    fn out_of_bounds_index_is_none() {
        let v = json!({"a": [1, 2]});
        assert_eq!(resolve_path(&v, "a[5]"), None);
    }

    #[test]
    fn empty_path_returns_root() {
        let v = json!({"a": 1});
        assert_eq!(resolve_path(&v, ""), Some(&v));
    }
}
