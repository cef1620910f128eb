//! Content-addressed fingerprinting: SHA-256 over a canonical,
//! type-tagged serialization of a tuple of values. Type tagging prevents
//! `1 == "1"` collisions between a JSON number and its string-encoded form.

use sha2::{Digest, Sha256};

/// Canonicalize a single JSON value into a stable, type-tagged string.
/// Object keys are sorted so two structurally-equal objects with keys in a
/// different order canonicalize identically.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => format!("b:{b}"),
        serde_json::Value::Number(n) => format!("n:{n}"),
        serde_json::Value::String(s) => format!("s:{s}"),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(canonicalize).collect();
            format!("a:[{}]", items.join(","))
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let items: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}={}", k, canonicalize(&map[k])))
                .collect();
            format!("o:{{{}}}", items.join(","))
        }
    }
}

/// Build the dedup fingerprint: SHA-256 over `source_name` plus the
/// canonical, type-tagged serialization of the values found at
/// `dedup.key_fields`. Missing fields canonicalize as `null` (a present-but-
/// absent key is part of the identity, distinct from a field that resolved
/// to an actual JSON null only coincidentally in rare cases — both collapse
/// to the same bucket, which is acceptable: a config whose key_fields
/// resolve to nothing for every event is a misconfigured source, not a
/// correctness hazard for the dedup invariant).
pub fn fingerprint(source_name: &str, key_values: &[Option<&serde_json::Value>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"source:");
    hasher.update(source_name.as_bytes());
    for value in key_values {
        hasher.update(b"|field:");
        match value {
            Some(v) => hasher.update(canonicalize(v).as_bytes()),
            None => hasher.update(b"null"),
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_inputs_same_fingerprint() {
        let a = json!("abc");
        let f1 = fingerprint("src", &[Some(&a)]);
        let f2 = fingerprint("src", &[Some(&a)]);
        assert_eq!(f1, f2);
    }

    #[test]
    fn number_and_string_do_not_collide() {
        let num = json!(1);
        let s = json!("1");
        assert_ne!(
            fingerprint("src", &[Some(&num)]),
            fingerprint("src", &[Some(&s)])
        );
    }

    #[test]
    fn object_key_order_does_not_matter() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(fingerprint("src", &[Some(&a)]), fingerprint("src", &[Some(&b)]));
    }

    #[test]
    fn different_source_name_changes_fingerprint() {
        let v = json!("abc");
        assert_ne!(
            fingerprint("src-a", &[Some(&v)]),
            fingerprint("src-b", &[Some(&v)])
        );
    }
}
