//! Path-addressed masking of JSON values.
//!
//! A path is a dot-separated list of segments. A segment names an object
//! field, an array index when it parses as one, or every element of an array
//! when it is [`WILDCARD`]. Segments that do not resolve are ignored.

use serde_json::Value;

/// Replacement written over masked leaves.
pub const DEFAULT_MASK: &str = "***";

/// Segment matching every element of an array.
pub const WILDCARD: &str = "*";

/// Returns a copy of `data` with every path in `paths` masked by `token`.
///
/// `data` itself is never modified.
pub fn mask_value<P: AsRef<str>>(data: &Value, paths: &[P], token: &str) -> Value {
    let mut masked = data.clone();
    for path in paths {
        let segments: Vec<&str> = path.as_ref().split('.').collect();
        apply_mask(&mut masked, &segments, token);
    }
    masked
}

fn apply_mask(node: &mut Value, segments: &[&str], token: &str) {
    let Some((current, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        mask_leaf(node, current, token);
        return;
    }

    if *current == WILDCARD {
        if let Value::Array(items) = node {
            for item in items {
                apply_mask(item, rest, token);
            }
            return;
        }
    }

    if let Some(child) = child_mut(node, current) {
        apply_mask(child, rest, token);
    }
}

fn mask_leaf(node: &mut Value, segment: &str, token: &str) {
    if segment == WILDCARD {
        if let Value::Array(items) = node {
            items.fill(Value::String(token.to_string()));
            return;
        }
    }

    if let Some(target) = child_mut(node, segment) {
        *target = Value::String(token.to_string());
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(fields) => fields.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    }
}
