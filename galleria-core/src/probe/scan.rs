//! Fallback search for a JSON graph document inside arbitrary bytes.
//!
//! Used for containers without a dedicated reader (JPEG and WebP EXIF,
//! Matroska tags, audio comments): find the first balanced `{...}` region
//! that parses as a JSON object and looks like a pipeline document.

use serde_json::Value;

/// Candidate regions longer than this are not considered.
const MAX_DOCUMENT: usize = 32 * 1024 * 1024;

/// Return the first embedded graph document in `bytes`, if any.
pub fn find_document(bytes: &[u8]) -> Option<&[u8]> {
    let mut from = 0;
    while let Some(offset) = bytes[from..].iter().position(|&b| b == b'{') {
        let start = from + offset;
        from = start + 1;

        // Cheap filter: a document object starts with a quoted key.
        let next = bytes[start + 1..].iter().find(|b| !b.is_ascii_whitespace());
        if next != Some(&b'"') {
            continue;
        }

        let Some(end) = balanced_end(&bytes[start..]) else {
            continue;
        };
        let candidate = &bytes[start..start + end];
        if is_graph_document(candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Length of the balanced object starting at `data[0] == b'{'`, honoring JSON strings.
fn balanced_end(data: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in data.iter().enumerate().take(MAX_DOCUMENT) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            // Control bytes outside strings mean we wandered into binary data.
            0..=8 | 14..=31 => return None,
            _ => {}
        }
    }
    None
}

/// A JSON object with a node list, an id-keyed node, or a wrapped document.
pub fn is_graph_document(candidate: &[u8]) -> bool {
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(candidate) else {
        return false;
    };
    matches!(map.get("nodes"), Some(Value::Array(_)))
        || map.values().any(|v| v.get("class_type").is_some())
        || map
            .keys()
            .any(|k| k.eq_ignore_ascii_case("workflow") || k.eq_ignore_ascii_case("prompt"))
}
