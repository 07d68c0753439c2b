//! Heuristics for correlating records coming from different engine primitives.
//!
//! Listings report full identifiers while event feeds may report truncated
//! ones (or the other way round, depending on the engine version), so two ids
//! are considered the same container when either is a prefix of the other.

/// Returns `true` if both ids are non-empty and equal (ignoring case and
/// surrounding whitespace) or one is a prefix of the other.
pub fn ids_match(left: &str, right: &str) -> bool {
    let left = left.trim().to_ascii_lowercase();
    let right = right.trim().to_ascii_lowercase();
    if left.is_empty() || right.is_empty() {
        return false;
    }

    left.starts_with(&right) || right.starts_with(&left)
}

/// Returns `true` if both names are non-empty and equal, ignoring case,
/// surrounding whitespace and a leading `/`.
pub fn names_match(left: &str, right: &str) -> bool {
    let left = normalize_name(left);
    let right = normalize_name(right);
    !left.is_empty() && left == right
}

fn normalize_name(name: &str) -> String {
    display_name(name).to_lowercase()
}

/// Correlates a stored record with an incoming event.
///
/// A matching identifier is conclusive. Otherwise the name decides, which
/// also covers a container recreated under the same name with a new id.
pub fn is_same_container(
    record_id: &str,
    record_name: &str,
    event_id: &str,
    event_name: &str,
) -> bool {
    ids_match(record_id, event_id) || names_match(record_name, event_name)
}

/// The name as it should be displayed: trimmed, without a leading `/`.
pub fn display_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix('/').unwrap_or(name)
}
