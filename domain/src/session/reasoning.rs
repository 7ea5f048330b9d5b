//! Reasoning ("thinking") text accumulation.
//!
//! Vendors resend reasoning either as pure deltas or as cumulative snapshots,
//! and some repeat fragments on reconnect. [`merge_reasoning`] folds any of
//! these into one accumulated string.

/// Merge a newly received reasoning fragment into the accumulated text.
///
/// - `fragment` starts with `existing`: cumulative snapshot, take `fragment`.
/// - `existing` starts with `fragment`: stale or duplicate, keep `existing`.
/// - otherwise append `fragment` minus the longest prefix that overlaps the
///   tail of `existing`.
///
/// Overlap is measured in whole characters.
pub fn merge_reasoning(existing: &str, fragment: &str) -> String {
    if fragment.starts_with(existing) {
        return fragment.to_string();
    }
    if existing.starts_with(fragment) {
        return existing.to_string();
    }

    let overlap = longest_overlap(existing, fragment);
    let mut merged = String::with_capacity(existing.len() + fragment.len() - overlap);
    merged.push_str(existing);
    merged.push_str(&fragment[overlap..]);
    merged
}

/// Length in bytes of the longest suffix of `head` that is also a prefix of
/// `tail`, restricted to character boundaries.
fn longest_overlap(head: &str, tail: &str) -> usize {
    let max = head.len().min(tail.len());
    (1..=max)
        .rev()
        .find(|&k| {
            let start = head.len() - k;
            head.is_char_boundary(start)
                && tail.is_char_boundary(k)
                && head[start..] == tail[..k]
        })
        .unwrap_or(0)
}
