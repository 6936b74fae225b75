//! Deterministic branch-name derivation from ticket metadata.

/// Longest branch name we will derive. Keeps refs readable and safely below
/// filesystem and ref-name limits.
pub const MAX_BRANCH_LEN: usize = 60;

/// Derive a branch name from a ticket identifier and title.
///
/// Lower-cases both parts, collapses every run of non-alphanumeric
/// characters into a single hyphen, trims boundary hyphens, and truncates
/// to [`MAX_BRANCH_LEN`] without leaving a trailing hyphen.
pub fn derive_branch_name(identifier: &str, title: &str) -> String {
    let raw = format!("{identifier} {title}");
    let mut slug = String::with_capacity(raw.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.len() > MAX_BRANCH_LEN {
        slug.truncate(MAX_BRANCH_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    slug
}
