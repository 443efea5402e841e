//! Path normalization.
//!
//! Every path inside kasane is a normalized string: no leading or trailing
//! separator, components joined by a single `/`, and the empty string for the
//! root. Paths are always relative to the root of the filesystem that owns
//! them.

/// The one and only component separator.
pub const SEPARATOR: char = '/';

/// Canonicalize a path string.
///
/// Surrounding whitespace and separators are stripped, runs of internal
/// separators collapse to one, and with `case_insensitive` the result is
/// folded to lowercase. Empty, whitespace-only and separator-only input all
/// normalize to `""` (the root). Idempotent.
pub fn normalize(path: &str, case_insensitive: bool) -> String {
    let trimmed = path.trim_matches(|c: char| c.is_whitespace() || c == SEPARATOR);

    let mut out = String::with_capacity(trimmed.len());
    for component in components(trimmed) {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(component);
    }

    if case_insensitive {
        out.to_lowercase()
    } else {
        out
    }
}

/// Iterate the non-empty components of a path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

/// Join a normalized parent with a (possibly unnormalized) relative path.
pub fn join(parent: &str, child: &str) -> String {
    let child = normalize(child, false);
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child,
        (false, true) => parent.to_string(),
        (false, false) => format!("{parent}{SEPARATOR}{child}"),
    }
}

/// Parent of a normalized path.
///
/// `None` for the root and for top-level names, whose parent is the root.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind(SEPARATOR).map(|idx| &path[..idx])
}

/// Last component of a normalized path (`""` for the root).
pub fn file_name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Split a normalized path into its first component and the remainder.
pub fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once(SEPARATOR) {
        Some((first, rest)) => (first, Some(rest)),
        None => (path, None),
    }
}

/// Whether `path` equals `ancestor` or lies beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path[ancestor.len()..].starts_with(SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_trims() {
        assert_eq!(normalize("", false), "");
        assert_eq!(normalize("test", false), "test");
        assert_eq!(normalize("  test", false), "test");
        assert_eq!(normalize("test  ", false), "test");
        assert_eq!(normalize("  test  ", false), "test");
        assert_eq!(normalize("test///", false), "test");
        assert_eq!(normalize("///test", false), "test");
        assert_eq!(normalize("///test/test///", false), "test/test");
        assert_eq!(normalize("///a/b///", false), "a/b");
    }

    #[test]
    fn test_normalize_collapses_separators() {
        assert_eq!(normalize("a//b///c", false), "a/b/c");
        assert_eq!(normalize(" / a / ", false), "a");
    }

    #[test]
    fn test_normalize_root_forms() {
        assert_eq!(normalize("   ", false), "");
        assert_eq!(normalize("////", false), "");
        assert_eq!(normalize(" / / ", false), "");
    }

    #[test]
    fn test_normalize_case_folding() {
        assert_eq!(normalize("/Docs/README.md", true), "docs/readme.md");
        assert_eq!(normalize("/Docs/README.md", false), "Docs/README.md");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", "b/c"), "a/b/c");
        assert_eq!(join("a", "/b//c/"), "a/b/c");
        assert_eq!(join("a", ""), "a");
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("a/b/c"), Some("a/b"));
        assert_eq!(parent("a"), None);
        assert_eq!(parent(""), None);
        assert_eq!(file_name("a/b/c"), "c");
        assert_eq!(file_name("a"), "a");
        assert_eq!(file_name(""), "");
    }

    #[test]
    fn test_split_first() {
        assert_eq!(split_first("a/b/c"), ("a", Some("b/c")));
        assert_eq!(split_first("a"), ("a", None));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("a/b", "a"));
        assert!(is_within("a", "a"));
        assert!(is_within("anything", ""));
        assert!(!is_within("ab", "a"));
        assert!(!is_within("a", "a/b"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in "[ a-zA-Z0-9/._-]{0,32}", fold in any::<bool>()) {
            let once = normalize(&s, fold);
            prop_assert_eq!(normalize(&once, fold), once.clone());
            prop_assert!(!once.starts_with(SEPARATOR));
            prop_assert!(!once.ends_with(SEPARATOR));
            prop_assert!(!once.contains("//"));
        }
    }
}
