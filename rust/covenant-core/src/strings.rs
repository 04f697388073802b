//! String helpers for diagnostic rendering.

/// Render a source snippet for inclusion in a one-line message, collapsing
/// internal whitespace and truncating long expressions.
pub fn pprint(snippet: &str) -> String {
    let collapsed: String = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, 60)
}

/// Truncate `s` to at most `max` characters, appending `…` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Trim the longest common path prefix of `a` and `b` from `path`, so two
/// file names can be shown in their shortest distinguishing form.
pub fn strip_common_prefix<'a>(path: &'a str, other: &str) -> &'a str {
    let common = path
        .bytes()
        .zip(other.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    // Cut at a path separator so we never split a component.
    let cut = path[..common].rfind('/').map(|i| i + 1).unwrap_or(0);
    &path[cut..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pprint_collapses_whitespace() {
        assert_eq!(pprint("self.x  +\n  1"), "self.x + 1");
    }

    #[test]
    fn truncate_short_is_identity() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        let t = truncate("abcdefghij", 5);
        assert_eq!(t.chars().count(), 5);
        assert!(t.ends_with('…'));
    }

    #[test]
    fn strip_common_prefix_keeps_component() {
        let a = "contracts/token/erc20.cov";
        let b = "contracts/token/vault.cov";
        assert_eq!(strip_common_prefix(a, b), "erc20.cov");
    }
}
