//! Plain-text mirrorlist parser.

/// Parse a plain mirrorlist: one URL per non-blank, non-`#` line.
#[must_use]
pub fn parse(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Heuristic used by the resolver to tell a mirrorlist apart from a
/// metalink document sharing the same `mirrorlist_url` slot: an XML prolog
/// or a `<metalink` tag means metalink.
#[must_use]
pub fn looks_like_metalink(content: &str) -> bool {
    let head = content.trim_start();
    head.starts_with("<?xml") || content.contains("<metalink")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blanks() {
        let content = "# comment\n\nhttp://a/\n  http://b/  \n#another\n";
        assert_eq!(parse(content), vec!["http://a/", "http://b/"]);
    }

    #[test]
    fn detects_metalink_by_prolog() {
        assert!(looks_like_metalink("<?xml version=\"1.0\"?><metalink/>"));
        assert!(looks_like_metalink("<metalink xmlns=\"...\">"));
        assert!(!looks_like_metalink("http://mirror.example.com/repo\n"));
    }
}
