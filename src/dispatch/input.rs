//! Input-file and `--links` parsing.
//!
//! Built on `parser::reference`'s free-text URL extraction (permissive
//! regex over pasted prose), extended to support group headers
//! (`---`/`===`) and a block-quote comment toggle.

use std::sync::LazyLock;

use regex::Regex;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://\S+").expect("static URL regex is valid")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ')', ']', '}', '>', '"', '\'', ';', ':', '!', '?'];

/// One URL extracted from input, tagged with the group header (if any) it
/// appeared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputUrl {
    /// The extracted URL, trailing punctuation stripped.
    pub url: String,
    /// The most recent `--- Title ---` / `=== Title ===` header above this
    /// line, if any.
    pub group_title: Option<String>,
}

/// Parses an input file's full text into a sequence of tagged URLs:
///
/// - `#` at the start of a line starts a comment, UNLESS the line is bare
///   `#` (possibly with trailing whitespace), which toggles a block-quote
///   that suppresses every URL until the next bare `#`.
/// - A line matching `---...---` or `===...===` (dashes/equals on both
///   sides of a title) starts a new group; every URL from here on is
///   tagged with that title until the next such header.
/// - URLs are extracted from the remaining text via a permissive regex so
///   pasted prose still yields URLs.
#[must_use]
pub fn parse_input_text(text: &str) -> Vec<InputUrl> {
    let mut urls = Vec::new();
    let mut current_group: Option<String> = None;
    let mut in_block_quote = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed == "#" {
            in_block_quote = !in_block_quote;
            continue;
        }
        if in_block_quote {
            continue;
        }
        if trimmed.starts_with('#') {
            continue;
        }
        if let Some(title) = parse_group_header(trimmed) {
            current_group = Some(title);
            continue;
        }

        for found in URL_PATTERN.find_iter(line) {
            let cleaned = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            if cleaned.is_empty() {
                continue;
            }
            urls.push(InputUrl {
                url: cleaned.to_string(),
                group_title: current_group.clone(),
            });
        }
    }

    urls
}

/// Parses `--links` CLI arguments, which carry no group header.
#[must_use]
pub fn parse_link_args(links: &[String]) -> Vec<InputUrl> {
    links
        .iter()
        .map(|url| InputUrl {
            url: url.trim_end_matches(TRAILING_PUNCTUATION).to_string(),
            group_title: None,
        })
        .collect()
}

/// Recognizes a `--- Title ---` or `=== Title ===` group header, returning
/// the trimmed title. Both the leading and trailing delimiter runs must use
/// the same character and be at least 3 long; the title in between must be
/// non-empty.
fn parse_group_header(line: &str) -> Option<String> {
    for delim in ['-', '='] {
        let fence: String = std::iter::repeat(delim).take(3).collect();
        if !line.starts_with(&fence) || !line.ends_with(&fence) {
            continue;
        }
        let inner = line.trim_matches(delim).trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_urls_from_plain_lines() {
        let input = "https://a.test/1\nhttps://b.test/2\n";
        let urls = parse_input_text(input);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].url, "https://a.test/1");
        assert!(urls[0].group_title.is_none());
    }

    #[test]
    fn tags_urls_with_the_active_group() {
        let input = "--- My Group ---\nhttps://a.test/1\n=== Another ===\nhttps://b.test/2\n";
        let urls = parse_input_text(input);
        assert_eq!(urls[0].group_title.as_deref(), Some("My Group"));
        assert_eq!(urls[1].group_title.as_deref(), Some("Another"));
    }

    #[test]
    fn comment_lines_are_skipped() {
        let input = "# just a comment\nhttps://a.test/1\n";
        let urls = parse_input_text(input);
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn bare_hash_toggles_a_block_quote() {
        let input = "https://before.test/x\n#\nhttps://suppressed.test/y\n#\nhttps://after.test/z\n";
        let urls = parse_input_text(input);
        let found: Vec<&str> = urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(found, vec!["https://before.test/x", "https://after.test/z"]);
    }

    #[test]
    fn strips_trailing_punctuation_from_prose() {
        let input = "check out https://a.test/page), it's great!";
        let urls = parse_input_text(input);
        assert_eq!(urls[0].url, "https://a.test/page");
    }

    #[test]
    fn preserves_percent_encoded_paths() {
        let input = "https://a.test/a%20b/c?x=1";
        let urls = parse_input_text(input);
        assert_eq!(urls[0].url, "https://a.test/a%20b/c?x=1");
    }
}
