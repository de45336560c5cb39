//! Filename sanitization.
//!
//! Strips control characters and the class `<>:"/\|?*'`, collapses runs of
//! dots, and trims to a length cap (95 for files, 60 for folders). Built on
//! `download/filename.rs::sanitize_filename_component`, adapted from an
//! underscore-collapsing scheme to a strip-only one.

/// Maximum length for a sanitized file name component.
pub const MAX_FILE_LEN: usize = 95;
/// Maximum length for a sanitized folder name component.
pub const MAX_FOLDER_LEN: usize = 60;

const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitizes a single path component (file or folder name):
/// control characters and the forbidden class above are stripped entirely
/// (not replaced), runs of dots are collapsed to one, and the result is
/// trimmed to `max_len` chars. Idempotent: `sanitize(sanitize(x)) ==
/// sanitize(x)` — nothing this function produces is itself further
/// transformed by a second pass.
#[must_use]
pub fn sanitize_component(value: &str, max_len: usize) -> String {
    let mut stripped = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_control() || FORBIDDEN.contains(&ch) || ch == '\'' {
            continue;
        }
        stripped.push(ch);
    }

    let mut collapsed = String::with_capacity(stripped.len());
    let mut prev_dot = false;
    for ch in stripped.chars() {
        if ch == '.' {
            if !prev_dot {
                collapsed.push('.');
            }
            prev_dot = true;
        } else {
            collapsed.push(ch);
            prev_dot = false;
        }
    }

    let trimmed = collapsed.trim();
    let truncated: String = trimmed.chars().take(max_len).collect();
    truncated.trim_end_matches('.').trim().to_string()
}

/// Sanitizes a filename, preserving the extension where possible by
/// applying the length cap to the stem only.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() && e.len() <= 12 => (s, Some(e)),
        _ => (name, None),
    };
    let clean_stem = sanitize_component(stem, MAX_FILE_LEN);
    match ext {
        Some(ext) => {
            let clean_ext = sanitize_component(ext, 12);
            if clean_ext.is_empty() {
                clean_stem
            } else {
                format!("{clean_stem}.{clean_ext}")
            }
        }
        None => clean_stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_forbidden_characters() {
        assert_eq!(sanitize_component("a<b>c:d\"e/f\\g|h?i*j'k", 95), "abcdefghijk");
    }

    #[test]
    fn collapses_dot_runs() {
        assert_eq!(sanitize_component("file....name", 95), "file.name");
    }

    #[test]
    fn truncates_to_cap() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_component(&long, MAX_FILE_LEN).len(), MAX_FILE_LEN);
        let folder_cap = sanitize_component(&long, MAX_FOLDER_LEN);
        assert_eq!(folder_cap.len(), MAX_FOLDER_LEN);
    }

    #[test]
    fn is_idempotent() {
        let cases = ["a<b>c", "file....name...", "  padded  ", "normal_name-123"];
        for case in cases {
            let once = sanitize_component(case, MAX_FILE_LEN);
            let twice = sanitize_component(&once, MAX_FILE_LEN);
            assert_eq!(once, twice, "not idempotent for {case:?}");
        }
    }

    #[test]
    fn preserves_percent_encoding_verbatim() {
        assert_eq!(sanitize_component("a%20b", MAX_FILE_LEN), "a%20b");
    }

    #[test]
    fn sanitize_filename_keeps_extension() {
        assert_eq!(sanitize_filename("my<file>.jpg"), "myfile.jpg");
    }
}
