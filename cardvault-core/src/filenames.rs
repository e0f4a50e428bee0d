//! Filename policy for the media folder. Media filenames must survive
//! every filesystem the collection may travel to, so a fixed set of
//! characters is banned outright.

use regex::Regex;

/// Characters unsafe across filesystems: path separators, colon, pipe,
/// NUL, quoting and wildcard glyphs.
pub const ILLEGAL_CHARS: &[char] = &[
    '[', ']', '<', '>', ':', '"', '/', '?', '*', '^', '\\', '|', '\0',
];

pub fn has_illegal(name: &str) -> bool {
    name.chars().any(|c| ILLEGAL_CHARS.contains(&c))
}

/// Remove illegal characters. A normalization helper used before naming
/// new files; it never renames anything already on disk.
pub fn strip_illegal(name: &str) -> String {
    name.chars().filter(|c| !ILLEGAL_CHARS.contains(c)).collect()
}

/// Split `name` into (stem, extension-with-dot). A leading dot does not
/// count as an extension.
pub fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    }
}

/// Bump the ` (n)` ordinal on a filename stem: `photo` becomes
/// `photo (1)`, `photo (1)` becomes `photo (2)`.
pub fn bump_ordinal(stem: &str) -> String {
    let re = Regex::new(r" \((\d+)\)$").unwrap();
    if let Some(caps) = re.captures(stem) {
        let n: u64 = caps[1].parse().unwrap_or(0);
        re.replace(stem, format!(" ({})", n + 1).as_str()).into_owned()
    } else {
        format!("{stem} (1)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_the_illegal_set() {
        assert_eq!(strip_illegal("a/b\\c:d|e?.jpg"), "abcde.jpg");
        assert!(!has_illegal("plain name.jpg"));
        assert!(has_illegal("img<1>.png"));
    }

    #[test]
    fn ext_split() {
        assert_eq!(split_ext("photo.jpg"), ("photo", ".jpg"));
        assert_eq!(split_ext("noext"), ("noext", ""));
        assert_eq!(split_ext(".hidden"), (".hidden", ""));
    }

    #[test]
    fn ordinals_count_up() {
        assert_eq!(bump_ordinal("photo"), "photo (1)");
        assert_eq!(bump_ordinal("photo (1)"), "photo (2)");
        assert_eq!(bump_ordinal("photo (9)"), "photo (10)");
    }
}
