//! Extraction of media references from note field text. Only the two
//! markup patterns the ecosystem uses are recognized: `[sound:file]`
//! directives and `<img src=...>` tags.

use regex::Regex;

pub struct MediaRefs {
    sound: Regex,
    img: Regex,
    remote: Regex,
}

impl Default for MediaRefs {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRefs {
    pub fn new() -> Self {
        Self {
            sound: Regex::new(r"(?i)\[sound:([^\]]+)\]").unwrap(),
            img: Regex::new(r#"(?i)<img[^>]+src=["']?([^"'>]+)["']?[^>]*>"#).unwrap(),
            remote: Regex::new(r"(?i)^(?:https?|ftp)://").unwrap(),
        }
    }

    /// All local media filenames referenced by `text`. Remote references
    /// are skipped; the media folder never tracks them.
    pub fn files_in_str<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        for caps in self.sound.captures_iter(text) {
            out.push(caps.get(1).unwrap().as_str());
        }
        for caps in self.img.captures_iter(text) {
            out.push(caps.get(1).unwrap().as_str());
        }
        out.retain(|f| !self.remote.is_match(f));
        out
    }

    /// Remove all media references from `text`.
    pub fn strip_refs(&self, text: &str) -> String {
        let text = self.sound.replace_all(text, "");
        self.img.replace_all(&text, "").into_owned()
    }

    /// Rewrite each referenced filename through `rename`; `None` keeps the
    /// reference unchanged. Used by the import merger when the media
    /// manager disambiguates a same-named file with different content.
    pub fn rewrite_refs<F>(&self, text: &str, mut rename: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        let remote = &self.remote;
        let mut rewrite = |caps: &regex::Captures<'_>| -> String {
            let whole = caps.get(0).unwrap().as_str();
            let fname = caps.get(1).unwrap();
            if remote.is_match(fname.as_str()) {
                return whole.to_string();
            }
            match rename(fname.as_str()) {
                Some(new_name) => {
                    let start = fname.start() - caps.get(0).unwrap().start();
                    let end = fname.end() - caps.get(0).unwrap().start();
                    format!("{}{}{}", &whole[..start], new_name, &whole[end..])
                }
                None => whole.to_string(),
            }
        };
        let text = self
            .sound
            .replace_all(text, |caps: &regex::Captures<'_>| rewrite(caps));
        self.img
            .replace_all(&text, |caps: &regex::Captures<'_>| rewrite(caps))
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sounds_and_images() {
        let refs = MediaRefs::new();
        let text = r#"hola [sound:es_hola.mp3] <img src="hola.jpg"> plain"#;
        assert_eq!(refs.files_in_str(text), vec!["es_hola.mp3", "hola.jpg"]);
    }

    #[test]
    fn remote_urls_are_ignored() {
        let refs = MediaRefs::new();
        let text = r#"<img src="https://example.com/x.png"> [sound:local.mp3]"#;
        assert_eq!(refs.files_in_str(text), vec!["local.mp3"]);
    }

    #[test]
    fn strip_removes_markup() {
        let refs = MediaRefs::new();
        let out = refs.strip_refs(r#"a [sound:x.mp3] b <img src="y.jpg"> c"#);
        assert_eq!(out, "a  b  c");
    }

    #[test]
    fn rewrite_renames_only_matched() {
        let refs = MediaRefs::new();
        let text = r#"[sound:a.mp3] <img src="b.jpg">"#;
        let out = refs.rewrite_refs(text, |f| {
            if f == "b.jpg" {
                Some("b (1).jpg".to_string())
            } else {
                None
            }
        });
        assert_eq!(out, r#"[sound:a.mp3] <img src="b (1).jpg">"#);
    }
}
