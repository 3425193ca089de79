//! Filename normalization.
//!
//! Every stored artifact is named from a slug of the uploaded filename: the
//! staging file gets the slug plus a uniqueness token, the converted image gets
//! the bare slug so re-uploading the same name lands on the same URL.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Characters dropped outright before whitespace is turned into hyphens.
const REMOVED_PUNCTUATION: &[char] = &['*', '+', '~', '.', '(', ')', '\'', '"', '!', ':', '@'];

/// Symbols spelled out rather than dropped, so `Tom & Jerry` keeps its meaning.
const SPELLED_SYMBOLS: &[(char, &str)] = &[
    ('&', "and"),
    ('|', "or"),
    ('<', "less"),
    ('>', "greater"),
    ('$', "dollar"),
    ('%', "percent"),
];

/// Used when nothing survives normalization (e.g. `"!!!.png"`).
pub const FALLBACK_SLUG: &str = "image";

const MAX_EXTENSION_LEN: usize = 10;

/// Keeps `<slug>-<token>.<ext>` well under common filename limits.
pub const MAX_SLUG_LEN: usize = 120;

#[derive(Default)]
struct SlugBuilder {
    slug: String,
    pending_dash: bool,
}

impl SlugBuilder {
    fn is_full(&self) -> bool {
        self.slug.len() >= MAX_SLUG_LEN
    }

    fn separate(&mut self) {
        self.pending_dash = true;
    }

    fn push_ascii(&mut self, ch: char) {
        if ch.is_ascii_whitespace() || ch == '-' {
            self.separate();
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            if self.pending_dash && !self.slug.is_empty() {
                self.slug.push('-');
            }
            self.slug.push(ch.to_ascii_lowercase());
            self.pending_dash = false;
        }
    }

    fn push_text(&mut self, text: &str) {
        text.chars().for_each(|ch| self.push_ascii(ch));
    }

    fn finish(mut self) -> String {
        self.slug.truncate(MAX_SLUG_LEN);
        while self.slug.ends_with('-') {
            self.slug.pop();
        }
        if self.slug.is_empty() {
            FALLBACK_SLUG.to_string()
        } else {
            self.slug
        }
    }
}

/// Turn arbitrary text into a lowercase, ASCII, hyphen-separated identifier.
///
/// Accents are stripped, other scripts are transliterated (`Привет` becomes
/// `privet`), and a few symbols are spelled out. The output only contains
/// `[a-z0-9_-]`, is at most [`MAX_SLUG_LEN`] bytes, never starts or ends with
/// `-` and never contains `--`, so `slugify(&slugify(x)) == slugify(x)`.
pub fn slugify(raw: &str) -> String {
    let mut builder = SlugBuilder::default();
    for ch in raw.nfkd().filter(|ch| !is_combining_mark(*ch)) {
        if builder.is_full() {
            break;
        }
        if ch.is_whitespace() {
            builder.separate();
        } else if REMOVED_PUNCTUATION.contains(&ch) {
            continue;
        } else if let Some((_, word)) = SPELLED_SYMBOLS.iter().find(|(symbol, _)| *symbol == ch) {
            builder.separate();
            builder.push_text(word);
            builder.separate();
        } else if ch.is_ascii() {
            builder.push_ascii(ch);
        } else if let Some(transliterated) = deunicode::deunicode_char(ch) {
            builder.push_text(transliterated);
        }
    }
    builder.finish()
}

/// The part of an uploaded filename that names the image: everything before the first dot.
fn name_stem(original_name: &str) -> &str {
    original_name.split('.').next().unwrap_or(original_name)
}

/// Slug of the final converted file. Deterministic: no time component.
pub fn final_slug(original_name: &str) -> String {
    slugify(name_stem(original_name))
}

pub fn extension_from_filename(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|ch| ch.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext)
}

pub fn extension_from_mime_type(mime_type: &str) -> &'static str {
    match mime_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

/// Name of the staging file for an upload: `<slug>-<token>.<ext>`.
///
/// The extension comes from the original name when it has a sane one,
/// otherwise from the declared mime type.
pub fn staging_file_name(original_name: &str, mime_type: &str, token: u128) -> String {
    let ext = extension_from_filename(original_name)
        .unwrap_or_else(|| extension_from_mime_type(mime_type).to_string());
    format!("{}-{token}.{ext}", final_slug(original_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_punctuation() {
        assert_eq!(slugify("Café Logo!"), "cafe-logo");
        assert_eq!(slugify("Niño (2024)"), "nino-2024");
        assert_eq!(slugify("it's \"quoted\" @home: ~ok*+"), "its-quoted-home-ok");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(slugify("  big \t\n banner  "), "big-banner");
        assert_eq!(slugify("a - b"), "a-b");
        assert_eq!(slugify("--edge--"), "edge");
    }

    #[test]
    fn drops_path_and_url_separators() {
        assert_eq!(slugify("../../etc/passwd"), "etcpasswd");
        assert_eq!(slugify("promo?v=2#top"), "promov2top");
        assert_eq!(slugify("a\\b;20c"), "ab20c");
    }

    #[test]
    fn falls_back_when_nothing_survives() {
        assert_eq!(slugify("!!!"), FALLBACK_SLUG);
        assert_eq!(slugify("  --  "), FALLBACK_SLUG);
        assert_eq!(slugify(""), FALLBACK_SLUG);
    }

    #[test]
    fn transliterates_other_scripts() {
        assert_eq!(slugify("Привет мир"), "privet-mir");
        assert_eq!(slugify("Ελλάδα"), "ellada");
        let cjk = slugify("横幅");
        assert_ne!(cjk, FALLBACK_SLUG);
        assert!(cjk.chars().all(|ch| ch.is_ascii_lowercase() || ch == '-'), "{cjk}");
    }

    #[test]
    fn non_latin_names_stay_distinct() {
        assert_ne!(final_slug("Привет.png"), final_slug("Пока.png"));
        assert_ne!(final_slug("Καλημέρα.png"), FALLBACK_SLUG);
        assert_ne!(final_slug("横幅.png"), final_slug("商品.png"));
    }

    #[test]
    fn spells_out_symbols() {
        assert_eq!(slugify("Tom & Jerry"), "tom-and-jerry");
        assert_eq!(slugify("R&D"), "r-and-d");
        assert_eq!(slugify("50% off"), "50-percent-off");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Café Logo!",
            "ÀÉÎÕÜ çñ",
            "  --Mixed__Case  Name--  ",
            "ﬁle ligature",
            "x.y.z",
            "emoji 🎉 party",
            "Привет & Пока",
            "Καλημέρα κόσμε",
            "横幅 商品",
            "tab\tseparated\tname",
            "",
            "already-a-slug",
        ];
        for sample in samples {
            let once = slugify(sample);
            assert_eq!(slugify(&once), once, "input: {sample:?}");
        }
    }

    #[test]
    fn long_names_are_capped() {
        let raw = "word ".repeat(100);
        let slug = slugify(&raw);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert_eq!(slugify(&slug), slug);
    }

    #[test]
    fn final_slug_uses_text_before_first_dot() {
        assert_eq!(final_slug("Café Logo!.png"), "cafe-logo");
        assert_eq!(final_slug("summer.sale.banner.jpg"), "summer");
        assert_eq!(final_slug(".hidden.png"), FALLBACK_SLUG);
    }

    #[test]
    fn staging_name_carries_token_and_extension() {
        assert_eq!(
            staging_file_name("Café Logo!.png", "image/png", 1700000000123),
            "cafe-logo-1700000000123.png"
        );
        assert_eq!(staging_file_name("photo", "image/jpeg", 7), "photo-7.jpg");
        assert_eq!(staging_file_name("weird.p/ng", "image/png", 7), "weird-7.png");
        assert_eq!(staging_file_name("blob", "application/octet-stream", 7), "blob-7.bin");
    }

    #[test]
    fn final_slug_is_independent_of_staging_token() {
        let first = staging_file_name("Banner.png", "image/png", 1);
        let second = staging_file_name("Banner.png", "image/png", 2);
        assert_ne!(first, second);
        assert_eq!(final_slug("Banner.png"), "banner");
    }
}
