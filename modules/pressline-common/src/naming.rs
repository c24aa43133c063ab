//! Slug, filename, and URL derivation. These values are produced exactly once
//! by the processor's metadata step and reused verbatim by every downstream
//! stage; URL/filename drift is a contract violation, not a recoverable state.

use chrono::NaiveDate;

/// Maximum slug length in bytes (trimmed at a word boundary).
pub const MAX_SLUG_LEN: usize = 80;

/// Maximum total filename length in bytes.
pub const MAX_FILENAME_BYTES: usize = 120;

/// Normalize a title into a URL-safe slug: ASCII-fold, lowercase, replace
/// runs of non-`[a-z0-9]` with a single hyphen, trim to [`MAX_SLUG_LEN`] at a
/// word boundary. Non-Latin titles must be translated before slugging; for
/// those this returns an empty string and the caller rejects.
///
/// ```
/// assert_eq!(pressline_common::slugify("AI Breakthrough"), "ai-breakthrough");
/// assert_eq!(pressline_common::slugify("Café  «réservé»!"), "cafe-reserve");
/// assert_eq!(pressline_common::slugify("C++ vs. Rust: 2025"), "c-vs-rust-2025");
/// ```
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    let mut push = |c: char, out: &mut String, pending: &mut bool| {
        if c.is_ascii_alphanumeric() {
            if *pending && !out.is_empty() {
                out.push('-');
            }
            *pending = false;
            out.push(c.to_ascii_lowercase());
        } else {
            *pending = true;
        }
    };
    for c in title.chars() {
        if c.is_ascii() {
            push(c, &mut out, &mut pending_hyphen);
        } else {
            let folded = ascii_fold(c);
            if folded.is_empty() {
                pending_hyphen = true;
            }
            for f in folded.chars() {
                push(f, &mut out, &mut pending_hyphen);
            }
        }
    }
    truncate_at_word_boundary(&out, MAX_SLUG_LEN)
}

/// Derive the canonical filename `{YYYY-MM-DD}-{slug}.{ext}`.
pub fn filename_for(date: NaiveDate, slug: &str, ext: &str) -> String {
    format!("{}-{}.{}", date.format("%Y-%m-%d"), slug, ext)
}

/// Derive the public URL for a filename: `/articles/{stem}.html`.
/// The URL and the filename come from the same canonical string.
pub fn article_url(filename: &str) -> String {
    format!("/articles/{}.html", stem(filename))
}

/// Filename without its extension.
pub fn stem(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename)
}

/// Validate a filename against the grammar
/// `^[0-9]{4}-[0-9]{2}-[0-9]{2}-[a-z0-9-]+\.(md|html|json)$`, ASCII-only,
/// at most [`MAX_FILENAME_BYTES`] bytes, no empty or doubled slug segments.
pub fn is_valid_filename(name: &str) -> bool {
    if !name.is_ascii() || name.len() > MAX_FILENAME_BYTES {
        return false;
    }
    let re = regex::Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}-[a-z0-9]+(-[a-z0-9]+)*\.(md|html|json)$")
        .expect("Invalid filename grammar regex");
    re.is_match(name)
}

/// Map a non-ASCII char onto its ASCII approximation. Covers the Latin-1 and
/// Latin Extended-A ranges; anything else folds to nothing (the metadata step
/// translates such titles before slugging).
fn ascii_fold(c: char) -> &'static str {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "a",
        'æ' | 'Æ' => "ae",
        'ç' | 'ć' | 'č' | 'Ç' | 'Ć' | 'Č' => "c",
        'ď' | 'đ' | 'Ď' | 'Đ' | 'ð' | 'Ð' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "e",
        'ğ' | 'ģ' | 'Ğ' | 'Ģ' => "g",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' | 'İ' => "i",
        'ļ' | 'ł' | 'Ļ' | 'Ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' | 'Ñ' | 'Ń' | 'Ņ' | 'Ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "o",
        'œ' | 'Œ' => "oe",
        'ŕ' | 'ř' | 'Ŕ' | 'Ř' => "r",
        'ś' | 'ş' | 'š' | 'Ś' | 'Ş' | 'Š' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'Ţ' | 'Ť' | 'þ' | 'Þ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' | 'Ų' => "u",
        'ý' | 'ÿ' | 'Ý' | 'Ÿ' => "y",
        'ź' | 'ż' | 'ž' | 'Ź' | 'Ż' | 'Ž' => "z",
        _ => "",
    }
}

fn truncate_at_word_boundary(slug: &str, max: usize) -> String {
    if slug.len() <= max {
        return slug.to_string();
    }
    match slug[..max].rfind('-') {
        Some(i) => slug[..i].to_string(),
        None => slug[..max].to_string(),
    }
}
