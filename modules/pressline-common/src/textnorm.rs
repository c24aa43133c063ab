use sha2::{Digest, Sha256};

/// Canonical text normalization used for dedup keys: lowercase, strip
/// punctuation, collapse whitespace runs. Idempotent by construction.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Dedup key: SHA-256 over `normalize(title) "\n" normalize(body)`, hex-encoded.
/// Must be stable across process restarts and architectures, which rules out
/// `DefaultHasher` (HashDoS randomization).
pub fn content_hash(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize(body).as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_collapses_whitespace() {
        assert_eq!(normalize("Hello,   World!"), "hello world");
        assert_eq!(normalize("  a\t\nb  "), "a b");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("Some *Markdown* title — with punctuation!");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn content_hash_ignores_formatting_differences() {
        let a = content_hash("AI Breakthrough!", "The model   improved.");
        let b = content_hash("ai breakthrough", "the model improved");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_hash_distinguishes_title_body_split() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = content_hash("ab", "c");
        let b = content_hash("a", "bc");
        assert_ne!(a, b);
    }
}
