//! Draft quality heuristics: length, paragraph structure, headings. A score
//! below the configured threshold sends the topic back for another pass with
//! the draft preserved.

/// Score a draft in `[0.0, 1.0]`.
pub fn assess(content: &str) -> f32 {
    let words = word_count(content);
    let paragraphs = content
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();
    let headings = content
        .lines()
        .filter(|l| l.trim_start().starts_with('#'))
        .count();

    // Length carries most of the weight: 1000 words saturates it.
    let length_score = (words as f32 / 1000.0).min(1.0) * 0.6;
    let structure_score = if paragraphs >= 5 { 0.25 } else { paragraphs as f32 * 0.05 };
    let heading_score = if headings >= 2 { 0.15 } else { headings as f32 * 0.07 };

    length_score + structure_score + heading_score
}

pub fn word_count(content: &str) -> u32 {
    content.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_article() -> String {
        let mut out = String::from("# Title\n\n");
        for i in 0..8 {
            out.push_str(&format!("## Section {i}\n\n"));
            out.push_str(&"meaningful words follow here today ".repeat(30));
            out.push_str("\n\n");
        }
        out
    }

    #[test]
    fn long_structured_article_scores_high() {
        let score = assess(&long_article());
        assert!(score > 0.8, "score: {score}");
    }

    #[test]
    fn short_fragment_scores_low() {
        let score = assess("A two sentence draft. Not much here.");
        assert!(score < 0.2, "score: {score}");
    }

    #[test]
    fn score_is_bounded() {
        let score = assess(&long_article().repeat(4));
        assert!(score <= 1.0);
    }
}
