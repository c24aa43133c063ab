//! Prompt construction for the three generation tasks the pipeline performs:
//! article drafting, title translation, and SEO metadata. Kept together so
//! prompt text is reviewable in one place.

use crate::traits::GenerationRequest;

const ARTICLE_SYSTEM: &str = "You are a technology journalist writing clear, \
well-structured long-form articles. Write in plain English prose with \
markdown headings. Do not fabricate quotes or statistics.";

const TRANSLATE_SYSTEM: &str = "You translate headlines into concise, natural \
English. Respond with the translated headline only, no quotes, no commentary.";

const SEO_SYSTEM: &str = "You write SEO metadata. Respond with exactly two \
lines: line 1 is a title of at most 60 characters, line 2 is a description of \
at most 160 characters. No labels, no extra lines.";

/// Draft (or improve) an article for a topic. `prior_draft` carries the best
/// draft from an earlier attempt so research is not restarted.
pub fn article_request(
    title: &str,
    source_context: &str,
    prior_draft: Option<&str>,
) -> GenerationRequest {
    let mut prompt = format!(
        "Write a complete article (at least 800 words) about the following topic.\n\n\
         Topic: {title}\n\nSource material:\n{source_context}\n"
    );
    if let Some(draft) = prior_draft {
        prompt.push_str(&format!(
            "\nAn earlier draft is below. Improve its depth and structure rather \
             than starting over.\n\n{draft}\n"
        ));
    }
    GenerationRequest {
        system: ARTICLE_SYSTEM.to_string(),
        prompt,
        max_tokens: 4096,
        temperature: 0.7,
    }
}

/// Translate a non-English title. Short prompt, deterministic output.
pub fn translate_request(title: &str) -> GenerationRequest {
    GenerationRequest {
        system: TRANSLATE_SYSTEM.to_string(),
        prompt: title.to_string(),
        max_tokens: 100,
        temperature: 0.0,
    }
}

/// SEO title + meta description for a finished article.
pub fn seo_request(title: &str, article_excerpt: &str) -> GenerationRequest {
    GenerationRequest {
        system: SEO_SYSTEM.to_string(),
        prompt: format!("Title: {title}\n\nArticle opening:\n{article_excerpt}"),
        max_tokens: 150,
        temperature: 0.0,
    }
}
