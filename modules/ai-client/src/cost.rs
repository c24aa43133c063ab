//! USD cost accounting per model. Prices are per million tokens; unknown
//! models fall back to the most expensive known tier so budgets overestimate
//! rather than undercount.

/// (model prefix, input $/1M tokens, output $/1M tokens)
const PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
];

const FALLBACK: (f64, f64) = (2.50, 10.00);

/// Cost in USD for one generation.
pub fn cost_usd(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    // Longest-prefix match so "gpt-4o-mini" doesn't price as "gpt-4o".
    let (input, output) = PRICING
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(FALLBACK);
    (prompt_tokens as f64 * input + completion_tokens as f64 * output) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_is_priced_as_mini() {
        let cost = cost_usd("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        let cost = cost_usd("experimental-model", 1_000_000, 0);
        assert!((cost - 2.50).abs() < 1e-9);
    }
}
