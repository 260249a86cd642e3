//! Intrinsic metrics
//!
//! Model-free scores computed from token sets and edit distance:
//! - context precision: how much of the retrieved context overlaps the
//!   segment the question was synthesised from
//! - answer similarity: token Jaccard blended with normalised Levenshtein

use std::collections::HashSet;

use bookwise_rag::STOPWORDS;

/// Alphabetic, at least three characters, non-stopword, lowercased
pub fn keyword_tokens(text: &str) -> HashSet<String> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphabetic())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| w.len() >= 3 && !stopwords.contains(w.as_str()))
        .collect()
}

/// Context precision over the retrieved sources
///
/// Each source is scored by the fraction of its keyword tokens that appear
/// in the ground-truth segment; a source is "relevant" above 0.3. The final
/// score blends the relevant fraction with the mean per-source precision,
/// half and half.
pub fn context_precision(sources: &[String], ground_truth_source: &str) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }

    let truth_tokens = keyword_tokens(ground_truth_source);
    let mut relevant = 0usize;
    let mut precision_sum = 0.0f64;

    for source in sources {
        let tokens = keyword_tokens(source);
        let precision = if tokens.is_empty() {
            0.0
        } else {
            let overlap = tokens.intersection(&truth_tokens).count();
            overlap as f64 / tokens.len() as f64
        };
        if precision > 0.3 {
            relevant += 1;
        }
        precision_sum += precision;
    }

    let relevant_ratio = relevant as f64 / sources.len() as f64;
    let mean_precision = precision_sum / sources.len() as f64;
    0.5 * relevant_ratio + 0.5 * mean_precision
}

/// Answer similarity against the ground truth
///
/// `0.6 * Jaccard(tokens) + 0.4 * (1 - levenshtein / max_len)`, both parts
/// computed on lowercased text.
pub fn answer_similarity(answer: &str, ground_truth: &str) -> f64 {
    let answer_lc = answer.to_lowercase();
    let truth_lc = ground_truth.to_lowercase();

    let answer_tokens = keyword_tokens(&answer_lc);
    let truth_tokens = keyword_tokens(&truth_lc);
    let jaccard = jaccard_index(&answer_tokens, &truth_tokens);

    let answer_chars: Vec<char> = answer_lc.chars().collect();
    let truth_chars: Vec<char> = truth_lc.chars().collect();
    let max_len = answer_chars.len().max(truth_chars.len());
    let edit_part = if max_len == 0 {
        1.0
    } else {
        1.0 - levenshtein(&answer_chars, &truth_chars) as f64 / max_len as f64
    };

    0.6 * jaccard + 0.4 * edit_part
}

fn jaccard_index(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Two-row Levenshtein distance over chars
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_tokens_filters() {
        let tokens = keyword_tokens("How is the Singleton a class, and why is it neat!");
        assert!(tokens.contains("singleton"));
        assert!(tokens.contains("class"));
        assert!(tokens.contains("neat"));
        assert!(!tokens.contains("the"), "stopword kept");
        assert!(!tokens.contains("how"), "question word kept");
        assert!(!tokens.contains("why"), "question word kept");
        assert!(!tokens.contains("is"), "short token kept");
    }

    #[test]
    fn test_levenshtein_basics() {
        let a: Vec<char> = "kitten".chars().collect();
        let b: Vec<char> = "sitting".chars().collect();
        assert_eq!(levenshtein(&a, &b), 3);
        assert_eq!(levenshtein(&a, &a), 0);
        assert_eq!(levenshtein(&a, &[]), 6);
    }

    #[test]
    fn test_identical_answer_scores_near_one() {
        let text = "A singleton is a class that is instantiated exactly once.";
        let score = answer_similarity(text, text);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unrelated_answer_scores_low() {
        let score = answer_similarity(
            "Garbage collection tunes heap regions.",
            "A singleton is a class instantiated exactly once.",
        );
        assert!(score < 0.4);
    }

    #[test]
    fn test_context_precision_rewards_overlap() {
        let truth = "Enforce the singleton property with a private constructor or enum";
        let good = vec!["singleton property private constructor enum".to_string()];
        let bad = vec!["completely unrelated topics about streams".to_string()];

        let high = context_precision(&good, truth);
        let low = context_precision(&bad, truth);
        assert!(high > 0.8, "high was {high}");
        assert!(low < 0.2, "low was {low}");
    }

    #[test]
    fn test_context_precision_mixed_sources() {
        let truth = "singleton property private constructor enum type";
        let sources = vec![
            "singleton property private constructor".to_string(),
            "unrelated garbage collector text".to_string(),
        ];
        let score = context_precision(&sources, truth);
        assert!(score > 0.2 && score < 0.8);
    }

    #[test]
    fn test_context_precision_empty_sources() {
        assert_eq!(context_precision(&[], "anything"), 0.0);
    }
}
