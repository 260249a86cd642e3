//! Feature-weighted reranking
//!
//! Scores each candidate against the user query with four cheap local
//! features and keeps the best few. No model inference is involved, so the
//! pass costs microseconds per candidate:
//!
//! - original stage score (clamped), weight 0.4
//! - keyword coverage of non-stopword query tokens, weight 0.3
//! - length preference for mid-sized passages, weight 0.1
//! - query term density, weight 0.2

use std::collections::HashSet;
use std::sync::Arc;

use bookwise_core::ScoredSegment;

/// Standard English stoplist used by the keyword features
pub const STOPWORDS: [&str; 44] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will",
    "would", "should", "could", "may", "might", "can", "this", "that", "these", "those", "what",
    "which", "who", "where", "when", "why", "how",
];

/// Rerank candidates by the weighted feature score and keep the top `top_k`.
///
/// The candidate set is never changed, only its order and cutoff.
pub fn rerank(query: &str, candidates: Vec<ScoredSegment>, top_k: usize) -> Vec<ScoredSegment> {
    if candidates.len() <= top_k {
        return candidates;
    }

    let query_lower = query.to_lowercase();
    let mut scored: Vec<ScoredSegment> = candidates
        .into_iter()
        .map(|candidate| {
            let score = rerank_score(&candidate, &query_lower);
            ScoredSegment::new(Arc::clone(&candidate.segment), score)
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}

fn rerank_score(candidate: &ScoredSegment, query_lower: &str) -> f32 {
    let text_lower = candidate.segment.text.to_lowercase();

    let vector_score = candidate.score.clamp(0.0, 1.0);
    let keyword_score = keyword_match_score(&text_lower, query_lower);
    let length_score = length_score(&text_lower);
    let density_score = density_score(&text_lower, query_lower);

    let combined =
        vector_score * 0.4 + keyword_score * 0.3 + length_score * 0.1 + density_score * 0.2;
    combined.clamp(0.0, 1.0)
}

/// Fraction of non-stopword query tokens that occur in the text
fn keyword_match_score(text_lower: &str, query_lower: &str) -> f32 {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();

    let mut matched = 0usize;
    let mut total = 0usize;
    for word in query_lower.split_whitespace() {
        let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if word.is_empty() || stopwords.contains(word.as_str()) {
            continue;
        }
        total += 1;
        if text_lower.contains(&word) {
            matched += 1;
        }
    }

    if total > 0 {
        matched as f32 / total as f32
    } else {
        0.0
    }
}

/// Prefer mid-sized passages; very short and very long ones score lower
fn length_score(text: &str) -> f32 {
    let len = text.len();
    const OPTIMAL_MIN: usize = 100;
    const OPTIMAL_MAX: usize = 500;

    if len < OPTIMAL_MIN {
        len as f32 / OPTIMAL_MIN as f32 * 0.5
    } else if len <= OPTIMAL_MAX {
        1.0
    } else {
        let excess = (len - OPTIMAL_MAX) as f32;
        1.0 - (excess / OPTIMAL_MAX as f32).min(0.5)
    }
}

/// Query term frequency relative to text length
fn density_score(text_lower: &str, query_lower: &str) -> f32 {
    if text_lower.is_empty() {
        return 0.0;
    }

    let mut occurrences = 0usize;
    for word in query_lower.split_whitespace() {
        let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if word.is_empty() {
            continue;
        }
        occurrences += text_lower.match_indices(&word).count();
    }

    // Normalise against an assumed five-character average word length.
    let capacity = text_lower.len() as f32 / 5.0;
    if capacity <= 0.0 {
        return 0.0;
    }
    (occurrences as f32 / capacity / 2.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwise_core::Segment;

    fn candidate(id: usize, text: &str, score: f32) -> ScoredSegment {
        ScoredSegment::new(Arc::new(Segment::parent(id, text)), score)
    }

    #[test]
    fn test_small_candidate_sets_pass_through() {
        let candidates = vec![candidate(0, "alpha", 0.1), candidate(1, "beta", 0.9)];
        let reranked = rerank("query", candidates.clone(), 5);

        // Order and scores untouched when nothing needs cutting.
        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].segment.id, candidates[0].segment.id);
        assert_eq!(reranked[0].score, 0.1);
    }

    #[test]
    fn test_keyword_overlap_wins() {
        let padding = "unrelated filler prose about nothing in particular ".repeat(3);
        let on_topic = format!("{padding}the singleton property with a private constructor");
        let off_topic = format!("{padding}garbage collection and heap sizing strategies");

        let candidates = vec![
            candidate(0, &off_topic, 0.5),
            candidate(1, &on_topic, 0.5),
            candidate(2, &padding, 0.5),
        ];
        let reranked = rerank("singleton private constructor", candidates, 2);

        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].segment.id, "parent_1");
    }

    #[test]
    fn test_rerank_never_invents_candidates() {
        let candidates = vec![
            candidate(0, "first passage about generics", 0.3),
            candidate(1, "second passage about enums", 0.4),
            candidate(2, "third passage about lambdas", 0.5),
        ];
        let input_ids: HashSet<String> =
            candidates.iter().map(|c| c.segment.id.clone()).collect();

        let reranked = rerank("passage", candidates, 2);
        for r in &reranked {
            assert!(input_ids.contains(&r.segment.id));
        }
    }

    #[test]
    fn test_length_preference_window() {
        assert!(length_score(&"x".repeat(50)) < 1.0);
        assert_eq!(length_score(&"x".repeat(300)), 1.0);
        assert!(length_score(&"x".repeat(2000)) <= 0.5 + f32::EPSILON);
    }

    #[test]
    fn test_stopword_only_query_scores_zero_coverage() {
        assert_eq!(keyword_match_score("any text at all", "the of and"), 0.0);
    }

    #[test]
    fn test_scores_clamped_to_unit_interval() {
        let candidates = vec![
            candidate(0, "singleton singleton singleton singleton", 5.0),
            candidate(1, "unrelated", -2.0),
        ];
        let reranked = rerank("singleton", candidates, 1);
        assert!(reranked[0].score <= 1.0);
        assert!(reranked[0].score >= 0.0);
    }
}
