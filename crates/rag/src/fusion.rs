//! Reciprocal rank fusion

use std::collections::HashMap;
use std::sync::Arc;

use bookwise_core::ScoredSegment;

/// Standard RRF k parameter from the literature; larger values flatten the
/// weight given to top ranks.
pub const RRF_K: f32 = 60.0;

/// Combine two ranked result lists by summing `1 / (k + rank)` per segment
/// (ranks 1-indexed), so items present in both lists rise to the top. The
/// original stage scores are discarded; the fused score becomes the segment
/// score. Ordering is by fused score descending.
pub fn reciprocal_rank_fusion(
    first: &[ScoredSegment],
    second: &[ScoredSegment],
    k: f32,
) -> Vec<ScoredSegment> {
    let mut fused: HashMap<String, ScoredSegment> = HashMap::new();

    for list in [first, second] {
        for (rank, result) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f32 + 1.0);
            fused
                .entry(result.segment.id.clone())
                .and_modify(|entry| entry.score += contribution)
                .or_insert_with(|| {
                    ScoredSegment::new(Arc::clone(&result.segment), contribution)
                });
        }
    }

    let mut combined: Vec<ScoredSegment> = fused.into_values().collect();
    combined.sort_by(|a, b| b.score.total_cmp(&a.score));
    combined
}
