//! Retrieval feature flags
//!
//! Each optimisation in the retrieval pipeline can be switched off
//! independently for ablation studies. All flags default to on.

use serde::{Deserialize, Serialize};

/// Ablation switches for the retrieval pipeline
///
/// - `hybrid_search = false`: lexical search is skipped, each branch becomes
///   vector-only
/// - `stepback = false`: the step-back branch is skipped, only the
///   normalised query is searched
/// - `hyde = false`: hypothetical answers are not generated, the query
///   itself is embedded
/// - `rerank = false`: fused order is kept, no feature reranking
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RagFeatures {
    #[serde(default = "default_true")]
    pub hyde: bool,
    #[serde(default = "default_true")]
    pub stepback: bool,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default = "default_true")]
    pub hybrid_search: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RagFeatures {
    fn default() -> Self {
        Self {
            hyde: true,
            stepback: true,
            rerank: true,
            hybrid_search: true,
        }
    }
}

impl RagFeatures {
    /// All features off, leaving a pure vector top-k pipeline
    pub fn baseline() -> Self {
        Self {
            hyde: false,
            stepback: false,
            rerank: false,
            hybrid_search: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_all_on() {
        let features = RagFeatures::default();
        assert!(features.hyde);
        assert!(features.stepback);
        assert!(features.rerank);
        assert!(features.hybrid_search);
    }

    #[test]
    fn test_missing_fields_default_on() {
        let features: RagFeatures = serde_json::from_str("{\"hyde\": false}").unwrap();
        assert!(!features.hyde);
        assert!(features.stepback);
        assert!(features.hybrid_search);
    }
}
