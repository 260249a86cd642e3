//! End-to-end retrieval scenarios with stubbed models

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use bookwise_config::RagFeatures;
use bookwise_core::{
    ChunkStream, Embedder, GenerateRequest, GenerateResponse, LanguageModel, Result, Segment,
};
use bookwise_index::ChunkIndex;
use bookwise_rag::{rerank, HybridRetriever};

/// Embedder that maps texts onto topic basis vectors and records its inputs
struct StubEmbedder {
    calls: Mutex<Vec<String>>,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn saw_input_containing(&self, needle: &str) -> bool {
        self.calls.lock().iter().any(|c| c.contains(needle))
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().push(text.to_string());
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; 4];
        if lower.contains("singleton") {
            v[0] = 1.0;
        } else if lower.contains("inheritance") || lower.contains("composition") {
            v[1] = 1.0;
        } else if lower.contains("generics") {
            v[2] = 1.0;
        } else {
            v[3] = 1.0;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Generator stub scripted per prompt kind, with call accounting
struct StubLlm {
    calls: Mutex<Vec<String>>,
}

impl StubLlm {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    fn translation_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with("Translate"))
            .count()
    }
}

#[async_trait]
impl LanguageModel for StubLlm {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().push(prompt.clone());

        if prompt.starts_with("Translate") {
            Ok(GenerateResponse::text("singleton pattern best implementation"))
        } else if prompt.contains("higher-level") {
            Ok(GenerateResponse::text(
                "What are the creational design patterns for singletons?",
            ))
        } else {
            Ok(GenerateResponse::text(
                "A singleton is a class instantiated exactly once; prefer an enum type.",
            ))
        }
    }

    fn generate_stream<'a>(&'a self, _request: GenerateRequest) -> ChunkStream<'a> {
        Box::pin(futures::stream::empty())
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// Three-parent corpus with children cut verbatim from their parents
fn build_index() -> ChunkIndex {
    let mut singleton_parent = Segment::parent(
        0,
        "Item 3: Enforce the singleton property with a private constructor or an enum type. \
         The preferred way to create singletons is a single-element enum. A singleton is \
         simply a class that is instantiated exactly once.",
    );
    singleton_parent.metadata.item_id = Some("3".into());
    singleton_parent.metadata.item_label = Some("Item 3".into());
    singleton_parent.metadata.chapter_id = Some("2".into());
    singleton_parent.metadata.chapter_label = Some("Chapter 2".into());

    let mut inheritance_parent = Segment::parent(
        1,
        "Item 18: Favor composition over inheritance. Inheritance violates encapsulation \
         when it crosses package boundaries, so forward to a contained instance instead.",
    );
    inheritance_parent.metadata.item_id = Some("18".into());
    inheritance_parent.metadata.item_label = Some("Item 18".into());

    let mut generics_parent = Segment::parent(
        2,
        "Item 26: Do not use raw types. Generics provide compile-time safety and \
         expressiveness; raw types exist only for migration compatibility.",
    );
    generics_parent.metadata.item_id = Some("26".into());
    generics_parent.metadata.item_label = Some("Item 26".into());

    let children = vec![
        Segment::child(
            &singleton_parent,
            0,
            "Enforce the singleton property with a private constructor or an enum type.",
        ),
        Segment::child(
            &singleton_parent,
            1,
            "The preferred way to create singletons is a single-element enum.",
        ),
        Segment::child(
            &inheritance_parent,
            0,
            "Favor composition over inheritance. Inheritance violates encapsulation",
        ),
        Segment::child(
            &generics_parent,
            0,
            "Generics provide compile-time safety and expressiveness",
        ),
    ];

    let embedder = StubEmbedder::new();
    let embeddings = children
        .iter()
        .map(|c| embedder.embed(&c.text).unwrap())
        .collect();

    ChunkIndex::ingest(
        "effective-java.txt",
        vec![singleton_parent, inheritance_parent, generics_parent],
        children,
        embeddings,
    )
    .unwrap()
}

fn build_retriever(
    index: Arc<ChunkIndex>,
    embedder: Arc<StubEmbedder>,
    llm: Arc<StubLlm>,
    features: RagFeatures,
) -> HybridRetriever {
    HybridRetriever::new(index, embedder, llm, features, "Effective Java")
}

#[tokio::test]
async fn test_english_query_all_features_on() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let retriever = build_retriever(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        RagFeatures::default(),
    );

    let results = retriever
        .retrieve(
            "What is the preferred way to create singletons?",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty() && results.len() <= 5);
    let first = &results[0];
    assert_eq!(first.segment.metadata.item_id.as_deref(), Some("3"));
    assert!(first.segment.text.contains("Item 3"));

    // No translation for an English query; step-back and two HyDE calls ran.
    assert_eq!(llm.translation_calls(), 0);
    assert_eq!(llm.total_calls(), 3);

    // Results are parents, sorted by score, without duplicates.
    let ids: std::collections::HashSet<&str> =
        results.iter().map(|r| r.segment.id.as_str()).collect();
    assert_eq!(ids.len(), results.len());
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_non_english_query_translates_exactly_once() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    // HyDE off so the translated query itself reaches the embedder.
    let features = RagFeatures {
        hyde: false,
        stepback: false,
        ..Default::default()
    };
    let retriever = build_retriever(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        features,
    );

    let results = retriever
        .retrieve("单例模式的最佳实现是什么?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(llm.translation_calls(), 1);
    assert_eq!(llm.total_calls(), 1);
    assert!(embedder.saw_input_containing("singleton pattern best implementation"));

    assert!(!results.is_empty());
    assert_eq!(results[0].segment.metadata.item_id.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_hybrid_disabled_equals_vector_only_pipeline() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let features = RagFeatures {
        hybrid_search: false,
        stepback: false,
        ..Default::default()
    };
    let retriever = build_retriever(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        features,
    );

    let query = "What is the preferred way to create singletons?";
    let results = retriever
        .retrieve(query, &CancellationToken::new())
        .await
        .unwrap();

    // Recompute the expected pipeline by hand: vector search on the HyDE
    // answer, rerank, then promote to parents deduplicating in order.
    let hyde_vector = embedder
        .embed("A singleton is a class instantiated exactly once; prefer an enum type.")
        .unwrap();
    let vector_hits = index.vector_search(&hyde_vector, 20);
    let reranked = rerank(query, vector_hits, 5);

    let mut expected_parent_ids: Vec<String> = Vec::new();
    for child in &reranked {
        let parent = index.parent_of(&child.segment).unwrap();
        if !expected_parent_ids.contains(&parent.id) {
            expected_parent_ids.push(parent.id.clone());
        }
    }
    expected_parent_ids.truncate(5);

    let got_ids: Vec<String> = results.iter().map(|r| r.segment.id.clone()).collect();
    assert_eq!(got_ids, expected_parent_ids);
}

#[tokio::test]
async fn test_all_ablations_off_is_pure_vector_top5() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let retriever = build_retriever(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        RagFeatures::baseline(),
    );

    let query = "How should singletons be created?";
    let results = retriever
        .retrieve(query, &CancellationToken::new())
        .await
        .unwrap();

    // The baseline makes no generator calls at all.
    assert_eq!(llm.total_calls(), 0);

    let query_vector = embedder.embed(query).unwrap();
    let mut expected: Vec<(String, f32)> = Vec::new();
    for hit in index.vector_search(&query_vector, 20).into_iter().take(5) {
        let parent = index.parent_of(&hit.segment).unwrap();
        match expected.iter_mut().find(|(id, _)| *id == parent.id) {
            Some((_, score)) => *score = score.max(hit.score),
            None => expected.push((parent.id.clone(), hit.score)),
        }
    }
    expected.truncate(5);

    assert_eq!(results.len(), expected.len());
    for (got, (id, score)) in results.iter().zip(expected.iter()) {
        assert_eq!(&got.segment.id, id);
        assert_eq!(got.score, *score);
    }
}

#[tokio::test]
async fn test_basic_search_is_vector_only_over_children() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let retriever = build_retriever(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        RagFeatures::default(),
    );

    let query = "singleton private constructor";
    let results = retriever
        .basic_search(query, 3, &CancellationToken::new())
        .await
        .unwrap();

    // No expansion of any kind, and the raw children come back unpromoted.
    assert_eq!(llm.total_calls(), 0);
    assert!(results.len() <= 3);
    assert!(results.iter().all(|r| r.segment.is_child()));

    let expected: Vec<(String, f32)> = index
        .vector_search(&embedder.embed(query).unwrap(), 20)
        .into_iter()
        .take(3)
        .map(|hit| (hit.segment.id.clone(), hit.score))
        .collect();
    let got: Vec<(String, f32)> = results
        .iter()
        .map(|r| (r.segment.id.clone(), r.score))
        .collect();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let retriever = build_retriever(index, embedder, llm, RagFeatures::default());

    let query = "What is the preferred way to create singletons?";
    let first = retriever
        .retrieve(query, &CancellationToken::new())
        .await
        .unwrap();
    let second = retriever
        .retrieve(query, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.segment.id, b.segment.id);
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn test_empty_query_makes_no_calls() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let retriever = build_retriever(
        index,
        Arc::clone(&embedder),
        Arc::clone(&llm),
        RagFeatures::default(),
    );

    let results = retriever
        .retrieve("   ", &CancellationToken::new())
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(llm.total_calls(), 0);
    assert_eq!(embedder.call_count(), 0);
}

#[tokio::test]
async fn test_snapshot_round_trip_preserves_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vector-store.json");

    let original = build_index();
    original.save(&path).unwrap();
    let reloaded = Arc::new(ChunkIndex::load(&path).unwrap());

    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let query = "What is the preferred way to create singletons?";

    let from_original = build_retriever(
        Arc::new(build_index()),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        RagFeatures::default(),
    )
    .retrieve(query, &CancellationToken::new())
    .await
    .unwrap();

    let from_reloaded = build_retriever(
        reloaded,
        Arc::clone(&embedder),
        Arc::clone(&llm),
        RagFeatures::default(),
    )
    .retrieve(query, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(from_original.len(), from_reloaded.len());
    for (a, b) in from_original.iter().zip(from_reloaded.iter()) {
        assert_eq!(a.segment.text, b.segment.text);
        assert_eq!(a.score, b.score);
        assert!(a.segment.metadata.structural_eq(&b.segment.metadata));
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let index = Arc::new(build_index());
    let embedder = Arc::new(StubEmbedder::new());
    let llm = Arc::new(StubLlm::new());
    let retriever = build_retriever(index, embedder, llm, RagFeatures::default());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = retriever
        .retrieve("any question", &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
