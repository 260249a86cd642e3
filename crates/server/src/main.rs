//! Book assistant server
//!
//! Boots the pipeline: embedder, generator backend, chunk index (loaded
//! from its snapshot or rebuilt from the source document), retriever,
//! answerer, and evaluator, then serves the HTTP API.

mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bookwise_agent::{Answerer, MemoryConfig};
use bookwise_config::load_settings;
use bookwise_core::{Embedder, LanguageModel};
use bookwise_eval::Evaluator;
use bookwise_index::{ChunkIndex, SemanticChunker};
use bookwise_llm::OpenRouterBackend;
use bookwise_rag::{EmbeddingConfig, HybridRetriever, SimpleEmbedder};

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings().context("loading settings")?;
    info!(
        model = %settings.llm.model,
        data_dir = %settings.storage.data_dir,
        "starting bookwise server"
    );

    let embedder: Arc<dyn Embedder> = Arc::new(SimpleEmbedder::new(EmbeddingConfig {
        dimension: settings.embedding.dimension,
    }));
    let llm: Arc<dyn LanguageModel> = Arc::new(
        OpenRouterBackend::new(settings.llm.clone()).context("building LLM backend")?,
    );

    // Index bootstrap is CPU and IO heavy; keep it off the async runtime.
    let index = {
        let snapshot_path = settings.storage.snapshot_path();
        let document_path = settings.storage.document_path();
        let embedder = Arc::clone(&embedder);
        tokio::task::spawn_blocking(move || {
            let chunker = SemanticChunker::default();
            ChunkIndex::open_or_build(snapshot_path, document_path, &chunker, embedder.as_ref())
        })
        .await
        .context("index bootstrap task")?
        .context("building chunk index")?
    };
    let index = Arc::new(index);
    info!(
        parents = index.parent_count(),
        children = index.child_count(),
        degraded = index.has_degraded_parents(),
        "chunk index ready"
    );

    let retriever = Arc::new(HybridRetriever::new(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        settings.rag,
        settings.storage.book_title.clone(),
    ));
    let answerer = Arc::new(Answerer::new(
        retriever,
        Arc::clone(&llm),
        MemoryConfig::default(),
        settings.storage.book_title.clone(),
    ));
    let evaluator = Arc::new(Evaluator::new(
        Arc::clone(&llm),
        Arc::clone(&index),
        Arc::clone(&answerer),
        settings.storage.clone(),
    ));

    let app = routes::create_router(
        AppState::new(
            answerer,
            evaluator,
            std::time::Duration::from_secs(settings.server.request_timeout_secs),
        ),
        &settings.server,
    );

    let address = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, "listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
