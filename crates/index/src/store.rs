//! The chunk index
//!
//! Flat-array store for the parent/child hierarchy: child texts and their
//! embeddings in parallel insertion-ordered lists, parents addressed by
//! stable string id. Immutable after `ingest`/`load`, so concurrent readers
//! need no locking. Persisted as a single pretty-printed JSON snapshot that
//! is replaced atomically.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bookwise_core::{Embedder, ScoredSegment, Segment, SegmentKind, SegmentMetadata};

use crate::chunker::SemanticChunker;
use crate::{cosine_similarity, IndexError};

/// Marker carried inline in persisted child texts, linking back to the parent
const PARENT_ID_PREFIX: &str = "<!--PARENT_ID:";
const PARENT_ID_SUFFIX: &str = "-->";

/// In-memory index over one document's segments and child embeddings
#[derive(Debug)]
pub struct ChunkIndex {
    file_name: String,
    parent_order: Vec<Arc<Segment>>,
    parents_by_id: HashMap<String, Arc<Segment>>,
    children: Vec<Arc<Segment>>,
    embeddings: Vec<Vec<f32>>,
    /// Set when parents were synthesised from children during load; the
    /// small-to-big promotion quality degrades in that case.
    degraded_parents: bool,
}

impl ChunkIndex {
    /// Store segments and embeddings in insertion order.
    ///
    /// Fails when the child and embedding lists disagree in length or when a
    /// child references a parent that was not supplied.
    pub fn ingest(
        file_name: impl Into<String>,
        parents: Vec<Segment>,
        children: Vec<Segment>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if children.len() != embeddings.len() {
            return Err(IndexError::CountMismatch {
                chunks: children.len(),
                embeddings: embeddings.len(),
            });
        }

        let parent_order: Vec<Arc<Segment>> = parents.into_iter().map(Arc::new).collect();
        let mut parents_by_id = HashMap::with_capacity(parent_order.len());
        for parent in &parent_order {
            let id = parent
                .metadata
                .parent_id
                .clone()
                .unwrap_or_else(|| parent.id.clone());
            parents_by_id.insert(id, Arc::clone(parent));
        }

        let children: Vec<Arc<Segment>> = children.into_iter().map(Arc::new).collect();
        for child in &children {
            match &child.metadata.parent_id {
                Some(id) if parents_by_id.contains_key(id) => {}
                Some(id) => return Err(IndexError::UnknownParent(id.clone())),
                None => return Err(IndexError::UnknownParent(child.id.clone())),
            }
        }

        info!(
            parents = parent_order.len(),
            children = children.len(),
            "index ingested"
        );

        Ok(Self {
            file_name: file_name.into(),
            parent_order,
            parents_by_id,
            children,
            embeddings,
            degraded_parents: false,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn parent_count(&self) -> usize {
        self.parent_order.len()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Child segments in insertion order
    pub fn children(&self) -> &[Arc<Segment>] {
        &self.children
    }

    /// Parent segments in insertion order
    pub fn parents(&self) -> &[Arc<Segment>] {
        &self.parent_order
    }

    /// True when parents are placeholders reconstructed from child texts
    pub fn has_degraded_parents(&self) -> bool {
        self.degraded_parents
    }

    /// Cosine top-k over all child embeddings, scores mapped to [0, 1]
    pub fn vector_search(&self, query: &[f32], k: usize) -> Vec<ScoredSegment> {
        if query.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<ScoredSegment> = self
            .embeddings
            .iter()
            .zip(self.children.iter())
            .map(|(embedding, child)| {
                let relevance = (1.0 + cosine_similarity(query, embedding)) / 2.0;
                ScoredSegment::new(Arc::clone(child), relevance)
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    /// Weighted keyword top-k over all child texts
    ///
    /// Per query token: `ln(1 + occurrences)` scaled by a position weight
    /// (earlier first occurrence scores higher) and a whole-word bonus,
    /// summed and normalised to [0, 1]. Only positive scores are returned.
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<ScoredSegment> {
        let tokens = query_tokens(query);
        if tokens.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<ScoredSegment> = self
            .children
            .iter()
            .filter_map(|child| {
                let score = lexical_score(&child.text.to_lowercase(), &tokens);
                if score > 0.0 {
                    Some(ScoredSegment::new(Arc::clone(child), score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    /// Resolve a child's parent segment
    pub fn parent_of(&self, child: &Segment) -> Option<Arc<Segment>> {
        let parent_id = child.metadata.parent_id.as_ref()?;
        self.parents_by_id.get(parent_id).cloned()
    }

    /// Persist the snapshot, replacing the file atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let path = path.as_ref();

        let chunks: Vec<SnapshotChunk> = self
            .children
            .iter()
            .map(|child| {
                let text = match &child.metadata.parent_id {
                    Some(id) => format!("{PARENT_ID_PREFIX}{id}{PARENT_ID_SUFFIX} {}", child.text),
                    None => child.text.clone(),
                };
                SnapshotChunk { text }
            })
            .collect();

        let embeddings: Vec<Vec<f64>> = self
            .embeddings
            .iter()
            .map(|e| e.iter().map(|&v| v as f64).collect())
            .collect();

        let parents: Vec<SnapshotParent> = self
            .parent_order
            .iter()
            .map(|p| SnapshotParent {
                id: p.metadata.parent_id.clone().unwrap_or_else(|| p.id.clone()),
                text: p.text.clone(),
                parent_index: p.metadata.parent_index.unwrap_or(0),
                item_id: p.metadata.item_id.clone(),
                item_label: p.metadata.item_label.clone(),
                chapter_id: p.metadata.chapter_id.clone(),
                chapter_label: p.metadata.chapter_label.clone(),
                section_id: p.metadata.section_id.clone(),
                section_label: p.metadata.section_label.clone(),
            })
            .collect();

        let snapshot = SnapshotFile {
            file_name: self.file_name.clone(),
            chunks,
            embeddings,
            parents: Some(parents),
        };

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        // Write to a sibling temp file, then rename over the target.
        let tmp = path.with_extension("json.tmp");
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), children = self.children.len(), "snapshot saved");
        Ok(())
    }

    /// Reload a snapshot from disk.
    ///
    /// A corrupted or inconsistent file is deleted so the next start
    /// re-ingests from the source document; the caller sees the error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;

        let snapshot: SnapshotFile = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "snapshot unreadable, deleting");
                remove_quietly(path);
                return Err(IndexError::Snapshot(e.to_string()));
            }
        };

        if snapshot.chunks.len() != snapshot.embeddings.len() {
            warn!(
                chunks = snapshot.chunks.len(),
                embeddings = snapshot.embeddings.len(),
                "snapshot length mismatch, deleting"
            );
            remove_quietly(path);
            return Err(IndexError::CountMismatch {
                chunks: snapshot.chunks.len(),
                embeddings: snapshot.embeddings.len(),
            });
        }

        Self::from_snapshot(snapshot)
    }

    fn from_snapshot(snapshot: SnapshotFile) -> Result<Self, IndexError> {
        // Recover stored parents when the snapshot carries them.
        let mut parents_by_id: HashMap<String, Arc<Segment>> = HashMap::new();
        let mut parent_order: Vec<Arc<Segment>> = Vec::new();
        let degraded = snapshot.parents.is_none();

        if let Some(stored) = &snapshot.parents {
            for p in stored {
                let parent = Arc::new(Segment {
                    id: p.id.clone(),
                    text: p.text.clone(),
                    kind: SegmentKind::Parent,
                    metadata: SegmentMetadata {
                        parent_id: Some(p.id.clone()),
                        parent_index: Some(p.parent_index),
                        child_index: None,
                        item_id: p.item_id.clone(),
                        item_label: p.item_label.clone(),
                        chapter_id: p.chapter_id.clone(),
                        chapter_label: p.chapter_label.clone(),
                        section_id: p.section_id.clone(),
                        section_label: p.section_label.clone(),
                    },
                });
                parents_by_id.insert(p.id.clone(), Arc::clone(&parent));
                parent_order.push(parent);
            }
        }

        let mut children: Vec<Arc<Segment>> = Vec::with_capacity(snapshot.chunks.len());
        let mut child_counts: HashMap<String, usize> = HashMap::new();
        let mut seen_parent_ids: Vec<String> = Vec::new();

        for chunk in &snapshot.chunks {
            let (parent_id, text) = split_parent_marker(&chunk.text);
            let parent_id = parent_id.unwrap_or_else(|| format!("orphan_{:08x}", children.len()));

            if !parents_by_id.contains_key(&parent_id) {
                // Older snapshots carry no parent texts; synthesise a
                // placeholder from the first child so promotion still works.
                let parent_index = seen_parent_ids.len();
                let placeholder = Arc::new(Segment {
                    id: parent_id.clone(),
                    text: text.to_string(),
                    kind: SegmentKind::Parent,
                    metadata: SegmentMetadata {
                        parent_id: Some(parent_id.clone()),
                        parent_index: Some(parent_index),
                        ..Default::default()
                    },
                });
                parents_by_id.insert(parent_id.clone(), Arc::clone(&placeholder));
                parent_order.push(placeholder);
                seen_parent_ids.push(parent_id.clone());
            }

            let parent = &parents_by_id[&parent_id];
            let child_index = child_counts.entry(parent_id.clone()).or_insert(0);
            let mut metadata = SegmentMetadata {
                parent_id: Some(parent_id.clone()),
                parent_index: parent.metadata.parent_index,
                child_index: Some(*child_index),
                ..Default::default()
            };
            metadata.inherit_structural(&parent.metadata);

            children.push(Arc::new(Segment {
                id: format!("{parent_id}_child_{child_index}"),
                text: text.to_string(),
                kind: SegmentKind::Child,
                metadata,
            }));
            *child_index += 1;
        }

        let embeddings: Vec<Vec<f32>> = snapshot
            .embeddings
            .iter()
            .map(|e| e.iter().map(|&v| v as f32).collect())
            .collect();

        if degraded {
            warn!(
                parents = parent_order.len(),
                "snapshot has no parent texts; placeholder parents will degrade small-to-big promotion"
            );
        }

        info!(
            children = children.len(),
            parents = parent_order.len(),
            file = %snapshot.file_name,
            "snapshot loaded"
        );

        Ok(Self {
            file_name: snapshot.file_name,
            parent_order,
            parents_by_id,
            children,
            embeddings,
            degraded_parents: degraded,
        })
    }

    /// Load the snapshot when present, otherwise chunk and embed the source
    /// document, ingest, and persist a fresh snapshot.
    pub fn open_or_build(
        snapshot_path: impl AsRef<Path>,
        document_path: impl AsRef<Path>,
        chunker: &SemanticChunker,
        embedder: &dyn Embedder,
    ) -> Result<Self, IndexError> {
        let snapshot_path = snapshot_path.as_ref();
        let document_path = document_path.as_ref();

        if snapshot_path.exists() {
            match Self::load(snapshot_path) {
                Ok(index) => return Ok(index),
                Err(e) => {
                    warn!(error = %e, "snapshot load failed, re-ingesting source document");
                }
            }
        }

        let text = std::fs::read_to_string(document_path)?;
        let file_name = document_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| document_path.display().to_string());

        let chunked = chunker.chunk(&text, embedder)?;
        let embeddings: Vec<Vec<f32>> = chunked
            .children
            .iter()
            .map(|c| {
                embedder
                    .embed(&c.text)
                    .map_err(|e| IndexError::Embedding(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let index = Self::ingest(file_name, chunked.parents, chunked.children, embeddings)?;
        index.save(snapshot_path)?;
        Ok(index)
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not delete corrupt snapshot");
    }
}

/// Strip the inline parent marker from a persisted child text
fn split_parent_marker(text: &str) -> (Option<String>, &str) {
    if let Some(rest) = text.strip_prefix(PARENT_ID_PREFIX) {
        if let Some(end) = rest.find(PARENT_ID_SUFFIX) {
            let parent_id = rest[..end].to_string();
            let body = rest[end + PARENT_ID_SUFFIX.len()..].trim_start();
            return (Some(parent_id), body);
        }
    }
    (None, text)
}

/// Lowercase, strip non-alphanumerics, drop tokens of length <= 2
fn query_tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| {
            t.to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|t| t.len() > 2)
        .collect()
}

fn lexical_score(text: &str, tokens: &[String]) -> f32 {
    if text.is_empty() {
        return 0.0;
    }

    let mut total = 0.0f32;
    for token in tokens {
        let mut count = 0usize;
        let mut first = None;
        for (pos, _) in text.match_indices(token.as_str()) {
            count += 1;
            if first.is_none() {
                first = Some(pos);
            }
        }
        let Some(first) = first else { continue };

        let frequency = (1.0 + count as f32).ln();

        let position_weight = if first < text.len() / 4 {
            1.5
        } else if first < text.len() / 2 {
            1.2
        } else {
            1.0
        };

        let before_ok = first == 0
            || !text[..first]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after_ok = !text[first + token.len()..]
            .chars()
            .next()
            .map(|c| c.is_alphanumeric())
            .unwrap_or(false);
        let exact_match = if before_ok && after_ok { 1.3 } else { 1.0 };

        total += frequency * position_weight * exact_match;
    }

    (total / (2.0 * tokens.len() as f32)).clamp(0.0, 1.0)
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(rename = "fileName")]
    file_name: String,
    chunks: Vec<SnapshotChunk>,
    embeddings: Vec<Vec<f64>>,
    /// Extension over the legacy format; absent in older files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<SnapshotParent>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotChunk {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotParent {
    id: String,
    text: String,
    parent_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chapter_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    section_label: Option<String>,
}
