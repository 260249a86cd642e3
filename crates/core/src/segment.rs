//! Document segment model
//!
//! The index stores a two-level hierarchy: large parent segments that
//! preserve surrounding context and small child segments that are the unit
//! of vector search. Children point back to their parent by a stable string
//! id only; there are no object-graph cycles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Segment granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Large-grain segment preserving local context
    Parent,
    /// Fixed-window slice of a parent, the unit of vector search
    Child,
}

/// Structural and hierarchy metadata attached to a segment
///
/// Children carry `parent_id`, `parent_index`, and `child_index`; structural
/// fields (`item_*`, `chapter_*`, `section_*`) are detected on the parent and
/// inherited unchanged by all of its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_label: Option<String>,
}

impl SegmentMetadata {
    /// Copy the structural fields (item/chapter/section) from another
    /// segment's metadata, leaving hierarchy fields untouched.
    pub fn inherit_structural(&mut self, other: &SegmentMetadata) {
        self.item_id = other.item_id.clone();
        self.item_label = other.item_label.clone();
        self.chapter_id = other.chapter_id.clone();
        self.chapter_label = other.chapter_label.clone();
        self.section_id = other.section_id.clone();
        self.section_label = other.section_label.clone();
    }

    /// Best human-readable structural label, preferring items over chapters
    /// over sections.
    pub fn structural_label(&self) -> Option<&str> {
        self.item_label
            .as_deref()
            .or(self.chapter_label.as_deref())
            .or(self.section_label.as_deref())
    }

    /// True when the structural fields match another metadata record.
    pub fn structural_eq(&self, other: &SegmentMetadata) -> bool {
        self.item_id == other.item_id
            && self.chapter_id == other.chapter_id
            && self.section_id == other.section_id
    }
}

/// A contiguous text span from the source document
///
/// Immutable once created; destroyed only by reindexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Stable identifier (`parent_N` for parents, `parent_N_child_M` for children)
    pub id: String,
    /// The segment text
    pub text: String,
    pub kind: SegmentKind,
    pub metadata: SegmentMetadata,
}

impl Segment {
    /// Create a parent segment. The parent's own id is recorded in its
    /// metadata so that parent and child agree on `parent_id`.
    pub fn parent(index: usize, text: impl Into<String>) -> Self {
        let id = format!("parent_{index}");
        Self {
            id: id.clone(),
            text: text.into(),
            kind: SegmentKind::Parent,
            metadata: SegmentMetadata {
                parent_id: Some(id),
                parent_index: Some(index),
                ..Default::default()
            },
        }
    }

    /// Create a child segment of the given parent, inheriting its
    /// structural metadata.
    pub fn child(parent: &Segment, child_index: usize, text: impl Into<String>) -> Self {
        let parent_id = parent
            .metadata
            .parent_id
            .clone()
            .unwrap_or_else(|| parent.id.clone());
        let mut metadata = SegmentMetadata {
            parent_id: Some(parent_id.clone()),
            parent_index: parent.metadata.parent_index,
            child_index: Some(child_index),
            ..Default::default()
        };
        metadata.inherit_structural(&parent.metadata);
        Self {
            id: format!("{parent_id}_child_{child_index}"),
            text: text.into(),
            kind: SegmentKind::Child,
            metadata,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.kind == SegmentKind::Parent
    }

    pub fn is_child(&self) -> bool {
        self.kind == SegmentKind::Child
    }

    /// Character length of the segment text
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A retrieved segment paired with a relevance score
///
/// Scores are stage-local: raw cosine similarity, fused RRF score, or
/// reranker score depending on which stage produced the result. They are
/// never compared across stages.
#[derive(Debug, Clone)]
pub struct ScoredSegment {
    pub segment: Arc<Segment>,
    pub score: f32,
}

impl ScoredSegment {
    pub fn new(segment: Arc<Segment>, score: f32) -> Self {
        Self { segment, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_records_own_id() {
        let parent = Segment::parent(3, "Some parent text");
        assert_eq!(parent.id, "parent_3");
        assert_eq!(parent.metadata.parent_id.as_deref(), Some("parent_3"));
        assert_eq!(parent.metadata.parent_index, Some(3));
    }

    #[test]
    fn test_child_inherits_structural_metadata() {
        let mut parent = Segment::parent(0, "Item 17: Minimize mutability.");
        parent.metadata.item_id = Some("17".into());
        parent.metadata.item_label = Some("Item 17".into());

        let child = Segment::child(&parent, 2, "Minimize mutability");
        assert_eq!(child.metadata.parent_id.as_deref(), Some("parent_0"));
        assert_eq!(child.metadata.child_index, Some(2));
        assert_eq!(child.metadata.item_id.as_deref(), Some("17"));
        assert!(child.metadata.structural_eq(&parent.metadata));
    }

    #[test]
    fn test_structural_label_preference() {
        let mut metadata = SegmentMetadata::default();
        assert_eq!(metadata.structural_label(), None);

        metadata.section_label = Some("Section 2".into());
        assert_eq!(metadata.structural_label(), Some("Section 2"));

        metadata.chapter_label = Some("Chapter 4".into());
        assert_eq!(metadata.structural_label(), Some("Chapter 4"));

        metadata.item_label = Some("Item 3".into());
        assert_eq!(metadata.structural_label(), Some("Item 3"));
    }
}
