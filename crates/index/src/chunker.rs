//! Semantic chunker
//!
//! Splits a document into the two-level segment hierarchy:
//! - Parent segments found by walking sentence-embedding similarity and
//!   breaking where adjacent sentences drift apart, refined to keep code
//!   blocks intact and to split oversized chunks at natural boundaries
//! - Child segments cut from each parent with a fixed sliding window
//!
//! Documents too short for sentence analysis fall back to a naive recursive
//! splitter so ingestion never fails on small inputs.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use bookwise_core::{Embedder, Segment, SegmentMetadata};

use crate::{cosine_similarity, IndexError};

/// Chunking parameters
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Upper bound for parent size (characters)
    pub max_parent_chars: usize,
    /// Minimum accumulated size before a semantic breakpoint is taken
    pub min_parent_chars: usize,
    /// Lower accumulation bound used with the looser similarity threshold
    pub loose_min_chars: usize,
    /// Similarity below this (with enough accumulated text) ends a chunk
    pub breakpoint_threshold: f32,
    /// Stronger drift threshold allowed to break smaller chunks
    pub loose_threshold: f32,
    /// Sentences at or below this length are not embedded
    pub min_sentence_chars: usize,
    /// Child window size (characters)
    pub child_size: usize,
    /// Child window stride (characters); overlap = size - stride
    pub child_stride: usize,
    /// Chunk size for the naive fallback splitter
    pub fallback_chunk_chars: usize,
    /// Overlap for the naive fallback splitter
    pub fallback_overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_parent_chars: 1200,
            min_parent_chars: 400,
            loose_min_chars: 200,
            breakpoint_threshold: 0.70,
            loose_threshold: 0.56,
            min_sentence_chars: 10,
            child_size: 150,
            child_stride: 120,
            fallback_chunk_chars: 800,
            fallback_overlap_chars: 50,
        }
    }
}

/// Result of chunking one document
#[derive(Debug)]
pub struct ChunkedDocument {
    pub parents: Vec<Segment>,
    pub children: Vec<Segment>,
}

/// A sentence span in the source text (byte offsets, trimmed)
#[derive(Debug, Clone, Copy)]
struct Sentence {
    start: usize,
    end: usize,
    chars: usize,
}

static BOUNDARY_UPPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+[A-Z]").unwrap());
static BOUNDARY_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\n+").unwrap());
static BOUNDARY_RELAXED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());

static CODE_BRACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]*\}").unwrap());
static ITEM_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bitem\s+\d+").unwrap());

static ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bitem\s+(\d+)").unwrap());
static ITEM_CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"条目\s*(\d+)").unwrap());
static CHAPTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bchapter\s+(\d+)").unwrap());
static CHAPTER_CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"第\s*(\d+)\s*章").unwrap());
static SECTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsection\s+(\d+)").unwrap());
static SECTION_CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"节\s*(\d+)").unwrap());

/// Semantic document chunker
pub struct SemanticChunker {
    config: ChunkerConfig,
}

impl SemanticChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split a document into parent and child segments
    ///
    /// Fails on an empty document; a document with too few sentences for
    /// semantic analysis is split with the naive fallback instead.
    pub fn chunk(
        &self,
        text: &str,
        embedder: &dyn Embedder,
    ) -> Result<ChunkedDocument, IndexError> {
        if text.trim().is_empty() {
            return Err(IndexError::EmptyDocument);
        }

        let sentences = split_sentences(text, self.config.min_sentence_chars);

        let parent_texts = if sentences.len() < 10 {
            warn!(
                sentences = sentences.len(),
                "too few sentences for semantic chunking, using naive fallback"
            );
            recursive_split(
                text,
                self.config.fallback_chunk_chars,
                self.config.fallback_overlap_chars,
            )
        } else {
            self.semantic_parent_texts(text, &sentences, embedder)?
        };

        let mut parents = Vec::new();
        let mut children = Vec::new();
        for parent_text in parent_texts {
            let trimmed = parent_text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parent = Segment::parent(parents.len(), trimmed);
            extract_structural_metadata(trimmed, &mut parent.metadata);
            children.extend(self.cut_children(&parent));
            parents.push(parent);
        }

        debug!(
            parents = parents.len(),
            children = children.len(),
            "chunking complete"
        );

        Ok(ChunkedDocument { parents, children })
    }

    /// Run the semantic breakpoint walk and chunk refinement
    fn semantic_parent_texts(
        &self,
        text: &str,
        sentences: &[Sentence],
        embedder: &dyn Embedder,
    ) -> Result<Vec<String>, IndexError> {
        let embeddings: Vec<Option<Vec<f32>>> = sentences
            .iter()
            .map(|s| {
                if s.chars > self.config.min_sentence_chars {
                    embedder
                        .embed(&text[s.start..s.end])
                        .map(Some)
                        .map_err(|e| IndexError::Embedding(e.to_string()))
                } else {
                    Ok(None)
                }
            })
            .collect::<Result<_, _>>()?;

        let breakpoints = self.find_breakpoints(sentences, &embeddings);
        Ok(self.materialise_chunks(text, sentences, &breakpoints))
    }

    /// Indices of the last sentence of each chunk, terminal index included
    fn find_breakpoints(
        &self,
        sentences: &[Sentence],
        embeddings: &[Option<Vec<f32>>],
    ) -> Vec<usize> {
        let mut breakpoints = Vec::new();
        let mut accumulated = 0usize;

        for i in 0..sentences.len() {
            accumulated += sentences[i].chars;
            if i + 1 < sentences.len() {
                if let (Some(a), Some(b)) = (&embeddings[i], &embeddings[i + 1]) {
                    let sim = cosine_similarity(a, b);
                    let hard = sim < self.config.breakpoint_threshold
                        && accumulated >= self.config.min_parent_chars;
                    let loose = sim < self.config.loose_threshold
                        && accumulated >= self.config.loose_min_chars;
                    if hard || loose {
                        breakpoints.push(i);
                        accumulated = 0;
                    }
                }
            }
        }

        breakpoints.push(sentences.len() - 1);
        breakpoints.dedup();
        breakpoints
    }

    /// Turn breakpoint windows into parent texts, applying the refinement
    /// rules (code integrity, merge-forward of short chunks, oversize split)
    fn materialise_chunks(
        &self,
        text: &str,
        sentences: &[Sentence],
        breakpoints: &[usize],
    ) -> Vec<String> {
        let mut emitted: Vec<(usize, usize)> = Vec::new();
        let mut buffer: Option<(usize, usize)> = None;
        let mut first_sentence = 0usize;

        for &bp in breakpoints {
            let raw = (sentences[first_sentence].start, sentences[bp].end);
            first_sentence = bp + 1;

            // A pending buffer always directly precedes the current chunk.
            let span = match buffer.take() {
                Some((start, _)) => (start, raw.1),
                None => raw,
            };

            self.refine(text, sentences, span, &mut emitted, &mut buffer);
        }

        if let Some(mut span) = buffer.take() {
            while span_chars(text, span) > self.config.max_parent_chars {
                let (head, rest) = self.split_oversize(text, sentences, span);
                emitted.push(head);
                span = rest;
            }
            match emitted.last_mut() {
                Some(last) if span_chars(text, (last.0, span.1)) <= self.config.max_parent_chars => {
                    last.1 = span.1;
                }
                _ => emitted.push(span),
            }
        }

        emitted
            .into_iter()
            .map(|(start, end)| text[start..end].to_string())
            .collect()
    }

    fn refine(
        &self,
        text: &str,
        sentences: &[Sentence],
        span: (usize, usize),
        emitted: &mut Vec<(usize, usize)>,
        buffer: &mut Option<(usize, usize)>,
    ) {
        let chars = span_chars(text, span);
        let chunk = &text[span.0..span.1];

        // Code blocks are emitted whole unless pathologically large.
        if has_code_signal(chunk) && chars < self.config.max_parent_chars * 3 / 2 {
            emitted.push(span);
            return;
        }

        if chars < self.config.min_parent_chars && sentence_count(sentences, span) < 3 {
            *buffer = Some(span);
            return;
        }

        if chars > self.config.max_parent_chars {
            let (head, rest) = self.split_oversize(text, sentences, span);
            emitted.push(head);
            *buffer = Some(rest);
            return;
        }

        emitted.push(span);
    }

    /// Split an oversized span, preferring paragraph and code boundaries and
    /// avoiding positions just after an item header
    fn split_oversize(
        &self,
        text: &str,
        sentences: &[Sentence],
        span: (usize, usize),
    ) -> ((usize, usize), (usize, usize)) {
        let sub = &text[span.0..span.1];
        let chars: Vec<(usize, char)> = sub.char_indices().collect();
        let n = chars.len();

        let lo = (n / 3).max(600);
        let hi = (2 * n / 3).min(1000).min(n.saturating_sub(1));

        // Item header starts within the span, as char positions
        let header_starts: Vec<usize> = ITEM_HEADER
            .find_iter(sub)
            .filter_map(|m| chars.binary_search_by_key(&m.start(), |&(b, _)| b).ok())
            .collect();

        // Sentence boundaries inside the span, as char positions
        let boundaries: Vec<usize> = sentences
            .iter()
            .filter(|s| s.start > span.0 && s.start < span.1)
            .filter_map(|s| {
                chars
                    .binary_search_by_key(&(s.start - span.0), |&(b, _)| b)
                    .ok()
            })
            .collect();

        let midpoint = n / 2;
        let mut best_pos = midpoint;
        let mut best_score = f32::MIN;

        if lo < hi {
            for p in lo..=hi {
                let mut score = 0.0f32;

                let window_start = p.saturating_sub(10);
                let window_end = (p + 10).min(n);
                let paragraph = (window_start..window_end.saturating_sub(1))
                    .any(|w| chars[w].1 == '\n' && chars[w + 1].1 == '\n');
                if paragraph {
                    score += 0.4;
                }

                let prev = chars[p - 1].1;
                if prev == '}' || prev == ';' || (prev == '\n' && chars[p].1 != '{') {
                    score += 0.3;
                }
                if prev == '.' || prev == '!' || prev == '?' {
                    score += 0.2;
                }

                if header_starts.iter().any(|&h| p > h && p - h <= 100) {
                    score -= 0.5;
                }

                if score > best_score {
                    best_score = score;
                    best_pos = p;
                }
            }
        }

        let target = if best_score > 0.5 { best_pos } else { midpoint };
        let split_pos = nearest_boundary(&boundaries, target).unwrap_or(target);
        let split_pos = split_pos.clamp(1, n - 1);

        let split_byte = span.0 + chars[split_pos].0;
        ((span.0, split_byte), (split_byte, span.1))
    }

    /// Cut fixed-size overlapping child windows from a parent
    fn cut_children(&self, parent: &Segment) -> Vec<Segment> {
        let chars: Vec<(usize, char)> = parent.text.char_indices().collect();
        let n = chars.len();
        let mut children = Vec::new();
        let mut start = 0usize;
        let mut child_index = 0usize;

        while start < n {
            let end = (start + self.config.child_size).min(n);
            let byte_start = chars[start].0;
            let byte_end = if end < n {
                chars[end].0
            } else {
                parent.text.len()
            };
            children.push(Segment::child(
                parent,
                child_index,
                &parent.text[byte_start..byte_end],
            ));
            child_index += 1;
            start += self.config.child_stride;
        }

        children
    }
}

impl Default for SemanticChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

fn span_chars(text: &str, span: (usize, usize)) -> usize {
    text[span.0..span.1].chars().count()
}

fn sentence_count(sentences: &[Sentence], span: (usize, usize)) -> usize {
    sentences
        .iter()
        .filter(|s| s.start >= span.0 && s.start < span.1)
        .count()
}

fn nearest_boundary(boundaries: &[usize], target: usize) -> Option<usize> {
    boundaries
        .iter()
        .copied()
        .min_by_key(|&b| b.abs_diff(target))
}

/// Signals that a chunk contains source code and should not be split
fn has_code_signal(text: &str) -> bool {
    const SIGNALS: [&str; 6] = [
        "public class",
        "private ",
        "public ",
        "@Override",
        "//",
        "/*",
    ];
    SIGNALS.iter().any(|s| text.contains(s)) || CODE_BRACES.is_match(text)
}

/// Two-pass sentence splitting
///
/// The strict pass breaks on terminators followed by whitespace and an
/// uppercase letter, or terminators followed by a newline. If that finds
/// fewer than 10 sentences the relaxed pass breaks on any terminator plus
/// whitespace. Fragments shorter than `min_chars` are folded into their
/// neighbour so the text stays contiguous.
fn split_sentences(text: &str, min_chars: usize) -> Vec<Sentence> {
    let strict = sentence_spans(text, &[&BOUNDARY_UPPER, &BOUNDARY_NEWLINE], min_chars);
    if strict.len() >= 10 {
        return strict;
    }
    sentence_spans(text, &[&BOUNDARY_RELAXED], min_chars)
}

fn sentence_spans(text: &str, patterns: &[&Regex], min_chars: usize) -> Vec<Sentence> {
    let mut cuts: Vec<usize> = patterns
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.start() + 1))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut spans: Vec<Sentence> = Vec::new();
    let mut start = 0usize;
    for cut in cuts.into_iter().chain(std::iter::once(text.len())) {
        if cut <= start {
            continue;
        }
        if let Some(sentence) = trimmed_span(text, start, cut) {
            spans.push(sentence);
        }
        start = cut;
    }

    // Fold fragments below the minimum into their neighbour so no text is
    // lost; an undersized leading fragment absorbs the sentence after it.
    let mut merged: Vec<Sentence> = Vec::with_capacity(spans.len());
    for sentence in spans {
        let absorb = merged
            .last()
            .map(|prev| sentence.chars < min_chars || prev.chars < min_chars)
            .unwrap_or(false);
        match merged.last_mut() {
            Some(prev) if absorb => {
                prev.end = sentence.end;
                prev.chars = text[prev.start..prev.end].chars().count();
            }
            _ => merged.push(sentence),
        }
    }

    merged
}

fn trimmed_span(text: &str, start: usize, end: usize) -> Option<Sentence> {
    let fragment = &text[start..end];
    let trimmed = fragment.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = fragment.len() - fragment.trim_start().len();
    let trail = fragment.len() - fragment.trim_end().len();
    let start = start + lead;
    let end = end - trail;
    Some(Sentence {
        start,
        end,
        chars: text[start..end].chars().count(),
    })
}

/// Naive recursive splitter used when sentence analysis is not possible
///
/// Splits by paragraph, then sentence, then word separators, merging pieces
/// up to the chunk size; a piece with no usable separator is cut into plain
/// character windows with the configured overlap.
fn recursive_split(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    const SEPARATORS: [&str; 5] = ["\n\n", ". ", "! ", "? ", " "];
    split_and_merge(text, chunk_chars, overlap_chars, &SEPARATORS)
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_and_merge(
    text: &str,
    chunk_chars: usize,
    overlap_chars: usize,
    separators: &[&str],
) -> Vec<String> {
    if text.chars().count() <= chunk_chars || separators.is_empty() {
        return char_windows(text, chunk_chars, overlap_chars);
    }

    let separator = separators[0];
    let rest = &separators[1..];

    let mut pieces: Vec<&str> = Vec::new();
    let mut start = 0usize;
    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece.to_string();
        } else if current.chars().count() + piece.chars().count() <= chunk_chars {
            current.push_str(piece);
        } else {
            flush_chunk(&mut chunks, current, chunk_chars, overlap_chars, rest);
            current = piece.to_string();
        }
    }
    if !current.is_empty() {
        flush_chunk(&mut chunks, current, chunk_chars, overlap_chars, rest);
    }

    chunks
}

fn flush_chunk(
    chunks: &mut Vec<String>,
    current: String,
    chunk_chars: usize,
    overlap_chars: usize,
    separators: &[&str],
) {
    if current.chars().count() > chunk_chars {
        chunks.extend(split_and_merge(
            &current,
            chunk_chars,
            overlap_chars,
            separators,
        ));
    } else {
        chunks.push(current);
    }
}

fn char_windows(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let stride = chunk_chars.saturating_sub(overlap_chars).max(1);
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    out
}

/// Detect `Item N` / `Chapter N` / `Section N` headers (and their CJK
/// equivalents) and record the first match of each kind
fn extract_structural_metadata(text: &str, metadata: &mut SegmentMetadata) {
    if let Some(num) = first_number(&[&ITEM_RE, &ITEM_CJK_RE], text) {
        metadata.item_label = Some(format!("Item {num}"));
        metadata.item_id = Some(num);
    }
    if let Some(num) = first_number(&[&CHAPTER_RE, &CHAPTER_CJK_RE], text) {
        metadata.chapter_label = Some(format!("Chapter {num}"));
        metadata.chapter_id = Some(num);
    }
    if let Some(num) = first_number(&[&SECTION_RE, &SECTION_CJK_RE], text) {
        metadata.section_label = Some(format!("Section {num}"));
        metadata.section_id = Some(num);
    }
}

fn first_number(patterns: &[&Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .filter_map(|re| re.captures(text))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .next()
}
