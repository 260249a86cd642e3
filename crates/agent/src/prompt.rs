//! Prompt assembly

use bookwise_core::{ScoredSegment, SegmentMetadata};

/// Label for one retrieved passage: the structural label when the segment
/// carries one, otherwise just its ordinal.
pub fn source_label(metadata: &SegmentMetadata, index: usize) -> String {
    match metadata.structural_label() {
        Some(label) => format!("Source {index}: {label}"),
        None => format!("Source {index}"),
    }
}

/// Build the grounded system prompt: assistant role, answering rules, and
/// the retrieved passages with their source labels.
pub fn build_system_prompt(book_title: &str, sources: &[ScoredSegment]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are an expert assistant for the book '{book_title}'. \
         Answer the user's question using the reference passages below. \
         If the passages do not contain the answer, say so honestly. \
         When a passage carries an Item or Chapter label, cite it in your \
         answer so the response is traceable.\n\nReference passages:\n\n"
    ));

    if sources.is_empty() {
        prompt.push_str("(No relevant passages found)\n");
        return prompt;
    }

    for (i, source) in sources.iter().enumerate() {
        let label = source_label(&source.segment.metadata, i + 1);
        prompt.push_str(&format!("[{label}]\n{}\n\n", source.segment.text));
    }

    prompt
}

/// System role for the basic streaming endpoint
pub fn basic_system_role(book_title: &str) -> String {
    format!(
        "You are an expert on '{book_title}'. Use the following context to \
         answer. If not in context, say so."
    )
}

/// Augmented user prompt for the basic streaming path: retrieved passages
/// labelled by ordinal only, followed by the user's question.
pub fn build_context_prompt(question: &str, sources: &[ScoredSegment]) -> String {
    let mut prompt = String::from("Context:\n");
    if sources.is_empty() {
        prompt.push_str("(No relevant context found)\n\n");
    } else {
        for (i, source) in sources.iter().enumerate() {
            prompt.push_str(&format!("[Chunk {}]\n{}\n\n", i + 1, source.segment.text));
        }
    }
    prompt.push_str("User question: ");
    prompt.push_str(question);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bookwise_core::Segment;

    #[test]
    fn test_source_label_with_item() {
        let mut metadata = SegmentMetadata::default();
        metadata.item_label = Some("Item 3".into());
        assert_eq!(source_label(&metadata, 1), "Source 1: Item 3");
    }

    #[test]
    fn test_source_label_without_structure() {
        assert_eq!(source_label(&SegmentMetadata::default(), 2), "Source 2");
    }

    #[test]
    fn test_system_prompt_contains_labelled_passages() {
        let mut parent = Segment::parent(0, "Use an enum to implement singletons.");
        parent.metadata.item_id = Some("3".into());
        parent.metadata.item_label = Some("Item 3".into());

        let sources = vec![ScoredSegment::new(Arc::new(parent), 0.9)];
        let prompt = build_system_prompt("Effective Java", &sources);

        assert!(prompt.contains("Effective Java"));
        assert!(prompt.contains("[Source 1: Item 3]"));
        assert!(prompt.contains("Use an enum to implement singletons."));
    }

    #[test]
    fn test_system_prompt_without_sources() {
        let prompt = build_system_prompt("Effective Java", &[]);
        assert!(prompt.contains("No relevant passages found"));
    }

    #[test]
    fn test_context_prompt_labels_chunks_by_ordinal() {
        let parent = Segment::parent(0, "Use a single-element enum.");
        let sources = vec![ScoredSegment::new(Arc::new(parent), 0.9)];
        let prompt = build_context_prompt("How do I build a singleton?", &sources);

        assert!(prompt.starts_with("Context:\n"));
        assert!(prompt.contains("[Chunk 1]\nUse a single-element enum."));
        assert!(prompt.ends_with("User question: How do I build a singleton?"));
    }

    #[test]
    fn test_context_prompt_without_sources() {
        let prompt = build_context_prompt("anything?", &[]);
        assert!(prompt.contains("(No relevant context found)"));
    }
}
