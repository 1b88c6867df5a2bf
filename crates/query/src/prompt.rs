use index::RetrievedPassage;
use stream::ChatMessage;

const BASE_INSTRUCTIONS: &str = "You are a helpful assistant answering questions about the user's documents.";

const GROUNDED_INSTRUCTIONS: &str = "Answer using the context below. Cite passages by their bracketed number. \
If the context does not contain the answer, say so instead of guessing.";

/// Prepend a system message carrying retrieved passages and graph context.
///
/// Caller-supplied system messages are kept after ours so they can refine
/// the instructions.
pub fn build_messages(
    history: &[ChatMessage],
    passages: &[RetrievedPassage],
    graph_summary: Option<&str>,
) -> Vec<ChatMessage> {
    let graph_summary = graph_summary.filter(|s| !s.trim().is_empty());

    let system = if passages.is_empty() && graph_summary.is_none() {
        BASE_INSTRUCTIONS.to_string()
    } else {
        let mut prompt = format!("{}\n{}\n", BASE_INSTRUCTIONS, GROUNDED_INSTRUCTIONS);
        if !passages.is_empty() {
            prompt.push_str("\nContext passages:\n");
            for (i, passage) in passages.iter().enumerate() {
                prompt.push_str(&format!("[{}] ({}) {}\n", i + 1, passage.key(), passage.text.trim()));
            }
        }
        if let Some(summary) = graph_summary {
            prompt.push('\n');
            prompt.push_str(summary);
        }
        prompt
    };

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().filter(|m| !m.content.trim().is_empty()).cloned());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::RetrievalMethod;
    use stream::Role;

    #[test]
    fn test_context_is_numbered() {
        let passages = vec![RetrievedPassage {
            doc_id: "handbook".to_string(),
            chunk_index: 3,
            text: "  Ana manages billing. ".to_string(),
            score: 0.9,
            method: RetrievalMethod::Hybrid,
        }];

        let messages = build_messages(
            &[ChatMessage::user("Who manages billing?")],
            &passages,
            Some("Knowledge graph context:\nPeople:\n- Ana\n"),
        );

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("[1] (handbook:3) Ana manages billing.\n"));
        assert!(messages[0].content.contains("People:\n- Ana"));
        assert_eq!(messages[1].content, "Who manages billing?");
    }

    #[test]
    fn test_no_context_keeps_base_prompt() {
        let messages = build_messages(&[ChatMessage::user("hi"), ChatMessage::assistant("")], &[], Some("  "));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, BASE_INSTRUCTIONS);
        assert_eq!(messages[1].role, Role::User);
    }
}
