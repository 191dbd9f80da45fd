use common::types::{format_history, ChatMessage, ContextPart};

/// System instruction sent with every generation.
pub const SYSTEM_INSTRUCTION: &str = "You are a helpful RAG assistant.";

const DEFAULT_INSTRUCTION: &str = "Answer the question using the provided summaries and cite \
titles/sections/pages where relevant.";

/// Renders planned context parts as `header\nbody` blocks separated by
/// blank lines; headerless parts contribute only their body.
pub fn render_context(parts: &[ContextPart]) -> String {
    parts
        .iter()
        .map(|part| {
            if part.header.is_empty() {
                part.body.clone()
            } else {
                format!("{}\n{}", part.header, part.body)
            }
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Assembles the final prompt: the optional custom template (with every
/// `{{context}}`/`{{question}}` occurrence substituted) or the default
/// instruction, prefixed by the rendered conversation when present.
pub fn build_prompt(
    template: Option<&str>,
    context: &str,
    question: &str,
    history: &[ChatMessage],
) -> String {
    let body = match template {
        Some(template) => template
            .replace("{{context}}", context)
            .replace("{{question}}", question),
        None => format!(
            "{DEFAULT_INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {question}"
        ),
    };

    if history.is_empty() {
        body
    } else {
        format!("Conversation:\n{}\n\n{body}", format_history(history))
    }
}
