pub mod metadata;

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use common::backend::LanguageBackend;
use common::config::{ChunkingConfig, ChunkingStrategy};
use common::error::RagError;
use common::types::Chunk;
use common::utils::text::{shannon_entropy, split_sentences};

/// Entropy-to-overlap gain: one extra overlap character per 1/50 bit.
const ENTROPY_OVERLAP_GAIN: f64 = 50.0;

/// Minimum surviving proposition length for agentic chunking.
const MIN_PROPOSITION_LEN: usize = 2;

const PROPOSITION_PROMPT: &str = "Decompose the following passage into standalone propositions. \
Respond with a JSON array of strings and nothing else.\n\nPassage:\n";

/// Splits raw document text into chunk contents.
///
/// The recursive strategy accumulates sentences into windows of at least
/// `chunk_size` characters and seeds each following window with a tail
/// overlap sized by the emitted window's character entropy: noisier text
/// carries more context across the cut. The agentic strategy rewrites each
/// window into LLM-extracted propositions, falling back to the window
/// itself whenever the model output is unusable.
pub struct DocumentProcessor<'a> {
    config: &'a ChunkingConfig,
    backend: &'a dyn LanguageBackend,
}

impl<'a> DocumentProcessor<'a> {
    pub fn new(config: &'a ChunkingConfig, backend: &'a dyn LanguageBackend) -> Self {
        Self { config, backend }
    }

    /// Produces the chunk contents for a document.
    pub async fn chunk(&self, text: &str) -> Result<Vec<String>, RagError> {
        let windows = self.recursive_windows(text);
        match self.config.strategy {
            ChunkingStrategy::Recursive => Ok(windows),
            ChunkingStrategy::Agentic => {
                let mut chunks = Vec::new();
                for window in windows {
                    chunks.extend(self.propositions_for(&window).await);
                }
                Ok(chunks)
            }
        }
    }

    /// Sentence-window splitting with entropy-adaptive overlap.
    pub fn recursive_windows(&self, text: &str) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let mut windows = Vec::new();
        let mut current = String::new();
        // Chars in `current` that were carried over from the previous
        // window; a trailing window made of carry alone is not re-emitted.
        let mut carried_only = true;

        for segment in split_segments(text, &self.config.separators) {
            for sentence in split_sentences(segment) {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(sentence);
                carried_only = false;

                if current.chars().count() >= chunk_size {
                    let overlap = self.overlap_for(&current);
                    let carry = tail_chars(&current, overlap);
                    windows.push(std::mem::replace(&mut current, carry));
                    carried_only = true;
                }
            }
        }

        if !carried_only && !current.trim().is_empty() {
            windows.push(current);
        }
        windows
    }

    /// `min(base_overlap + floor(H * 50), chunk_size / 3)` where `H` is the
    /// Shannon entropy of the just-emitted window.
    fn overlap_for(&self, window: &str) -> usize {
        let entropy_bonus = (shannon_entropy(window) * ENTROPY_OVERLAP_GAIN).floor() as usize;
        (self.config.chunk_overlap + entropy_bonus).min(self.config.chunk_size / 3)
    }

    /// Asks the backend for propositions; any failure keeps the window.
    async fn propositions_for(&self, window: &str) -> Vec<String> {
        let prompt = format!("{PROPOSITION_PROMPT}{window}");
        let reply = match self.backend.generate(&prompt, None).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "agentic chunking backend failed; keeping recursive window");
                return vec![window.to_owned()];
            }
        };

        match parse_propositions(&reply) {
            Some(propositions) if !propositions.is_empty() => {
                debug!(count = propositions.len(), "agentic chunking produced propositions");
                propositions
            }
            _ => {
                warn!("agentic chunking returned unusable output; keeping recursive window");
                vec![window.to_owned()]
            }
        }
    }
}

/// Hard pre-splits on configured separators before sentence accumulation.
fn split_segments<'t>(text: &'t str, separators: &[String]) -> Vec<&'t str> {
    let mut segments = vec![text];
    for separator in separators {
        if separator.is_empty() {
            continue;
        }
        segments = segments
            .into_iter()
            .flat_map(|segment| segment.split(separator.as_str()))
            .collect();
    }
    segments.retain(|segment| !segment.trim().is_empty());
    segments
}

/// Last `n` characters of the text, on char boundaries.
fn tail_chars(text: &str, n: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(n)).collect()
}

/// Trimmed, whitespace-collapsed, deduplicated propositions from a JSON
/// array; `None` on any parse problem.
fn parse_propositions(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    let raw: Vec<String> = serde_json::from_str(reply.get(start..=end)?).ok()?;

    let mut seen = HashSet::new();
    let mut propositions = Vec::new();
    for item in raw {
        let collapsed = item.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() < MIN_PROPOSITION_LEN {
            continue;
        }
        if seen.insert(collapsed.clone()) {
            propositions.push(collapsed);
        }
    }
    Some(propositions)
}

/// Locates each chunk in the source text with a sequential scan and stamps
/// it with its index and content hash.
///
/// The cursor advances to the end of each match, so contents that cannot be
/// found from the cursor onward (overlapping windows, rewritten
/// propositions) map to offset `(0, 0)` silently.
pub fn build_chunks(text: &str, contents: Vec<String>) -> Vec<Chunk> {
    let mut cursor = 0usize;
    contents
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| {
            let located = text
                .get(cursor..)
                .and_then(|tail| tail.find(&content))
                .map(|rel| {
                    let start = cursor + rel;
                    (start, start + content.len())
                });
            let (start, end) = match located {
                Some(span) => {
                    cursor = span.1;
                    span
                }
                None => (0, 0),
            };

            let sha256 = format!("{:x}", Sha256::digest(content.as_bytes()));
            Chunk {
                content,
                start,
                end,
                chunk_index,
                sha256,
            }
        })
        .collect()
}
