use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use common::backend::LanguageBackend;
use common::types::Enrichment;
use common::utils::retry::with_backoff;
use common::utils::text::truncate_chars;

/// Fallback summary length when the model output is unusable.
const FALLBACK_SUMMARY_CHARS: usize = 300;
/// Fallback keyword count and minimum token length.
const FALLBACK_KEYWORD_COUNT: usize = 10;
const FALLBACK_KEYWORD_MIN_LEN: usize = 4;

const ENRICHMENT_PROMPT: &str = "Analyze the following text chunk. Respond with a JSON object \
containing `summary` (one or two sentences), `keywords` (up to ten strings) and \
`hypothetical_questions` (up to three questions the chunk answers). Respond with JSON only.\n\n\
Chunk:\n";

/// Raw model output, parsed defensively before anything reaches the store.
#[derive(Debug, Deserialize)]
struct LlmEnrichment {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    hypothetical_questions: Vec<String>,
}

/// Computes the optional enrichment triple for a chunk.
pub struct ChunkEnricher<'a> {
    backend: &'a dyn LanguageBackend,
}

impl<'a> ChunkEnricher<'a> {
    pub fn new(backend: &'a dyn LanguageBackend) -> Self {
        Self { backend }
    }

    /// Never fails: any backend or parse problem degrades to the synthetic
    /// fallback (leading summary, frequency keywords, no questions).
    pub async fn enrich(&self, content: &str) -> Enrichment {
        let prompt = format!("{ENRICHMENT_PROMPT}{content}");
        let reply = match with_backoff("chunk enrichment", || {
            self.backend.generate(&prompt, None)
        })
        .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "enrichment backend failed; using fallback");
                return fallback_enrichment(content);
            }
        };

        match parse_enrichment(&reply) {
            Some(enrichment) => enrichment,
            None => {
                warn!("enrichment output did not parse; using fallback");
                fallback_enrichment(content)
            }
        }
    }
}

fn parse_enrichment(reply: &str) -> Option<Enrichment> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    let parsed: LlmEnrichment = serde_json::from_str(reply.get(start..=end)?).ok()?;
    if parsed.summary.trim().is_empty() {
        return None;
    }
    Some(Enrichment {
        summary: parsed.summary.trim().to_owned(),
        keywords: parsed
            .keywords
            .into_iter()
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
            .collect(),
        hypothetical_questions: parsed
            .hypothetical_questions
            .into_iter()
            .map(|q| q.trim().to_owned())
            .filter(|q| !q.is_empty())
            .collect(),
    })
}

/// Synthetic enrichment: the first 300 characters as summary and the ten
/// most frequent tokens longer than three characters as keywords.
fn fallback_enrichment(content: &str) -> Enrichment {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, raw) in content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|raw| raw.chars().count() >= FALLBACK_KEYWORD_MIN_LEN)
        .enumerate()
    {
        let token = raw.to_lowercase();
        let entry = counts.entry(token).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

    Enrichment {
        summary: truncate_chars(content, FALLBACK_SUMMARY_CHARS).to_owned(),
        keywords: ranked
            .into_iter()
            .take(FALLBACK_KEYWORD_COUNT)
            .map(|(token, _)| token)
            .collect(),
        hypothetical_questions: Vec::new(),
    }
}
