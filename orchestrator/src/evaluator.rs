use serde_json::Value;
use tracing::warn;

use common::types::{EvalCase, EvalReport, Metadata};
use common::utils::retry::with_backoff;
use common::utils::text::first_number;

use crate::engine::RagEngine;

/// Runs each case through the full query pipeline and has the backend
/// judge faithfulness (answer vs. source summaries) and relevance (answer
/// vs. question) on a [0, 1] scale. Any failure along the way degrades
/// that score to 0.
pub async fn evaluate_cases(engine: &RagEngine, cases: &[EvalCase]) -> Vec<EvalReport> {
    let mut reports = Vec::with_capacity(cases.len());
    for case in cases {
        reports.push(evaluate_case(engine, case).await);
    }
    reports
}

async fn evaluate_case(engine: &RagEngine, case: &EvalCase) -> EvalReport {
    let (answer, summaries) = match engine.query(&case.question, None).await {
        Ok(response) => (
            answer_text(&response.answer),
            collect_summaries(&response.sources),
        ),
        Err(err) => {
            warn!(question = %case.question, error = %err, "evaluation query failed");
            return EvalReport {
                question: case.question.clone(),
                expected_ground_truth: case.expected_ground_truth.clone(),
                faithfulness: 0.0,
                relevance: 0.0,
            };
        }
    };

    let faithfulness_prompt = format!(
        "Rate how faithful the answer is to the source summaries on a scale from 0 to 1. \
         Return only the number.\n\nSummaries:\n{summaries}\n\nAnswer:\n{answer}"
    );
    let relevance_prompt = format!(
        "Rate how well the answer addresses the question on a scale from 0 to 1. \
         Return only the number.\n\nQuestion:\n{question}\n\nAnswer:\n{answer}",
        question = case.question
    );

    EvalReport {
        question: case.question.clone(),
        expected_ground_truth: case.expected_ground_truth.clone(),
        faithfulness: judge_score(engine, &faithfulness_prompt).await,
        relevance: judge_score(engine, &relevance_prompt).await,
    }
}

/// A single number in [0, 1], clamped; 0 on any backend or parse failure.
async fn judge_score(engine: &RagEngine, prompt: &str) -> f32 {
    let reply = match with_backoff("evaluation judge", || {
        engine.backend().generate(prompt, None)
    })
    .await
    {
        Ok(reply) => reply,
        Err(err) => {
            warn!(error = %err, "evaluation judge failed; scoring 0");
            return 0.0;
        }
    };

    first_number(&reply).map_or(0.0, |score| score.clamp(0.0, 1.0))
}

fn answer_text(answer: &Value) -> String {
    match answer {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn collect_summaries(sources: &[Metadata]) -> String {
    sources
        .iter()
        .filter_map(|metadata| metadata.get("summary").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summaries_concatenate_in_source_order() {
        let mut first = Metadata::new();
        first.insert("summary".into(), json!("First summary."));
        let mut second = Metadata::new();
        second.insert("summary".into(), json!("Second summary."));
        let unsummarized = Metadata::new();

        let joined = collect_summaries(&[first, unsummarized, second]);
        assert_eq!(joined, "First summary.\nSecond summary.");
    }

    #[test]
    fn answer_text_flattens_json_answers() {
        assert_eq!(answer_text(&json!("plain")), "plain");
        assert_eq!(answer_text(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
