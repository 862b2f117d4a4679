//! Meeting advisor.
//!
//! Fuses the session's latest transcript and screenshot with retrieved code
//! snippets into a short talking point. The generative backend is strictly
//! best-effort: missing credentials, upstream errors, and timeouts all
//! transition to a deterministic rule-based generator that always produces
//! a non-empty result. The only fatal input is an unknown session.
//!
//! ```text
//! AiAvailable ──(model error | timeout | no credentials)──▶ RuleBased
//! ```

use std::time::Duration;

use crate::config::Config;
use crate::context::ContextStore;
use crate::embedding::Embedder;
use crate::error::{ApiError, ApiResult};
use crate::models::{AdviceResult, AdviceSource, Screenshot, SearchHit};
use crate::registry::RepoRegistry;
use crate::search::search_chunks;
use crate::store::VectorIndex;

const SYSTEM_PROMPT: &str = "You are a helpful coding assistant. Generate a concise, \
professional talking point (1-2 sentences) that the user can say in a meeting to sound \
knowledgeable. Focus on technical insights from the code or discussion.";

const TRANSCRIPT_PROMPT_LIMIT: usize = 2000;

#[allow(clippy::too_many_arguments)]
pub async fn advise(
    config: &Config,
    context: &ContextStore,
    registry: &RepoRegistry,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    session_id: &str,
    meeting_context: Option<&str>,
) -> ApiResult<AdviceResult> {
    // The snapshot is a point-in-time read; producers writing concurrently
    // are never blocked and never block us.
    let snapshot = context
        .snapshot(user_id, session_id)
        .ok_or_else(|| ApiError::InvalidInput(format!("unknown session: {session_id}")))?;

    let transcript = snapshot.transcript_segment.clone().unwrap_or_default();

    // Retrieval feeds the prompt but must never fail the advisor.
    let snippets = if transcript.trim().is_empty() {
        Vec::new()
    } else {
        let query: String = transcript
            .chars()
            .take(config.retrieval.max_query_chars)
            .collect();
        match search_chunks(
            config,
            registry,
            index,
            embedder,
            user_id,
            &query,
            Some(config.advisor.max_snippets as i64),
            None,
        )
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::debug!(error = %e, "snippet retrieval failed, advising without code");
                Vec::new()
            }
        }
    };

    if config.advisor.provider == "openai" {
        let timeout = Duration::from_secs(config.advisor.timeout_secs);
        let attempt = generate_ai(
            config,
            &transcript,
            &snippets,
            meeting_context,
            snapshot.screenshot.as_ref(),
        );
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                return Ok(AdviceResult {
                    talking_point: text.trim().to_string(),
                    confidence: 0.9,
                    source: AdviceSource::Ai,
                });
            }
            Ok(Ok(_)) => {
                tracing::warn!("generative backend returned empty text, falling back");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "generative backend failed, falling back");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = config.advisor.timeout_secs,
                    "generative backend timed out, falling back"
                );
            }
        }
    }

    Ok(rule_based(&transcript, &snippets))
}

// ============ Generative path ============

async fn generate_ai(
    config: &Config,
    transcript: &str,
    snippets: &[SearchHit],
    meeting_context: Option<&str>,
    screenshot: Option<&Screenshot>,
) -> anyhow::Result<String> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let prompt = build_prompt(transcript, snippets, meeting_context);

    let user_content = match screenshot {
        Some(shot) => serde_json::json!([
            { "type": "text", "text": prompt },
            {
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", shot.media_type, shot.image_base64)
                }
            }
        ]),
        None => serde_json::json!(prompt),
    };

    let body = serde_json::json!({
        "model": config.advisor.model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_content }
        ],
        "max_tokens": 150,
        "temperature": 0.7
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.advisor.timeout_secs))
        .build()?;

    let response = client
        .post("https://api.openai.com/v1/chat/completions")
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        anyhow::bail!("chat completion API error {}: {}", status, body_text);
    }

    let json: serde_json::Value = response.json().await?;
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("invalid chat completion response"))?;

    Ok(text.to_string())
}

fn build_prompt(transcript: &str, snippets: &[SearchHit], meeting_context: Option<&str>) -> String {
    let mut parts = Vec::new();

    if !transcript.trim().is_empty() {
        let bounded: String = transcript.chars().take(TRANSCRIPT_PROMPT_LIMIT).collect();
        parts.push(format!("Recent discussion:\n{bounded}"));
    }

    if !snippets.is_empty() {
        let code = snippets
            .iter()
            .map(|s| {
                format!(
                    "// {} (lines {}-{})\n{}",
                    s.file_path, s.start_line, s.end_line, s.snippet
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        parts.push(format!("Relevant code:\n{code}"));
    }

    if let Some(mc) = meeting_context {
        parts.push(format!("Meeting context: {mc}"));
    }

    parts.push(
        "Generate a concise talking point (1-2 sentences) the user can say to contribute \
         meaningfully to this discussion."
            .to_string(),
    );

    parts.join("\n\n")
}

// ============ Rule-based fallback ============

/// Deterministic generator used when the AI path is unavailable.
/// Guaranteed to return a non-empty talking point.
fn rule_based(transcript: &str, snippets: &[SearchHit]) -> AdviceResult {
    let lower = transcript.to_lowercase();

    let point = |text: String, confidence: f64| AdviceResult {
        talking_point: text,
        confidence,
        source: AdviceSource::RuleBased,
    };

    if ["error", "bug", "issue", "problem", "crash"]
        .iter()
        .any(|w| lower.contains(w))
    {
        let place = snippets
            .first()
            .map(|s| format!(" around {}", s.file_path))
            .unwrap_or_default();
        return point(
            format!("I can help debug that. Let me check the error handling{place} in our codebase."),
            0.6,
        );
    }

    if ["performance", "slow", "optimize", "latency"]
        .iter()
        .any(|w| lower.contains(w))
    {
        return point(
            "We should profile that. I can look at optimization opportunities in the code."
                .to_string(),
            0.6,
        );
    }

    if let Some((ident, path)) = shared_identifier(transcript, snippets) {
        return point(
            format!("Worth noting that `{ident}` in {path} is directly relevant to what's being discussed."),
            0.6,
        );
    }

    if let Some(top) = snippets.first() {
        return point(
            format!(
                "Based on the structure of {}, I think we should consider how this change fits \
                 the existing code before committing to it.",
                top.file_path
            ),
            0.5,
        );
    }

    point(
        "That's a good point. Let me review the implementation details and get back to you."
            .to_string(),
        0.4,
    )
}

/// First identifier shared between the transcript and a snippet, walking
/// snippets in rank order so the result is deterministic.
fn shared_identifier(transcript: &str, snippets: &[SearchHit]) -> Option<(String, String)> {
    let spoken: std::collections::HashSet<String> = transcript
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(|w| w.to_lowercase())
        .collect();
    if spoken.is_empty() {
        return None;
    }

    for hit in snippets {
        for token in hit
            .snippet
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| t.len() >= 4)
        {
            let matches = spoken.contains(&token.to_lowercase())
                || token
                    .split('_')
                    .any(|part| part.len() >= 4 && spoken.contains(&part.to_lowercase()));
            if matches {
                return Some((token.to_string(), hit.file_path.clone()));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, snippet: &str) -> SearchHit {
        SearchHit {
            repo_id: "r1".to_string(),
            file_path: path.to_string(),
            start_line: 1,
            end_line: 20,
            snippet: snippet.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_error_keywords_trigger_debug_line() {
        let result = rule_based("we keep seeing that error in production", &[]);
        assert_eq!(result.source, AdviceSource::RuleBased);
        assert!(result.talking_point.contains("debug"));
    }

    #[test]
    fn test_performance_keywords_trigger_profiling_line() {
        let result = rule_based("the dashboard is really slow lately", &[]);
        assert!(result.talking_point.contains("profile"));
    }

    #[test]
    fn test_identifier_overlap_names_the_symbol() {
        let snippets = vec![hit(
            "auth.py",
            "def authenticate_user(token):\n    return validate(token)",
        )];
        let result = rule_based("how does authenticate work for new users", &snippets);
        assert!(result.talking_point.contains("authenticate_user"));
        assert!(result.talking_point.contains("auth.py"));
    }

    #[test]
    fn test_snippets_without_overlap_reference_top_file() {
        let snippets = vec![hit("billing/invoice.py", "def render(): pass")];
        let result = rule_based("anything on the roadmap", &snippets);
        assert!(result.talking_point.contains("billing/invoice.py"));
    }

    #[test]
    fn test_always_nonempty_even_with_nothing() {
        let result = rule_based("", &[]);
        assert!(!result.talking_point.is_empty());
        assert_eq!(result.source, AdviceSource::RuleBased);
    }

    #[test]
    fn test_prompt_includes_all_parts() {
        let snippets = vec![hit("a.py", "def f(): pass")];
        let prompt = build_prompt("we discussed caching", &snippets, Some("sprint planning"));
        assert!(prompt.contains("Recent discussion"));
        assert!(prompt.contains("a.py"));
        assert!(prompt.contains("sprint planning"));
        assert!(prompt.contains("talking point"));
    }

    #[test]
    fn test_prompt_bounds_transcript() {
        let long = "word ".repeat(10_000);
        let prompt = build_prompt(&long, &[], None);
        assert!(prompt.len() < TRANSCRIPT_PROMPT_LIMIT + 200);
    }
}
