//! Gemini transformation client with retry and backoff.
//!
//! One blocking request per document, sequential by design: the remote
//! endpoint has undocumented rate limits and the caller is the only
//! throttle. A malfunctioning service degrades to a no-op for the
//! document, never to corruption.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed system instruction sent with every request. Non-negotiable: the
/// service may touch heading markers and nothing else.
pub const HEADING_CONTRACT: &str = "You are reformatting one markdown document. \
Alter only heading markers by prepending exactly one contextually appropriate \
symbol to each heading's text. Preserve heading level, heading text, and all \
non-heading content byte-for-byte, including structured front matter, embedded \
code blocks, links, and lists. Return only the updated document, with no \
commentary and no code fences.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One transformation attempt. The orchestrator is driven through this
/// seam so tests can substitute a deterministic double.
pub trait Transformer {
    fn transform(&self, content: &str) -> Result<String>;
}

/// Suspension point between retries, injected so policy math can be
/// exercised without real delays.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Exponential backoff schedule for transformation attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try, where `attempt` is the 1-indexed count
    /// of tries made so far: `2^attempt * base_delay + jitter`.
    pub fn delay_for(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .saturating_add(jitter_ms),
        )
    }
}

/// Result of a transformation attempt sequence.
#[derive(Debug)]
pub enum TransformOutcome {
    Transformed(String),
    /// All attempts failed; the caller keeps the original content.
    GaveUp,
}

/// Drive `transformer` under `policy`, sleeping between failed attempts.
///
/// Jitter is sampled per retry so a batch of failing documents does not
/// hammer the endpoint in lockstep.
pub fn transform_with_retry(
    transformer: &dyn Transformer,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    content: &str,
) -> TransformOutcome {
    for attempt in 1..=policy.max_attempts.max(1) {
        match transformer.transform(content) {
            Ok(text) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "transformation retry succeeded");
                }
                return TransformOutcome::Transformed(text);
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "transformation attempt failed"
                );
                if attempt < policy.max_attempts {
                    let jitter_ms = rand::thread_rng().gen_range(0..=policy.max_jitter_ms);
                    sleeper.sleep(policy.delay_for(attempt, jitter_ms));
                }
            }
        }
    }
    TransformOutcome::GaveUp
}

/// Blocking client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    agent: ureq::Agent,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, endpoint: String) -> GeminiClient {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .new_agent();
        GeminiClient {
            agent,
            api_key,
            model,
            endpoint,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }
}

impl Transformer for GeminiClient {
    fn transform(&self, content: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: content.to_string(),
                }],
            }],
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: HEADING_CONTRACT.to_string(),
                }],
            },
        };

        let mut response = self
            .agent
            .post(self.url().as_str())
            .send_json(&body)
            .context("send generateContent request")?;
        let parsed: GenerateResponse = response
            .body_mut()
            .read_json()
            .context("decode generateContent response")?;

        if let Some(error) = parsed.error {
            return Err(anyhow!("generateContent error: {}", error.message));
        }
        let text = parsed
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content.parts)
            .and_then(|parts| parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| anyhow!("generateContent response has no candidate text"))?;
        // An empty success response is a failure, never a valid rewrite.
        if text.trim().is_empty() {
            return Err(anyhow!("generateContent response text is empty"));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[allow(dead_code)]
    code: Option<i32>,
}
