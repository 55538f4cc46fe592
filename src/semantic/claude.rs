//! Claude semantic judge implementation.
//!
//! Sends batches of uncertain matches to the Anthropic Messages API and
//! parses the verdict list out of the reply. Responses are parsed
//! leniently: the model is asked for a bare JSON array, but surrounding
//! prose is tolerated and individually malformed entries degrade to "no
//! opinion" instead of failing the batch.

use super::{JudgeError, ReviewCandidate, SemanticJudge, Verdict};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Anthropic API base URL.
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";

/// API version header required by the Messages endpoint.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const MAX_TOKENS: u32 = 1024;

/// Claude judge configuration.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Claude-backed semantic judge.
pub struct ClaudeJudge {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeJudge {
    pub fn new(config: ClaudeConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn build_prompt(candidates: &[ReviewCandidate]) -> String {
        let mut prompt = String::from(
            "You are reviewing proposed matches between customer invoices and bank ledger \
             transactions. For each candidate, decide whether the transaction is the payment \
             for the invoice.\n\n",
        );

        for (index, candidate) in candidates.iter().enumerate() {
            prompt.push_str(&format!(
                "Candidate {}:\n\
                 - Invoice {}: vendor \"{}\", amount {} due {}\n\
                 - Transaction: \"{}\", amount {} on {}\n\
                 - Current score {:.3} (amount {:.2}, date {:.2}, vendor {:.2}, entity {:.2}, pattern {:.2})\n\n",
                index + 1,
                candidate.invoice_number,
                candidate.vendor_name,
                candidate.invoice_amount,
                candidate.invoice_date,
                candidate.transaction_description,
                candidate.transaction_amount,
                candidate.transaction_date,
                candidate.current_score,
                candidate.criteria_scores.amount,
                candidate.criteria_scores.date,
                candidate.criteria_scores.vendor,
                candidate.criteria_scores.entity,
                candidate.criteria_scores.pattern,
            ));
        }

        prompt.push_str(&format!(
            "Respond with only a JSON array of exactly {} objects, one per candidate in \
             order, each shaped as: {{\"is_match\": bool, \"confidence\": number 0-1, \
             \"reasoning\": short string, \"adjusted_score\": number 0-1}}. No other text.",
            candidates.len()
        ));

        prompt
    }

    /// Pull the verdict array out of the model's reply. The top-level array
    /// must parse; entries that do not fit the verdict shape become `None`,
    /// and a short array is padded with `None` so the result always lines
    /// up with the candidates.
    fn parse_verdicts(text: &str, expected: usize) -> Result<Vec<Option<Verdict>>, JudgeError> {
        let start = text.find('[');
        let end = text.rfind(']');
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) if start < end => (start, end),
            _ => {
                return Err(JudgeError::Malformed(
                    "no JSON array in response".to_string(),
                ))
            }
        };

        let items: Vec<serde_json::Value> = serde_json::from_str(&text[start..=end])
            .map_err(|e| JudgeError::Malformed(format!("verdict array did not parse: {}", e)))?;

        let mut verdicts: Vec<Option<Verdict>> = items
            .into_iter()
            .map(|item| serde_json::from_value(item).ok())
            .collect();
        verdicts.resize_with(expected, || None);

        Ok(verdicts)
    }
}

#[async_trait]
impl SemanticJudge for ClaudeJudge {
    async fn review(
        &self,
        candidates: &[ReviewCandidate],
    ) -> Result<Vec<Option<Verdict>>, JudgeError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if self.config.api_key.is_empty() {
            return Err(JudgeError::NotConfigured(
                "ANTHROPIC_API_KEY is not set".to_string(),
            ));
        }

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::build_prompt(candidates),
            }],
        };

        tracing::debug!(
            model = %self.config.model,
            candidate_count = candidates.len(),
            "Sending review batch to Anthropic API"
        );

        let response = self
            .client
            .post(format!("{}/messages", ANTHROPIC_API_BASE))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| JudgeError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(JudgeError::Api("rate limited".to_string()));
            }

            return Err(JudgeError::Api(format!(
                "Anthropic API error {}: {}",
                status, error_text
            )));
        }

        let api_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Malformed(format!("Failed to parse response: {}", e)))?;

        let text = api_response
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text.clone())
            .unwrap_or_default();

        Self::parse_verdicts(&text, candidates.len())
    }
}

// ============================================================================
// API types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}
