//! OpenAI chat-completions client used as the grammar oracle.
//!
//! Each sentence is sent as its own request with a strict JSON-schema response
//! format, so the reply content deserializes directly into a [`CheckResult`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{CheckError, CheckResult, Oracle};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";

/// Upper bound on how much of an error body is kept in [`CheckError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 2048;

const SYSTEM_PROMPT: &str = "\
You detect and correct grammatical errors in single sentences.

Ignore markdown formatting such as bold, italics or inline code and judge only the sentence itself.
Keep the author's original choice of words wherever possible.

When the sentence has an error, set hasError to true, put the corrected sentence in correction, \
and describe the mistake and the fix in one or two short sentences in explanation.

When the sentence is grammatically correct, reply with hasError false and empty correction and explanation.";

/// Grammar oracle backed by the OpenAI chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenAiOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiOracle {
    /// Build a client for `endpoint` (for example `https://api.openai.com/v1`).
    ///
    /// Without an API key every check fails with [`CheckError::Unavailable`].
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn request_body(&self, sentence: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Check this sentence\n----\n{sentence}") },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "SentenceCheck",
                    "strict": true,
                    "schema": response_schema(),
                },
            },
        })
    }
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "hasError": { "type": "boolean" },
            "correction": { "type": "string" },
            "explanation": { "type": "string" },
        },
        "required": ["hasError", "correction", "explanation"],
        "additionalProperties": false,
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[tower_lsp::async_trait]
impl Oracle for OpenAiOracle {
    async fn check(&self, sentence: &str) -> Result<CheckResult, CheckError> {
        let Some(api_key) = &self.api_key else {
            return Err(CheckError::Unavailable(
                "no OpenAI API key configured".to_string(),
            ));
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&self.request_body(sentence))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CheckError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CheckError::MissingContent)?;

        let result: CheckResult = serde_json::from_str(&content)?;
        Ok(result.normalized())
    }
}
