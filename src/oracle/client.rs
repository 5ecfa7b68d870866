use super::prompts::{rewrite_user, REWRITE_SYSTEM};
use super::{Oracle, OracleError, OracleRequest};
use crate::config::OracleConfig;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// Longest error body kept in messages
const MAX_ERROR_CHARS: usize = 500;

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// OpenRouter-compatible chat completions client
pub struct OpenRouterOracle {
    client: reqwest::Client,
    config: OracleConfig,
    api_key: String,
}

impl OpenRouterOracle {
    /// Build a client, reading the API key from the configured environment variable
    pub fn new(config: &OracleConfig, timeout_secs: u64) -> Result<Self, OracleError> {
        let api_key = config
            .api_key()
            .ok_or_else(|| OracleError::MissingApiKey(config.api_key_env.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: self.config.max_tokens,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let mut retry_count = 0;
        loop {
            let response = self
                .client
                .post(&self.config.api_url)
                .header("Content-Type", "application/json")
                .header("X-Title", "retext")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    OracleError::Malformed(format!(
                        "{}: {}",
                        e,
                        truncate(&text, MAX_ERROR_CHARS)
                    ))
                })?;
                return Ok(parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default());
            }

            match status.as_u16() {
                429 if retry_count < MAX_RETRIES => {
                    retry_count += 1;
                    let backoff_ms = INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1);
                    warn!(
                        "Oracle rate limited. Retrying in {}ms (attempt {}/{})",
                        backoff_ms, retry_count, MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                429 => return Err(OracleError::RateLimited(retry_count)),
                401 => return Err(OracleError::Unauthorized),
                code => {
                    return Err(OracleError::Http {
                        status: code,
                        body: truncate(&text, MAX_ERROR_CHARS),
                    })
                }
            }
        }
    }
}

impl Oracle for OpenRouterOracle {
    async fn rewrite(&self, request: &OracleRequest) -> anyhow::Result<String> {
        let user = rewrite_user(request)?;
        debug!(
            batch = %request.batch_id,
            nodes = request.nodes.len(),
            "Sending batch to oracle"
        );
        Ok(self.complete(REWRITE_SYSTEM, &user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_reported() {
        let config = OracleConfig {
            api_key_env: "RETEXT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..OracleConfig::default()
        };
        match OpenRouterOracle::new(&config, 5) {
            Err(OracleError::MissingApiKey(var)) => {
                assert_eq!(var, "RETEXT_TEST_KEY_THAT_IS_NEVER_SET")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("client built without a key"),
        }
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 10,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
