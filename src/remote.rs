//! JSON-over-HTTP calls to hosted model APIs with retry and backoff.
//!
//! Shared by the embedding providers and the chat client:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every terminal failure is an [`AssistantError::ExternalService`].

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

use crate::error::AssistantError;

/// Build a client with the per-request timeout used by a provider.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Delay before retry `attempt` (1-based).
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// POST `body` to `url` and return the decoded JSON response.
///
/// `service` names the remote in error messages (e.g. `"OpenAI"`).
pub async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let mut last_err: Option<String> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::warn!(
                service,
                attempt,
                delay_secs = delay.as_secs(),
                error = last_err.as_deref().unwrap_or(""),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json::<Value>().await.map_err(|e| {
                        AssistantError::external(service, format!("invalid JSON response: {}", e))
                            .into()
                    });
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("API error {}: {}", status, body_text));
                    continue;
                }

                // Client error (not 429): no retry
                return Err(AssistantError::external(
                    service,
                    format!("API error {}: {}", status, body_text),
                )
                .into());
            }
            Err(e) => {
                last_err = Some(format!("connection error ({}): {}", url, e));
                continue;
            }
        }
    }

    Err(AssistantError::external(
        service,
        last_err.unwrap_or_else(|| "request failed after retries".to_string()),
    )
    .into())
}
