//! Shared HTTP transport with a bounded retry policy for transient failures.
//!
//! Every provider backend routes its request through [`HttpClient::execute_with_retry`]
//! so retry/backoff behavior and error redaction stay consistent across providers.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::RequestBuilder;

use crate::error::LlmError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;

pub(crate) struct HttpClient {
    _client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { _client: client })
    }

    /// Executes a cloned request up to [`MAX_ATTEMPTS`] times, retrying on
    /// transport errors and 5xx/429 responses with exponential backoff.
    /// `provider` is used only for diagnostics.
    pub async fn execute_with_retry(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        provider: &str,
    ) -> Result<reqwest::Response, LlmError> {
        let mut last_err: Option<LlmError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            let Some(cloned) = request.try_clone() else {
                // Non-cloneable request bodies (e.g. streams) can't be retried.
                return request
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| transport_error(provider, &e));
            };

            match tokio::time::timeout(timeout, cloned.timeout(timeout).send()).await {
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(LlmError::Transport(format!(
                            "{provider} returned retryable status {status}"
                        )));
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(LlmError::Transport(format!(
                            "{provider} returned {status}: {}",
                            redact(&body)
                        )));
                    }
                }
                Ok(Err(e)) => last_err = Some(transport_error(provider, &e)),
                Err(_) => return Err(LlmError::Timeout(timeout)),
            }

            if attempt + 1 < MAX_ATTEMPTS {
                let backoff = BASE_BACKOFF_MS * 2u64.pow(attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Transport(format!("{provider} exhausted retries"))))
    }
}

fn transport_error(provider: &str, e: &reqwest::Error) -> LlmError {
    LlmError::Transport(format!("{provider} request failed: {}", redact(&e.to_string())))
}

static BEARER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(bearer|x-api-key|authorization)(\s*[:=]\s*)\S+").unwrap());
static SK_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{10,}").unwrap());

/// Strips common secret-bearing substrings from an error message before it
/// is logged or surfaced to a caller.
pub fn redact(message: &str) -> String {
    let redacted = BEARER_RE.replace_all(message, "$1$2[redacted]");
    SK_KEY_RE.replace_all(&redacted, "[redacted]").into_owned()
}

#[doc(hidden)]
pub fn redact_error_message_for_testing(message: &str) -> String {
    redact(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens() {
        let msg = "request failed: Authorization: Bearer sk-abcdef1234567890 rejected";
        let out = redact(msg);
        assert!(!out.contains("sk-abcdef1234567890"));
    }

    #[test]
    fn leaves_normal_text_untouched() {
        let msg = "connection refused";
        assert_eq!(redact(msg), msg);
    }
}
