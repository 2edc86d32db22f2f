//! Shared HTTP plumbing for the network-backed providers.
//!
//! Maps `reqwest` failures and non-success responses onto
//! [`ProviderError`] so every provider is retried by the same rules.

use std::time::Duration;

use docsync_core::ProviderError;
use reqwest::header::RETRY_AFTER;
use reqwest::Response;

/// Build the client used by every provider. Per-attempt timeouts are
/// applied by the retry policy, this only bounds connection setup.
pub fn client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .user_agent(concat!("docsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {}", e)))
}

pub fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Pass successful responses through, classify the rest.
pub async fn check(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    let err = match ProviderError::from_status(status.as_u16(), message) {
        ProviderError::RateLimited { .. } => ProviderError::RateLimited { retry_after },
        other => other,
    };
    Err(err)
}

/// Parse a JSON body or report it as malformed.
pub async fn json(response: Response) -> Result<serde_json::Value, ProviderError> {
    response.json().await.map_err(transport_error)
}

/// Pull a readable message out of the common JSON error shapes.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error_description"))
            .or_else(|| v.get("message"))
            .or_else(|| v.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| body.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":{"code":"itemNotFound","message":"The resource could not be found."}}"#),
            "The resource could not be found."
        );
        assert_eq!(
            error_message(r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret"}"#),
            "AADSTS7000215: Invalid client secret"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }
}
