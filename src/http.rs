//! Shared HTTP plumbing for the external speech and agent services

use std::time::Duration;

/// Ceiling on any single service call
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(60);

/// Build an HTTP client with the service timeout applied
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized
pub fn client() -> crate::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(SERVICE_TIMEOUT)
        .user_agent(concat!("beacon-voice/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Join an API base and an endpoint path
#[must_use]
pub fn endpoint(api_base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        api_base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Return the response if successful, otherwise its status and body as a message
pub async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("{status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/audio/speech"),
            "https://api.openai.com/v1/audio/speech"
        );
        assert_eq!(
            endpoint("http://localhost:8080/v1", "chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
