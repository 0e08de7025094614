use std::time::Duration;

use reqwest::{Client, StatusCode};

/// How a failed remote call should be treated by retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
}

/// 408, 429 and 5xx are worth retrying elsewhere; any other error status
/// (401/403 authentication, remaining 4xx malformed request) is not.
pub fn classify_status(status: StatusCode) -> FailureClass {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

pub fn classify_transport(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
    {
        return FailureClass::Transient;
    }
    match err.status() {
        Some(status) => classify_status(status),
        None => FailureClass::Transient,
    }
}

/// Trims an error body so provider messages stay readable in logs.
pub fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(LIMIT).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_timeouts_and_server_errors_are_transient() {
        for code in [408, 429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status), FailureClass::Transient, "{}", code);
        }
    }

    #[test]
    fn auth_and_malformed_requests_are_fatal() {
        for code in [400, 401, 403, 404, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status), FailureClass::Fatal, "{}", code);
        }
    }

    #[test]
    fn truncate_body_caps_long_messages() {
        let long = "x".repeat(1000);
        let out = truncate_body(&long);
        assert_eq!(out.len(), 303);
        assert_eq!(truncate_body("  short  "), "short");
    }
}
