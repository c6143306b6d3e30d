//! reqwest plumbing shared by the HTTP-backed sessions.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::OpsError;

/// Longest response body quoted in a diagnostic.
const MAX_BODY_IN_ERROR: usize = 2048;

pub fn build_client(target: &str, timeout: Duration) -> crate::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| OpsError::Connection(target.to_string(), e.to_string()))
}

/// Unreachable hosts and timeouts are connection failures; anything else that
/// stops a request from completing is an operation failure.
pub fn classify_send_error(target: &str, err: reqwest::Error) -> OpsError {
    if err.is_connect() || err.is_timeout() {
        OpsError::Connection(target.to_string(), err.to_string())
    } else {
        OpsError::Operation(format!("request to {} failed: {}", target, err))
    }
}

/// Read the body, turning a non-2xx status into `OpsError::HttpStatus`.
pub async fn read_success_body(response: Response) -> crate::Result<String> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| OpsError::Operation(format!("reading response from {} failed: {}", url, e)))?;
    if !status.is_success() {
        return Err(OpsError::HttpStatus {
            status: status.as_u16(),
            url,
            body: truncate(&body),
        });
    }
    Ok(body)
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_BODY_IN_ERROR {
        return body.trim().to_string();
    }
    let mut end = MAX_BODY_IN_ERROR;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
