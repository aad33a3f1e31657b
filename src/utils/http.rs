use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::utils::retryable::{self, RetryOptions};
use crate::utils::slow_warn::warn_if_slow;

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum number of body bytes echoed into an error message.
const MAX_ERROR_BODY_LEN: usize = 512;

/// Sends a request built by `req_builder`, retrying transient failures.
///
/// Successful responses and responses whose status is listed in `passthrough`
/// are returned to the caller untouched. Any other status is turned into an
/// [`Error`]: 401/403 into `Connection`, everything else into `Remote`.
pub async fn request(
    client: &reqwest::Client,
    req_builder: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    passthrough: &[StatusCode],
    options: &RetryOptions,
) -> Result<reqwest::Response> {
    retryable::run(
        || async {
            let request = req_builder(client).build()?;
            let method = request.method().clone();
            let url = request.url().clone();
            let resp = warn_if_slow(
                &|| format!("HTTP {method} {}", redact(&url)),
                SLOW_REQUEST_THRESHOLD,
                client.execute(request),
            )
            .await?;

            let status = resp.status();
            if status.is_success() || passthrough.contains(&status) {
                return Ok(resp);
            }
            let body = resp.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        },
        options,
    )
    .await
}

/// Reads a JSON body, reporting malformed payloads as `Decode` errors.
pub async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let body = resp.text().await?;
    Ok(serde_json::from_str(&body)?)
}

pub fn status_error(status: StatusCode, body: &str) -> Error {
    let mut message = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    let body = body.trim();
    if !body.is_empty() {
        let mut end = body.len().min(MAX_ERROR_BODY_LEN);
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        message.push_str(": ");
        message.push_str(&body[..end]);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::connection(format!("credentials rejected ({status})"))
        }
        _ => Error::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

/// Renders a URL for logs without user info.
fn redact(url: &reqwest::Url) -> String {
    let mut url = url.clone();
    let _ = url.set_password(None);
    let _ = url.set_username("");
    url.to_string()
}
