//! Shared HTTP plumbing for the registry and packages clients.
//!
//! Both clients speak to well-behaved HTTP APIs with the same failure
//! surface: transient network errors, rate limiting with `Retry-After`
//! hints, `Link`-header pagination, and a common status-to-error mapping.

use crate::error::{ReapError, Result};
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Maximum attempts per logical request.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts.
const BACKOFF_BASE_MS: u64 = 500;

/// Sends a request with bounded retries.
///
/// Transient failures (timeouts, connection errors, 5xx, 429) are retried
/// up to three attempts with exponential backoff; a 429 honours the
/// server's `Retry-After` hint instead. Definitive responses, including
/// 4xx, are returned to the caller untouched.
pub(crate) fn send_with_retries<F>(what: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let outcome = build().send();

        match outcome {
            Err(error) => {
                let transient = error.is_timeout() || error.is_connect();
                if transient && attempt < MAX_ATTEMPTS {
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, retrying: {}",
                        error
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Err(transport_error(error, what));
            }
            Ok(response) => {
                let status = response.status();
                let retryable = status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error();
                if retryable && attempt < MAX_ATTEMPTS {
                    let delay = parse_retry_after(response.headers())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| backoff_delay(attempt));
                    tracing::debug!(
                        what,
                        attempt,
                        status = status.as_u16(),
                        delay_ms = delay.as_millis() as u64,
                        "retryable status, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt - 1))
}

/// Parses the Retry-After header from a rate limit response.
///
/// The header can be delay-seconds (`Retry-After: 120`) or an HTTP-date
/// per RFC 7231. Returns the delay in seconds, or None if the header is
/// missing or invalid.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let retry_after = headers.get(reqwest::header::RETRY_AFTER)?;
    let retry_str = retry_after.to_str().ok()?;

    if let Ok(seconds) = retry_str.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(datetime) = httpdate::parse_http_date(retry_str) {
        let now = std::time::SystemTime::now();
        if datetime > now {
            if let Ok(duration) = datetime.duration_since(now) {
                return Some(duration.as_secs());
            }
        } else {
            return Some(0);
        }
    }

    None
}

/// Extracts the next page URL from the Link header.
///
/// Both the packages API and the distribution API paginate with
/// `Link: <url>; rel="next"`. The returned string may be absolute (GitHub)
/// or a path (registry); [`join_next_url`] resolves either against a base.
pub(crate) fn next_link(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let link_header = headers.get(reqwest::header::LINK)?;
    let link_str = link_header.to_str().ok()?;

    for link_part in link_str.split(',') {
        let link_part = link_part.trim();

        if link_part.contains("rel=\"next\"") || link_part.contains("rel='next'") {
            if let Some(start) = link_part.find('<')
                && let Some(end) = link_part.find('>')
            {
                return Some(link_part[start + 1..end].to_string());
            }
        }
    }

    None
}

/// Resolves a Link-header continuation against the API base URL.
pub(crate) fn join_next_url(base: &str, next: &str) -> String {
    if next.starts_with("http://") || next.starts_with("https://") {
        next.to_string()
    } else {
        format!("{}{}", base.trim_end_matches('/'), next)
    }
}

/// Wraps a reqwest failure, naming what was being attempted.
pub(crate) fn transport_error(error: reqwest::Error, what: &str) -> ReapError {
    let context = if error.is_timeout() {
        format!("{} timed out", what)
    } else if error.is_connect() {
        format!("could not connect for {}", what)
    } else {
        format!("{} failed mid-request", what)
    };
    ReapError::http_with(context, error)
}

/// Maps a non-success status onto the error taxonomy.
///
/// `what` describes the request in one phrase ("manifest sha256:...",
/// "owner lookup for acme") and flows into the error so log lines stay
/// readable without the caller re-wrapping. Success responses pass
/// through untouched; 404 becomes a `Missing` error the caller can
/// tolerate via [`ReapError::is_missing`].
pub(crate) fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let url = response.url().to_string();
    let body = response
        .text()
        .unwrap_or_else(|_| String::from("(no response body)"));

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ReapError::denied(format!("{} at {}", what, url), status.as_u16())
        }
        StatusCode::NOT_FOUND => ReapError::missing(what),
        StatusCode::TOO_MANY_REQUESTS => ReapError::throttled(parse_retry_after(&headers)),
        s if s.is_server_error() => ReapError::upstream(s.as_u16(), body),
        s => ReapError::http(format!(
            "unexpected status {} for {}: {}",
            s.as_u16(),
            what,
            body
        )),
    })
}
