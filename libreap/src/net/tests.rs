use super::*;
use reqwest::header::{HeaderMap, HeaderValue, LINK, RETRY_AFTER};

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::new()
}

#[test]
fn test_parse_retry_after_seconds() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
    assert_eq!(parse_retry_after(&headers), Some(120));
}

#[test]
fn test_parse_retry_after_http_date_in_past() {
    let mut headers = HeaderMap::new();
    headers.insert(
        RETRY_AFTER,
        HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    assert_eq!(parse_retry_after(&headers), Some(0));
}

#[test]
fn test_parse_retry_after_missing_or_invalid() {
    let headers = HeaderMap::new();
    assert_eq!(parse_retry_after(&headers), None);

    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_static("not-a-delay"));
    assert_eq!(parse_retry_after(&headers), None);
}

#[test]
fn test_next_link_extracts_rel_next() {
    let mut headers = HeaderMap::new();
    headers.insert(
        LINK,
        HeaderValue::from_static(
            "<https://api.github.com/resource?page=2>; rel=\"next\", \
             <https://api.github.com/resource?page=9>; rel=\"last\"",
        ),
    );
    assert_eq!(
        next_link(&headers),
        Some("https://api.github.com/resource?page=2".to_string())
    );
}

#[test]
fn test_next_link_absent_when_no_next_rel() {
    let mut headers = HeaderMap::new();
    headers.insert(
        LINK,
        HeaderValue::from_static("<https://api.github.com/resource?page=1>; rel=\"prev\""),
    );
    assert_eq!(next_link(&headers), None);
    assert_eq!(next_link(&HeaderMap::new()), None);
}

#[test]
fn test_join_next_url() {
    assert_eq!(
        join_next_url("https://api.github.com", "https://api.github.com/x?page=2"),
        "https://api.github.com/x?page=2"
    );
    assert_eq!(
        join_next_url("https://ghcr.io/", "/v2/x/tags/list?last=t"),
        "https://ghcr.io/v2/x/tags/list?last=t"
    );
}

#[test]
fn test_send_with_retries_gives_up_after_three_attempts() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/down")
        .with_status(503)
        .expect(3)
        .create();

    let url = format!("{}/down", server.url());
    let http = client();
    let response = send_with_retries("down resource", || http.get(&url)).unwrap();

    // the final response is handed back for status translation
    assert_eq!(response.status().as_u16(), 503);
    mock.assert();
}

#[test]
fn test_send_with_retries_does_not_retry_definitive_status() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(1)
        .create();

    let url = format!("{}/missing", server.url());
    let http = client();
    let response = send_with_retries("missing resource", || http.get(&url)).unwrap();

    assert_eq!(response.status().as_u16(), 404);
    mock.assert();
}

#[test]
fn test_check_status_maps_statuses() {
    let mut server = mockito::Server::new();
    for (path, status, expectation) in [
        ("/a", 401, "denied"),
        ("/b", 403, "denied"),
        ("/c", 404, "missing"),
        ("/d", 429, "throttled"),
        ("/e", 500, "upstream"),
        ("/g", 502, "upstream"),
        ("/f", 418, "http"),
    ] {
        server.mock("GET", path).with_status(status).create();
        let url = format!("{}{}", server.url(), path);
        let response = client().get(&url).send().unwrap();
        let err = check_status(response, path).unwrap_err();
        let matched = match expectation {
            "denied" => matches!(err, ReapError::Denied { .. }),
            "missing" => matches!(err, ReapError::Missing { .. }),
            "throttled" => matches!(err, ReapError::Throttled { .. }),
            "upstream" => matches!(err, ReapError::Upstream { .. }),
            _ => matches!(err, ReapError::Http { .. }),
        };
        assert!(matched, "status {} mapped to {:?}", status, err);
    }
}

#[test]
fn test_check_status_keeps_the_description() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/gone").with_status(404).create();

    let url = format!("{}/gone", server.url());
    let response = client().get(&url).send().unwrap();
    let err = check_status(response, "manifest sha256:abc").unwrap_err();
    assert_eq!(err.to_string(), "missing manifest sha256:abc");
}

#[test]
fn test_check_status_passes_success_through() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/ok").with_status(200).with_body("yes").create();

    let url = format!("{}/ok", server.url());
    let response = client().get(&url).send().unwrap();
    let response = check_status(response, "thing").unwrap();
    assert_eq!(response.text().unwrap(), "yes");
}
