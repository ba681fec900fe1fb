use super::*;

#[test]
fn test_bad_config_display() {
    let err = ReapError::bad_config("owner must be set");
    assert_eq!(err.to_string(), "invalid configuration: owner must be set");
}

#[test]
fn test_bad_config_carries_cause() {
    let parse_err = "x".parse::<u64>().unwrap_err();
    let err = ReapError::bad_config_with("interval overflows", parse_err);
    assert!(matches!(err, ReapError::BadConfig { cause: Some(_), .. }));
}

#[test]
fn test_denied_display() {
    let err = ReapError::denied("version deletion", 403);
    assert_eq!(
        err.to_string(),
        "permission denied during version deletion (http 403)"
    );
}

#[test]
fn test_missing_display_and_predicate() {
    let err = ReapError::missing("manifest sha256:abc");
    assert_eq!(err.to_string(), "missing manifest sha256:abc");
    assert!(err.is_missing());
}

#[test]
fn test_is_missing_is_variant_specific() {
    assert!(!ReapError::http("socket closed").is_missing());
    assert!(!ReapError::denied("anything", 401).is_missing());
}

#[test]
fn test_throttled_display_with_and_without_hint() {
    assert_eq!(
        ReapError::throttled(Some(30)).to_string(),
        "rate limited by the server, retry after 30s"
    );
    assert_eq!(
        ReapError::throttled(None).to_string(),
        "rate limited by the server"
    );
}

#[test]
fn test_upstream_display() {
    let err = ReapError::upstream(502, "bad gateway");
    assert_eq!(err.to_string(), "server failure (http 502): bad gateway");
}

#[test]
fn test_http_with_source_chains() {
    use std::error::Error as _;

    let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
    let err = ReapError::http_with("manifest fetch", io_err);
    assert_eq!(err.to_string(), "transport failure: manifest fetch");
    assert!(err.source().is_some());
}

#[test]
fn test_malformed_display() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = ReapError::malformed_with("manifest JSON", json_err);
    assert_eq!(err.to_string(), "unusable manifest JSON");
    assert!(matches!(err, ReapError::Malformed { source: Some(_), .. }));
}

#[test]
fn test_errors_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ReapError>();
}
