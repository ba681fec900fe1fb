use super::*;

fn sample_index() -> &'static str {
    r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111",
                "size": 1234,
                "platform": {"architecture": "amd64", "os": "linux"}
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:2222222222222222222222222222222222222222222222222222222222222222",
                "size": 1234,
                "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}
            }
        ],
        "annotations": {"org.opencontainers.image.source": "https://example.com"}
    }"#
}

fn sample_image() -> &'static str {
    r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": "sha256:3333333333333333333333333333333333333333333333333333333333333333",
            "size": 100
        },
        "layers": [
            {
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": "sha256:4444444444444444444444444444444444444444444444444444444444444444",
                "size": 5000
            }
        ]
    }"#
}

#[test]
fn test_parse_index_by_media_type() {
    let manifest = Manifest::from_bytes(sample_index().as_bytes()).unwrap();
    assert!(manifest.is_index());
    assert_eq!(manifest.entries().len(), 2);
    assert_eq!(manifest.media_type(), Some(MEDIA_TYPE_OCI_INDEX));
}

#[test]
fn test_parse_image_by_media_type() {
    let manifest = Manifest::from_bytes(sample_image().as_bytes()).unwrap();
    assert!(!manifest.is_index());
    assert!(manifest.entries().is_empty());
    match &manifest {
        Manifest::Image(image) => assert_eq!(image.layers.len(), 1),
        Manifest::Index(_) => panic!("expected image"),
    }
}

#[test]
fn test_parse_without_media_type_uses_manifests_key() {
    let doc = r#"{"schemaVersion": 2, "manifests": []}"#;
    let manifest = Manifest::from_bytes(doc.as_bytes()).unwrap();
    assert!(manifest.is_index());

    let doc = r#"{"schemaVersion": 2, "layers": []}"#;
    let manifest = Manifest::from_bytes(doc.as_bytes()).unwrap();
    assert!(!manifest.is_index());
}

#[test]
fn test_parse_rejects_invalid_json() {
    assert!(Manifest::from_bytes(b"{not json").is_err());
}

#[test]
fn test_child_digests() {
    let manifest = Manifest::from_bytes(sample_index().as_bytes()).unwrap();
    let children = manifest.child_digests();
    assert_eq!(children.len(), 2);
    assert!(children[0].starts_with("sha256:1111"));
}

#[test]
fn test_round_trip_preserves_unknown_fields() {
    let manifest = Manifest::from_bytes(sample_index().as_bytes()).unwrap();
    let bytes = manifest.to_bytes().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(value["schemaVersion"], 2);
    assert_eq!(
        value["annotations"]["org.opencontainers.image.source"],
        "https://example.com"
    );
    assert_eq!(value["manifests"][0]["size"], 1234);
}

#[test]
fn test_cleared_index_keeps_everything_but_children() {
    let manifest = Manifest::from_bytes(sample_index().as_bytes()).unwrap();
    let cleared = manifest.cleared();

    assert!(cleared.entries().is_empty());
    let value: serde_json::Value = serde_json::from_slice(&cleared.to_bytes().unwrap()).unwrap();
    assert_eq!(value["mediaType"], MEDIA_TYPE_OCI_INDEX);
    assert_eq!(value["schemaVersion"], 2);
    assert_eq!(value["manifests"], serde_json::json!([]));
    // the cleared document must differ from the original so it hashes to a
    // new digest
    assert_ne!(cleared.to_bytes().unwrap(), manifest.to_bytes().unwrap());
}

#[test]
fn test_cleared_image_keeps_config() {
    let manifest = Manifest::from_bytes(sample_image().as_bytes()).unwrap();
    let cleared = manifest.cleared();

    let value: serde_json::Value = serde_json::from_slice(&cleared.to_bytes().unwrap()).unwrap();
    assert_eq!(value["layers"], serde_json::json!([]));
    assert!(value["config"]["digest"].as_str().unwrap().starts_with("sha256:3333"));
}

#[test]
fn test_platform_label() {
    let manifest = Manifest::from_bytes(sample_index().as_bytes()).unwrap();
    let entries = manifest.entries();
    assert_eq!(entries[0].platform_label(), Some("amd64".to_string()));
    assert_eq!(entries[1].platform_label(), Some("arm64/v8".to_string()));
}

#[test]
fn test_child_label_real_platform() {
    let manifest = Manifest::from_bytes(sample_index().as_bytes()).unwrap();
    assert_eq!(child_label(&manifest.entries()[1], None), "architecture: arm64/v8");
}

#[test]
fn test_child_label_sigstore() {
    let entry: DescriptorEntry = serde_json::from_str(
        r#"{
            "digest": "sha256:5555555555555555555555555555555555555555555555555555555555555555",
            "artifactType": "application/vnd.dev.sigstore.bundle.v0.3+json",
            "platform": {"architecture": "unknown", "os": "unknown"}
        }"#,
    )
    .unwrap();
    assert_eq!(child_label(&entry, None), "sigstore attestation");
}

#[test]
fn test_child_label_in_toto() {
    let entry: DescriptorEntry = serde_json::from_str(
        r#"{
            "digest": "sha256:6666666666666666666666666666666666666666666666666666666666666666",
            "platform": {"architecture": "unknown", "os": "unknown"}
        }"#,
    )
    .unwrap();
    let attestation = Manifest::from_bytes(
        br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "layers": [{"mediaType": "application/vnd.in-toto+json"}]
        }"#,
    )
    .unwrap();
    assert_eq!(child_label(&entry, Some(&attestation)), "in-toto attestation");
}

#[test]
fn test_child_label_unknown_fallback() {
    let entry: DescriptorEntry = serde_json::from_str(
        r#"{
            "digest": "sha256:7777777777777777777777777777777777777777777777777777777777777777",
            "platform": {"architecture": "unknown", "os": "unknown"}
        }"#,
    )
    .unwrap();
    assert_eq!(child_label(&entry, None), "architecture: unknown");
}
