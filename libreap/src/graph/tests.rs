use super::*;
use crate::testing::{FakeStore, days_ago, image_manifest_json, index_manifest_json};

fn load_index(store: &FakeStore) -> PackageIndex {
    let mut hub = store.hub();
    PackageIndex::load(&mut hub, "widget").unwrap()
}

#[test]
fn test_single_images_are_top_level() {
    let store = FakeStore::new();
    let a = store.push_manifest("widget", &["latest"], days_ago(1), &image_manifest_json("a"));
    let b = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("b"));

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let graph = ImageGraph::build(&mut registry, &index).unwrap();

    assert!(graph.top_level_digests().contains(&a));
    assert!(graph.top_level_digests().contains(&b));
    assert!(graph.children_of_top_level().is_empty());
}

#[test]
fn test_index_children_are_linked_and_excluded() {
    let store = FakeStore::new();
    let c1 = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("c1"));
    let c2 = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("c2"));
    let parent = store.push_manifest(
        "widget",
        &["latest"],
        days_ago(1),
        &index_manifest_json(&[(&c1, "amd64"), (&c2, "arm64")]),
    );

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let graph = ImageGraph::build(&mut registry, &index).unwrap();

    assert_eq!(graph.top_level_digests().len(), 1);
    assert!(graph.top_level_digests().contains(&parent));

    let parents: Vec<&String> = graph.parents_of(&c1).unwrap().iter().collect();
    assert_eq!(parents, vec![&parent]);
    assert!(graph.solely_used_by(&c1, &parent));
    assert!(graph.children_of_top_level().contains(&c2));
}

#[test]
fn test_shared_child_has_both_parents() {
    let store = FakeStore::new();
    let shared = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("shared"));
    let only1 = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("only1"));
    let only2 = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("only2"));
    let p1 = store.push_manifest(
        "widget",
        &["image1"],
        days_ago(1),
        &index_manifest_json(&[(&shared, "amd64"), (&only1, "arm64")]),
    );
    let p2 = store.push_manifest(
        "widget",
        &["image2"],
        days_ago(1),
        &index_manifest_json(&[(&shared, "amd64"), (&only2, "arm64")]),
    );

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let graph = ImageGraph::build(&mut registry, &index).unwrap();

    let parents = graph.parents_of(&shared).unwrap();
    assert_eq!(parents.len(), 2);
    assert!(parents.contains(&p1));
    assert!(parents.contains(&p2));
    assert!(!graph.solely_used_by(&shared, &p1));
}

#[test]
fn test_missing_children_do_not_enter_used_by() {
    let store = FakeStore::new();
    let ghost = store.push_manifest(
        "widget",
        &["ghost"],
        days_ago(1),
        &index_manifest_json(&[
            (
                "sha256:9999999999999999999999999999999999999999999999999999999999999999",
                "amd64",
            ),
        ]),
    );

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let graph = ImageGraph::build(&mut registry, &index).unwrap();

    assert!(graph.top_level_digests().contains(&ghost));
    assert!(graph.children_of_top_level().is_empty());
}

#[test]
fn test_referrer_target_and_children_are_excluded() {
    let store = FakeStore::new();
    let subject = store.push_manifest("widget", &["v1"], days_ago(1), &image_manifest_json("s"));
    let att_child =
        store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("att-child"));
    let referrer_tag = Digest::from_str(&subject).unwrap().referrer_tag();
    let att_index = store.push_manifest(
        "widget",
        &[&referrer_tag],
        days_ago(1),
        &index_manifest_json(&[(&att_child, "unknown")]),
    );

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let graph = ImageGraph::build(&mut registry, &index).unwrap();

    assert_eq!(graph.top_level_digests().len(), 1);
    assert!(graph.top_level_digests().contains(&subject));
    let excluded = graph.children_of_top_level();
    assert!(excluded.contains(&att_index));
    assert!(excluded.contains(&att_child));
}

#[test]
fn test_missing_manifest_is_recorded() {
    let store = FakeStore::new();
    // a version listed by the packages API with no manifest behind it
    store.push_version(
        "widget",
        "sha256:8888888888888888888888888888888888888888888888888888888888888888",
        &[],
        days_ago(1),
        None,
    );

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let graph = ImageGraph::build(&mut registry, &index).unwrap();

    assert!(graph.manifest_missing(
        "sha256:8888888888888888888888888888888888888888888888888888888888888888"
    ));
}

#[test]
fn test_edge_removal() {
    let store = FakeStore::new();
    let shared = store.push_manifest("widget", &[], days_ago(1), &image_manifest_json("shared"));
    let p1 = store.push_manifest(
        "widget",
        &["image1"],
        days_ago(1),
        &index_manifest_json(&[(&shared, "amd64")]),
    );
    let p2 = store.push_manifest(
        "widget",
        &["image2"],
        days_ago(1),
        &index_manifest_json(&[(&shared, "arm64")]),
    );

    let index = load_index(&store);
    let mut registry = store.registry("widget");
    let mut graph = ImageGraph::build(&mut registry, &index).unwrap();

    graph.remove_edge(&shared, &p1);
    assert!(graph.solely_used_by(&shared, &p2));

    graph.remove_edge(&shared, &p2);
    assert!(graph.parents_of(&shared).is_none());

    graph.remove_child_entry(&shared);
    assert!(graph.parents_of(&shared).is_none());
}
