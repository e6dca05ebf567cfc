use std::sync::Arc;

use querynorm::cache::{
    EntityUpdate, MemoryQueryCache, NormalizedKey, NormalizerConfig, QueryCache, QueryKey,
    QueryNormalizer,
};
use serde_json::{Value, json};

const PHOTO: &str = "https://example.com/photo.jpg";

fn sample_project(partial: Value) -> Value {
    let mut project = json!({
        "id": "proj-123",
        "name": "Project Alpha",
        "description": "This is a sample project description.",
        "created_at": "2021-07-21T17:32:28Z",
        "last_activity_at": "2021-07-21T17:32:28Z",
        "personal": false,
        "archived_at": null,
        "archived": false,
        "slack_channel_id": "C024BE91L",
        "posts_count": 42,
        "guests_count": 0,
        "cover_photo_url": PHOTO,
        "url": "https://example.com/project-alpha",
        "call_room_url": null,
        "accessory": null,
        "private": true,
        "is_general": false,
        "is_default": false,
        "contributors_count": 5,
        "organization_id": "org-456",
        "viewer_has_favorited": false,
        "viewer_can_archive": true,
        "viewer_can_destroy": false,
        "viewer_can_unarchive": true,
        "viewer_can_update": true,
        "viewer_has_subscribed": false,
        "viewer_is_member": true,
        "unread_for_viewer": false,
        "slack_channel": null,
        "type_name": "project",
        "members_count": 1
    });
    if let (Some(fields), Value::Object(overrides)) = (project.as_object_mut(), partial) {
        fields.extend(overrides);
    }
    project
}

fn project() -> Value {
    sample_project(json!({}))
}

fn typed_engine() -> (Arc<MemoryQueryCache>, QueryNormalizer) {
    let host = Arc::new(MemoryQueryCache::new());
    let normalizer = QueryNormalizer::new(
        NormalizerConfig::with_type_fields(["type_name"]),
        host.clone(),
    );
    (host, normalizer)
}

fn query(host: &MemoryQueryCache, name: &str) -> Value {
    host.get_query_data(&QueryKey::from(name))
        .unwrap_or_else(|| panic!("query {name} should be cached"))
}

fn increment_contributors() -> EntityUpdate {
    EntityUpdate::with(|old| {
        let count = old
            .get("contributors_count")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        json!({"name": "Project Beta", "contributors_count": count + 1})
    })
}

fn write_all_shapes(host: &MemoryQueryCache) {
    let id = "proj-123";
    host.write("single", sample_project(json!({"id": id})));
    host.write(
        "array",
        json!([
            sample_project(json!({"id": id})),
            sample_project(json!({"id": "proj-456"}))
        ]),
    );
    host.write(
        "nested-object",
        json!({
            "foo": "bar",
            "project": sample_project(json!({"id": id})),
            "projects": [
                sample_project(json!({"id": id})),
                sample_project(json!({"id": "proj-456"}))
            ]
        }),
    );
}

#[test]
fn stores_query_data_in_the_normalized_cache() {
    let host = Arc::new(MemoryQueryCache::new());
    let normalizer = QueryNormalizer::new(NormalizerConfig::id_only(), host.clone());

    host.write("foo-bar", json!({"id": "foo", "color": "blue", "age": 10}));
    assert_eq!(
        normalizer.get_object_by_id("foo"),
        Some(json!({"id": "foo", "color": "blue", "age": 10}))
    );

    host.write("cat-dog", json!({"id": "foo", "color": "red", "age": 4}));
    assert_eq!(
        normalizer.get_object_by_id("foo"),
        Some(json!({"id": "foo", "color": "red", "age": 4}))
    );
}

#[test]
fn sets_normalized_models() {
    let (host, normalizer) = typed_engine();
    host.write("foo-bar", project());

    assert_eq!(
        normalizer.get_normalized_data("project", "proj-123"),
        Some(project())
    );

    normalizer
        .set_normalized_data("project", "proj-123", json!({"name": "Project Beta"}))
        .expect("patch applies");

    let record = normalizer
        .get_normalized_data("project", "proj-123")
        .expect("record");
    assert_eq!(record["name"], json!("Project Beta"));
    assert_eq!(record["cover_photo_url"], json!(PHOTO));
}

#[test]
fn updates_normalized_models() {
    let (host, normalizer) = typed_engine();
    host.write("foo-bar", project());

    normalizer
        .set_normalized_data("project", "proj-123", increment_contributors())
        .expect("updater applies");

    let record = normalizer
        .get_normalized_data("project", "proj-123")
        .expect("record");
    assert_eq!(record["name"], json!("Project Beta"));
    assert_eq!(record["contributors_count"], json!(6));
    assert_eq!(record["cover_photo_url"], json!(PHOTO));
}

#[test]
fn updater_sees_latest_committed_value() {
    let (host, normalizer) = typed_engine();
    host.write("foo-bar", project());

    normalizer
        .set_normalized_data("project", "proj-123", json!({"contributors_count": 10}))
        .expect("patch applies");
    normalizer
        .set_normalized_data("project", "proj-123", increment_contributors())
        .expect("updater applies");

    assert_eq!(
        normalizer
            .get_normalized_data("project", "proj-123")
            .expect("record")["contributors_count"],
        json!(11)
    );
}

#[test]
fn sets_normalized_models_across_queries_and_shapes() {
    let (host, normalizer) = typed_engine();
    write_all_shapes(&host);

    assert_eq!(
        normalizer.get_normalized_data("project", "proj-123"),
        Some(project())
    );

    normalizer
        .set_normalized_data("project", "proj-123", json!({"name": "Project Beta"}))
        .expect("patch applies");

    let record = normalizer
        .get_normalized_data("project", "proj-123")
        .expect("record");
    let single = query(&host, "single");
    let array = query(&host, "array");
    let nested = query(&host, "nested-object");

    for shown in [
        &record,
        &single,
        &array[0],
        &nested["project"],
        &nested["projects"][0],
    ] {
        assert_eq!(shown["name"], json!("Project Beta"));
        assert_eq!(shown["cover_photo_url"], json!(PHOTO));
    }
    assert_eq!(array[1]["name"], json!("Project Alpha"));
    assert_eq!(nested["foo"], json!("bar"));
    assert_eq!(nested["projects"].as_array().map(Vec::len), Some(2));
}

#[test]
fn updates_normalized_models_across_queries_and_shapes() {
    let (host, normalizer) = typed_engine();
    write_all_shapes(&host);

    normalizer
        .set_normalized_data("project", "proj-123", increment_contributors())
        .expect("updater applies");

    let record = normalizer
        .get_normalized_data("project", "proj-123")
        .expect("record");
    let single = query(&host, "single");
    let array = query(&host, "array");
    let nested = query(&host, "nested-object");

    for shown in [
        &record,
        &single,
        &array[0],
        &nested["project"],
        &nested["projects"][0],
    ] {
        assert_eq!(shown["name"], json!("Project Beta"));
        assert_eq!(shown["contributors_count"], json!(6));
        assert_eq!(shown["cover_photo_url"], json!(PHOTO));
    }
}

#[test]
fn creates_optimistic_updates_with_rollbacks_with_function() {
    let (host, normalizer) = typed_engine();
    host.write("foo-bar", project());

    let update = normalizer
        .create_optimistic_update("project", "proj-123", increment_contributors())
        .expect("valid update")
        .expect("known entity");

    let optimistic = update.optimistic_value();
    assert_eq!(optimistic["name"], json!("Project Beta"));
    assert_eq!(optimistic["contributors_count"], json!(6));
    assert_eq!(optimistic["cover_photo_url"], json!(PHOTO));

    assert_eq!(
        update.rollback_value(),
        json!({"name": "Project Alpha", "contributors_count": 5})
    );
    assert!(update.rollback_data.get("cover_photo_url").is_none());

    // Preparing commits nothing.
    assert_eq!(
        normalizer.get_normalized_data("project", "proj-123"),
        Some(project())
    );
}

#[test]
fn creates_optimistic_updates_with_rollbacks_with_an_object() {
    let (host, normalizer) = typed_engine();
    host.write("foo-bar", project());

    let update = normalizer
        .create_optimistic_update(
            "project",
            "proj-123",
            json!({"name": "Project Beta", "archived": true}),
        )
        .expect("valid update")
        .expect("known entity");

    assert_eq!(update.optimistic_data.get("name"), Some(&json!("Project Beta")));
    assert_eq!(update.optimistic_data.get("archived"), Some(&json!(true)));

    assert_eq!(update.rollback_data.get("name"), Some(&json!("Project Alpha")));
    assert_eq!(update.rollback_data.get("archived"), Some(&json!(false)));
    assert!(update.rollback_data.get("cover_photo_url").is_none());
}

#[test]
fn optimistic_update_for_unknown_entity_is_none() {
    let (host, normalizer) = typed_engine();
    host.write("foo-bar", project());

    let update = normalizer
        .create_optimistic_update("project", "proj-999", json!({"name": "Project Beta"}))
        .expect("not an error");
    assert!(update.is_none());

    let update = normalizer
        .create_optimistic_update("user", "proj-123", increment_contributors())
        .expect("not an error");
    assert!(update.is_none());
}

#[test]
fn rollback_keeps_concurrent_changes() {
    let (host, normalizer) = typed_engine();
    host.write("single", project());

    let update = normalizer
        .create_optimistic_update("project", "proj-123", json!({"name": "Project Beta"}))
        .expect("valid update")
        .expect("known entity");
    normalizer.commit_optimistic_update(&update);
    assert_eq!(query(&host, "single")["name"], json!("Project Beta"));

    host.write(
        "other",
        sample_project(json!({"name": "Project Beta", "members_count": 7})),
    );
    normalizer
        .rollback_optimistic_update(&update)
        .expect("entity still stored");

    let record = normalizer
        .get_normalized_data("project", "proj-123")
        .expect("record");
    assert_eq!(record["name"], json!("Project Alpha"));
    assert_eq!(record["members_count"], json!(7));
    assert_eq!(query(&host, "single")["name"], json!("Project Alpha"));
    assert_eq!(query(&host, "other")["name"], json!("Project Alpha"));
}

#[test]
fn reorders_items_in_an_array() {
    let (host, normalizer) = typed_engine();
    let id = "proj-123";

    host.write(
        "array",
        json!([
            sample_project(json!({"id": id})),
            sample_project(json!({"id": "proj-456"}))
        ]),
    );
    assert_eq!(
        normalizer.get_normalized_data("project", id),
        Some(sample_project(json!({"id": id})))
    );

    host.write(
        "array",
        json!([
            sample_project(json!({"id": id, "name": "Project Beta", "contributors_count": 9})),
            sample_project(json!({"id": "proj-456"}))
        ]),
    );

    let record = normalizer.get_normalized_data("project", id).expect("record");
    assert_eq!(record["name"], json!("Project Beta"));
    assert_eq!(record["contributors_count"], json!(9));
    assert_eq!(record["cover_photo_url"], json!(PHOTO));

    let array = query(&host, "array");
    assert_eq!(array[0]["name"], json!("Project Beta"));
    assert_eq!(array[0]["contributors_count"], json!(9));
    assert_eq!(array[0]["cover_photo_url"], json!(PHOTO));

    host.write(
        "array",
        json!([
            sample_project(json!({"id": "proj-456", "name": "Project Gamma"})),
            sample_project(json!({"id": id, "name": "Project Beta", "contributors_count": 9}))
        ]),
    );

    let array = query(&host, "array");
    assert_eq!(array[0]["name"], json!("Project Gamma"));
    assert_eq!(array[0]["cover_photo_url"], json!(PHOTO));
    assert_eq!(array[1]["name"], json!("Project Beta"));
    assert_eq!(array[1]["cover_photo_url"], json!(PHOTO));
}

#[test]
fn patch_after_reorder_lands_at_new_position() {
    let (host, normalizer) = typed_engine();
    host.write(
        "array",
        json!([
            sample_project(json!({"id": "proj-123"})),
            sample_project(json!({"id": "proj-456"}))
        ]),
    );
    host.write(
        "array",
        json!([
            sample_project(json!({"id": "proj-456"})),
            sample_project(json!({"id": "proj-123"}))
        ]),
    );

    normalizer
        .set_normalized_data("project", "proj-123", json!({"name": "Project Beta"}))
        .expect("patch applies");

    let array = query(&host, "array");
    assert_eq!(array[0]["id"], json!("proj-456"));
    assert_eq!(array[0]["name"], json!("Project Alpha"));
    assert_eq!(array[1]["id"], json!("proj-123"));
    assert_eq!(array[1]["name"], json!("Project Beta"));

    let references = normalizer.references(&NormalizedKey::new("project", "proj-123"));
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].path.to_string(), "$[1]");
}

#[test]
fn partial_objects_do_not_erase_detail_fields() {
    let (host, normalizer) = typed_engine();
    host.write("detail", project());
    host.write(
        "list",
        json!({"items": [{"id": "proj-123", "type_name": "project", "name": "Renamed"}]}),
    );

    let record = normalizer
        .get_normalized_data("project", "proj-123")
        .expect("record");
    assert_eq!(record["name"], json!("Renamed"));
    assert_eq!(record["cover_photo_url"], json!(PHOTO));
    assert_eq!(query(&host, "detail")["name"], json!("Renamed"));
    assert_eq!(
        query(&host, "list"),
        json!({"items": [{"id": "proj-123", "type_name": "project", "name": "Renamed"}]})
    );
}

#[test]
fn nested_entities_are_extracted_and_refreshed() {
    let (host, normalizer) = typed_engine();
    host.write(
        "single",
        sample_project(json!({
            "owner": {"id": "user-1", "type_name": "user", "display_name": "Ada"}
        })),
    );
    host.write(
        "members",
        json!([{"id": "user-1", "type_name": "user", "display_name": "Ada"}]),
    );

    assert_eq!(
        normalizer.get_normalized_data("user", "user-1"),
        Some(json!({"id": "user-1", "type_name": "user", "display_name": "Ada"}))
    );

    normalizer
        .set_normalized_data("user", "user-1", json!({"display_name": "Ada L."}))
        .expect("patch applies");

    assert_eq!(
        query(&host, "single")["owner"]["display_name"],
        json!("Ada L.")
    );
    assert_eq!(query(&host, "members")[0]["display_name"], json!("Ada L."));
    assert_eq!(
        normalizer.dependent_queries(&[NormalizedKey::new("user", "user-1")]),
        vec![QueryKey::from("members"), QueryKey::from("single")]
    );
}

#[test]
fn unrelated_writes_are_left_alone() {
    let (host, normalizer) = typed_engine();
    host.write("settings", json!({"theme": "dark", "ids": [1, 2, 3]}));
    host.write("single", project());

    normalizer
        .set_normalized_data("project", "proj-123", json!({"name": "Project Beta"}))
        .expect("patch applies");

    assert_eq!(
        query(&host, "settings"),
        json!({"theme": "dark", "ids": [1, 2, 3]})
    );
    assert_eq!(normalizer.stats().entities, 1);
}

#[test]
fn independent_normalizers_do_not_share_state() {
    let (host_a, normalizer_a) = typed_engine();
    let (host_b, normalizer_b) = typed_engine();

    host_a.write("single", project());
    host_b.write("single", sample_project(json!({"name": "Other"})));

    assert_eq!(
        normalizer_a.get_normalized_data("project", "proj-123").expect("a")["name"],
        json!("Project Alpha")
    );
    assert_eq!(
        normalizer_b.get_normalized_data("project", "proj-123").expect("b")["name"],
        json!("Other")
    );
}

#[test]
fn removed_queries_are_not_rewritten() {
    let (host, normalizer) = typed_engine();
    host.write("single", project());
    host.write("array", json!([project()]));
    host.remove_query(&QueryKey::from("array"));

    let report = normalizer
        .set_normalized_data("project", "proj-123", json!({"name": "Project Beta"}))
        .expect("patch applies");

    assert_eq!(report.rewritten, vec![QueryKey::from("single")]);
    assert!(host.get_query_data(&QueryKey::from("array")).is_none());
}
