//! Controllers, views and the outlet driven by store changes and states.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use modelsync::adapter::FixtureAdapter;
use modelsync::app::AppContext;
use modelsync::schema::ModelType;
use modelsync::state::{StateError, StateManager, StateNode, StateTree, ViewDescriptor};
use modelsync::view::{ArrayController, CollectionView, ObjectController, Outlet, RecordView, View};
use serde_json::json;

fn seeded(latency: Option<Duration>) -> FixtureAdapter {
    let mut adapter = FixtureAdapter::new();
    if let Some(latency) = latency {
        adapter = adapter.with_latency(latency);
    }
    adapter.insert("photo", json!({"id": 1, "title": "A"}));
    adapter.insert("photo", json!({"id": 2, "title": "B"}));
    adapter
}

fn title(record: &modelsync::record::Record) -> String {
    record.get_str("title").unwrap_or_default()
}

fn app_tree() -> StateTree {
    StateTree::build(
        StateNode::new("root")
            .initial("home")
            .child(StateNode::new("home"))
            .child(
                StateNode::new("photos")
                    .initial("index")
                    .child(
                        StateNode::new("index")
                            .view(ViewDescriptor::new("photos").showing("photo")),
                    ),
            )
            .child(StateNode::new("about").view(ViewDescriptor::new("about"))),
    )
    .unwrap()
}

#[tokio::test]
async fn test_collection_view_patches_only_affected_children() {
    let (store, _) = fixture_store(seeded(None));
    let photos = store.find_all_loaded("photo").await.unwrap();
    let controller = ArrayController::with_content(photos);
    let view = CollectionView::new(&controller, title);
    assert_eq!(view.render(), vec!["A", "B"]);
    assert_eq!(view.render_counts(), vec![1, 1]);

    store
        .push(&ModelType::new("photo"), json!({"id": 3, "title": "C"}))
        .unwrap();
    assert_eq!(view.render(), vec!["A", "B", "C"]);
    assert_eq!(view.render_counts(), vec![1, 1, 1]);

    let first = store.peek("photo", "1").unwrap();
    store.set_attribute(&first, "title", "A2").unwrap();
    assert_eq!(view.render(), vec!["A2", "B", "C"]);
    assert_eq!(view.render_counts(), vec![2, 1, 1]);

    store.unload(&store.peek("photo", "2").unwrap());
    assert_eq!(view.render(), vec!["A2", "C"]);
    assert_eq!(view.render_counts(), vec![2, 1]);
}

#[tokio::test]
async fn test_replacing_content_rebuilds_the_view() {
    let (store, _) = fixture_store(seeded(None));
    let controller = ArrayController::new();
    let view = CollectionView::new(&controller, title);
    assert!(view.is_empty());

    let photos = store.find_all_loaded("photo").await.unwrap();
    controller.set_content(Some(photos));
    assert_eq!(view.render(), vec!["A", "B"]);

    controller.set_content(None);
    assert!(view.is_empty());

    // Changes to the old content no longer reach the view.
    store
        .push(&ModelType::new("photo"), json!({"id": 4, "title": "D"}))
        .unwrap();
    assert!(view.is_empty());
}

#[tokio::test]
async fn test_record_view_follows_its_record() {
    let (store, _) = fixture_store(seeded(None));
    let photo = store.find_loaded("photo", "1").await.unwrap();
    let controller = ObjectController::new(store.clone());
    let view = RecordView::new(&controller);
    assert!(view.render().is_empty());

    controller.set_content(Some(photo.clone()));
    assert_eq!(view.render(), vec!["title: A", "url: "]);
    assert_eq!(controller.get("title"), Some(json!("A")));

    store.set_attribute(&photo, "url", "http://a").unwrap();
    assert_eq!(view.render(), vec!["title: A", "url: http://a"]);

    store.delete_record(&photo);
    assert!(view.render().is_empty());
}

#[tokio::test]
async fn test_outlet_renders_current_state_view() {
    let states = StateManager::new(app_tree());
    states.start();
    let outlet = Outlet::new();

    // The initial state has no view.
    assert!(outlet.render(&states).unwrap().is_empty());

    states.go_to_state("about").unwrap();
    assert_eq!(
        outlet.render(&states).unwrap_err(),
        StateError::MissingView {
            view: "about".to_string()
        }
    );

    let (store, _) = fixture_store(seeded(None));
    let controller = ArrayController::with_content(store.find_all_loaded("photo").await.unwrap());
    outlet.connect("about", Arc::new(CollectionView::new(&controller, title)));
    assert_eq!(outlet.render(&states).unwrap(), vec!["A", "B"]);

    assert!(outlet.disconnect("about").is_some());
    assert!(outlet.view("about").is_none());
}

#[tokio::test]
async fn test_load_for_state_binds_content() {
    let (store, _) = fixture_store(seeded(None));
    let ctx = AppContext::new(store, StateManager::new(app_tree()));
    assert_eq!(ctx.states().current_path().as_deref(), Some("home"));

    let load = ctx.load_for_state("photos").await.unwrap();
    assert!(load.applied);
    assert_eq!(load.transition.to, "photos.index");

    let controller = ctx.array_controller("photos");
    assert_eq!(controller.len(), 2);
    ctx.outlet()
        .connect("photos", Arc::new(CollectionView::new(&controller, title)));
    assert_eq!(ctx.outlet().render(ctx.states()).unwrap(), vec!["A", "B"]);
}

#[tokio::test]
async fn test_stale_state_load_is_dropped() {
    let (store, _) = fixture_store(seeded(Some(Duration::from_millis(100))));
    let ctx = AppContext::new(store, StateManager::new(app_tree()));

    let pending = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.load_for_state("photos").await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    ctx.states().go_to_state("about").unwrap();

    let load = pending.await.unwrap().unwrap();
    assert!(!load.applied);
    assert!(ctx.array_controller("photos").content().is_none());
    assert_eq!(ctx.states().current_path().as_deref(), Some("about"));

    // The fetched records still landed in the store.
    assert_eq!(ctx.store().all("photo").unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_state_path_fails_load() {
    let (store, adapter) = fixture_store(seeded(None));
    let ctx = AppContext::new(store, StateManager::new(app_tree()));

    assert!(ctx.load_for_state("photos.missing").await.is_err());
    assert_eq!(ctx.states().current_path().as_deref(), Some("home"));
    assert_eq!(adapter.request_count(), 0);
}
