//! Integration tests for the subscription lifecycle.

mod common;

use common::{ids, tag_update, wait_for, Delivery, Fixture, MetaRecorder, MockServer, Recorder};
use serde_json::json;
use std::sync::Arc;
use tagsync::{CacheError, Listener, ListenerKey, Tag, TagId, TagListener, TagValueUpdate, Timestamp};

// --- Subscribe and unsubscribe ---

#[test]
fn test_subscribe_then_unsubscribe_drains_store() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2, 3]));
    let recorder = Arc::new(Recorder::default());
    let key = ListenerKey::of(&recorder);

    fixture
        .manager
        .subscribe(&ids(&[1, 2, 3]), Listener::live(Arc::clone(&recorder)), false)
        .unwrap();
    assert_eq!(fixture.manager.cache_size(), 3);
    assert!(fixture.manager.is_subscribed(key));
    assert_eq!(fixture.push.registered_count(), 3);

    let removed = fixture.manager.unsubscribe_all(key);
    assert_eq!(removed, ids(&[1, 2, 3]));
    for id in 1..=3 {
        assert!(!fixture.store().contains(TagId(id)));
        assert!(!fixture.supervision.is_supervised(id));
    }
    assert_eq!(fixture.push.registered_count(), 0);
    assert!(!fixture.manager.is_subscribed(key));
    assert!(fixture.store().is_empty());
}

#[test]
fn test_shared_tags_survive_partial_unsubscribe() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2, 3]));
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    fixture
        .manager
        .subscribe(&ids(&[1, 2]), Listener::live(Arc::clone(&first)), false)
        .unwrap();
    fixture
        .manager
        .subscribe(&ids(&[2, 3]), Listener::live(Arc::clone(&second)), false)
        .unwrap();

    let removed = fixture.manager.unsubscribe_all(ListenerKey::of(&first));
    assert_eq!(removed, ids(&[1]));
    assert!(fixture.store().contains(TagId(2)));
    assert_eq!(fixture.manager.get_subscription_ids(ListenerKey::of(&second)), ids(&[2, 3]));

    let removed = fixture
        .manager
        .unsubscribe(&ids(&[2, 404]), ListenerKey::of(&second));
    assert_eq!(removed, ids(&[2]));
    assert_eq!(fixture.manager.cache_size(), 1);
}

#[test]
fn test_resubscribing_does_not_duplicate_listener() {
    let fixture = Fixture::new(MockServer::with_tags(&[1]));
    let recorder = Arc::new(Recorder::default());

    for _ in 0..2 {
        fixture
            .manager
            .subscribe(&ids(&[1]), Listener::live(Arc::clone(&recorder)), false)
            .unwrap();
    }

    let tag = fixture.store().get(TagId(1)).unwrap();
    assert_eq!(tag.listener_count(), 1);
    assert_eq!(fixture.server.state_request_count(), 1, "cached tags are not fetched again");
}

#[test]
fn test_empty_subscription_is_a_no_op() {
    let fixture = Fixture::new(MockServer::with_tags(&[1]));
    fixture
        .manager
        .subscribe(&ids(&[]), Listener::live(Arc::new(Recorder::default())), false)
        .unwrap();
    assert_eq!(fixture.manager.cache_size(), 0);
    assert_eq!(fixture.server.state_request_count(), 0);
}

// --- Initial values ---

#[test]
fn test_initial_batch_precedes_live_updates() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2]));
    let recorder = Arc::new(Recorder::default());

    fixture
        .manager
        .subscribe(&ids(&[1, 2]), Listener::with_initial_values(Arc::clone(&recorder)), true)
        .unwrap();
    fixture
        .push
        .publish(TagValueUpdate::new(TagId(1), json!(10), Timestamp(500)))
        .unwrap();
    assert!(wait_for(|| recorder.updates().len() == 1));

    let deliveries = recorder.deliveries.lock();
    match &deliveries[0] {
        Delivery::Initial(tags) => {
            assert_eq!(tags.len(), 2);
            assert!(tags.iter().all(Tag::is_valid));
        }
        other => panic!("expected initial batch first, got {other:?}"),
    }
    assert!(deliveries[1..]
        .iter()
        .all(|d| matches!(d, Delivery::Update(tag) if tag.value == Some(json!(10)))));
}

#[test]
fn test_initial_values_as_updates_when_not_requested() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2]));
    let capable = Arc::new(Recorder::default());
    let plain = Arc::new(Recorder::default());

    fixture
        .manager
        .subscribe(&ids(&[1, 2]), Listener::with_initial_values(Arc::clone(&capable)), false)
        .unwrap();
    fixture
        .manager
        .subscribe(&ids(&[1, 2]), Listener::live(Arc::clone(&plain)), true)
        .unwrap();

    for recorder in [&capable, &plain] {
        let deliveries = recorder.deliveries.lock();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| matches!(d, Delivery::Update(_))));
    }
}

// --- Meta-listeners ---

#[test]
fn test_meta_listeners_see_new_and_removed_tags() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2, 3]));
    let meta = Arc::new(MetaRecorder::default());
    fixture.manager.add_subscription_listener(Arc::clone(&meta) as _);

    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    fixture
        .manager
        .subscribe(&ids(&[1, 2]), Listener::live(Arc::clone(&first)), false)
        .unwrap();
    fixture
        .manager
        .subscribe(&ids(&[2, 3]), Listener::live(Arc::clone(&second)), false)
        .unwrap();
    assert_eq!(*meta.added.lock(), vec![ids(&[1, 2]), ids(&[3])]);

    fixture.manager.unsubscribe_all(ListenerKey::of(&first));
    assert_eq!(*meta.removed.lock(), vec![ids(&[1])]);

    assert!(fixture.manager.remove_subscription_listener(ListenerKey::of(&meta)));
    fixture.manager.unsubscribe_all(ListenerKey::of(&second));
    assert_eq!(meta.removed.lock().len(), 1);
}

// --- Failures ---

#[test]
fn test_rule_format_error_rolls_back_subscription() {
    let server = MockServer::with_tags(&[4]);
    server.put(tag_update(5, 5, 100).with_rule_expression("(#1 + #2"));
    let fixture = Fixture::new(server);
    let meta = Arc::new(MetaRecorder::default());
    fixture.manager.add_subscription_listener(Arc::clone(&meta) as _);
    let recorder = Arc::new(Recorder::default());

    let result = fixture
        .manager
        .subscribe(&ids(&[4, 5]), Listener::live(Arc::clone(&recorder)), false);

    assert!(matches!(result, Err(CacheError::RuleFormat { tag_id: TagId(5), .. })));
    assert!(!fixture.store().contains(TagId(4)));
    assert!(!fixture.store().contains(TagId(5)));
    assert_eq!(fixture.push.registered_count(), 0);
    assert!(recorder.deliveries.lock().is_empty());
    assert!(meta.added.lock().is_empty());
}

#[test]
fn test_panicking_listener_does_not_block_others() {
    struct Panicky;

    impl TagListener for Panicky {
        fn on_update(&self, _tag: &Tag) {
            panic!("listener failure");
        }
    }

    let fixture = Fixture::new(MockServer::with_tags(&[1]));
    let recorder = Arc::new(Recorder::default());
    fixture
        .manager
        .subscribe(&ids(&[1]), Listener::live(Arc::new(Panicky)), false)
        .unwrap();
    fixture
        .manager
        .subscribe(&ids(&[1]), Listener::live(Arc::clone(&recorder)), false)
        .unwrap();

    fixture.supervision.disconnect();
    assert!(recorder.last_update(1).unwrap().quality.is_set(tagsync::TagQualityStatus::BrokerDown));
}

// --- Patterns ---

#[test]
fn test_subscribe_by_pattern() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2, 10, 11]));
    let recorder = Arc::new(Recorder::default());

    let matched = fixture
        .manager
        .subscribe_by_pattern(["plant.tag.1*"], Listener::live(Arc::clone(&recorder)), false)
        .unwrap();

    assert_eq!(matched, ids(&[1, 10, 11]));
    assert_eq!(fixture.manager.get_subscription_ids(ListenerKey::of(&recorder)), matched);

    let result = fixture
        .manager
        .subscribe_by_pattern([""], Listener::live(Arc::clone(&recorder)), false);
    assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
}

#[test]
fn test_pattern_resolution_failure_is_reported() {
    let fixture = Fixture::new(MockServer::with_tags(&[1]));
    fixture.server.set_failing(true);

    let result = fixture.manager.subscribe_by_pattern(
        ["plant.*"],
        Listener::live(Arc::new(Recorder::default())),
        false,
    );
    assert!(result.unwrap_err().is_transport());
    assert_eq!(fixture.manager.cache_size(), 0);
}

// --- Reads ---

#[test]
fn test_reads_and_introspection() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2, 3]));
    let recorder = Arc::new(Recorder::default());
    fixture
        .manager
        .subscribe(&ids(&[1, 2]), Listener::live(Arc::clone(&recorder)), false)
        .unwrap();

    let subscriptions = fixture.manager.get_subscriptions(ListenerKey::of(&recorder));
    assert_eq!(subscriptions.len(), 2);

    let tags = fixture.manager.get_tags(&ids(&[1, 3, 77])).unwrap();
    assert_eq!(tags.len(), 3);
    assert_eq!(fixture.manager.cache_size(), 2, "fallback reads are not cached");
    let fetched = tags.iter().find(|t| t.id == TagId(3)).unwrap();
    assert_eq!(fetched.value, Some(json!(3)));
    let unknown = tags.iter().find(|t| t.id == TagId(77)).unwrap();
    assert!(!unknown.is_existing());

    assert_eq!(fixture.manager.get_tag(TagId(1)).unwrap().value, Some(json!(1)));
}

// --- History mode ---

#[test]
fn test_subscribing_in_history_mode_attaches_to_history_copy() {
    let fixture = Fixture::new(MockServer::with_tags(&[1, 2]));
    let recorder = Arc::new(Recorder::default());
    let key = ListenerKey::of(&recorder);
    fixture
        .manager
        .subscribe(&ids(&[1]), Listener::live(Arc::clone(&recorder)), false)
        .unwrap();

    fixture.store().set_history_mode(true);
    fixture
        .manager
        .subscribe(&ids(&[2]), Listener::live(Arc::clone(&recorder)), false)
        .unwrap();

    let history = fixture.store().get(TagId(2)).unwrap();
    assert!(history.is_listener_registered(key));
    assert!(!fixture.is_push_registered(2), "history copies are never registered");
    assert_eq!(fixture.manager.get_subscription_ids(key), ids(&[1, 2]));

    fixture.store().set_history_mode(false);
    let live = fixture.store().get(TagId(2)).unwrap();
    assert!(live.is_listener_registered(key));
    assert!(fixture.is_push_registered(2));
}
