use super::Coordinator;
use super::message::Outgoing;
use super::session::{Generation, Session, SessionId, SessionState, select_subprotocol};
use super::subscription::{SubscriptionMatcher, matches};
use super::topic::{Publication, TopicDirectory, TopicFlags, Upsert, ValueRejected};
use crate::codec::nt3::Nt3Message;
use crate::codec::nt4::{Properties, SUBPROTOCOL_V40, SUBPROTOCOL_V41, SubscribeOptions};
use crate::codec::{Value, ValueType};
use serde_json::json;
use tokio::sync::mpsc;

fn props(value: serde_json::Value) -> Properties {
    value.as_object().cloned().unwrap()
}

fn attach(coordinator: &mut Coordinator) -> (SessionId, mpsc::Receiver<Outgoing>) {
    attach_with_capacity(coordinator, 64)
}

fn attach_with_capacity(
    coordinator: &mut Coordinator,
    capacity: usize,
) -> (SessionId, mpsc::Receiver<Outgoing>) {
    let (tx, rx) = mpsc::channel(capacity);
    let session = Session::new(Generation::Nt4, Some(SUBPROTOCOL_V41.to_string()), tx);
    (coordinator.attach_nt4(session), rx)
}

fn drain(rx: &mut mpsc::Receiver<Outgoing>) -> Vec<Outgoing> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn announces(msgs: &[Outgoing]) -> Vec<(u32, String, Option<i64>)> {
    msgs.iter()
        .filter_map(|m| match m {
            Outgoing::Announce {
                id, name, pubuid, ..
            } => Some((*id, name.clone(), *pubuid)),
            _ => None,
        })
        .collect()
}

fn everything() -> SubscribeOptions {
    SubscribeOptions {
        prefix: true,
        ..SubscribeOptions::default()
    }
}

#[test]
fn test_directory_create_is_idempotent() {
    let mut dir = TopicDirectory::new();
    let first = dir.create_or_update("/a", ValueType::Double, &Properties::new());
    let second = dir.create_or_update("/a", ValueType::Double, &Properties::new());

    assert_eq!(first, Upsert::Created(1));
    assert_eq!(
        second,
        Upsert::Existing {
            id: 1,
            applied: Properties::new()
        }
    );
    assert_eq!(dir.len(), 1);
    assert_eq!(dir.lookup("/a").unwrap().id, 1);
    assert_eq!(dir.lookup_by_id(1).unwrap().name, "/a");
}

#[test]
fn test_directory_null_property_deletes_key() {
    let mut dir = TopicDirectory::new();
    dir.create_or_update("/a", ValueType::Int, &props(json!({"persistent": true, "unit": "m"})));
    assert!(dir.lookup("/a").unwrap().flags.is_persistent());

    let (_, applied) = dir
        .set_properties("/a", &props(json!({"persistent": null, "unit": "m"})))
        .unwrap();

    let topic = dir.lookup("/a").unwrap();
    assert!(!topic.properties.contains_key("persistent"));
    assert_eq!(topic.properties.get("unit"), Some(&json!("m")));
    assert!(!topic.flags.is_persistent());
    // unchanged keys are not part of the delta
    assert_eq!(applied, props(json!({"persistent": null})));
}

#[test]
fn test_directory_flags_mirror_into_properties() {
    let mut dir = TopicDirectory::new();
    dir.create_or_update("/a", ValueType::Int, &Properties::new());
    dir.set_flags(1, TopicFlags::PERSISTENT).unwrap();
    assert_eq!(dir.lookup("/a").unwrap().properties.get("persistent"), Some(&json!(true)));

    dir.set_flags(1, TopicFlags::NONE).unwrap();
    assert!(dir.lookup("/a").unwrap().properties.is_empty());
}

#[test]
fn test_directory_set_value_rejections() {
    let mut dir = TopicDirectory::new();
    dir.create_or_update("/a", ValueType::Double, &Properties::new());

    assert_eq!(
        dir.set_value(9, Value::Double(1.0), 1).unwrap_err(),
        ValueRejected::UnknownTopic(9)
    );
    assert_eq!(
        dir.set_value(1, Value::Int(1), 1).unwrap_err(),
        ValueRejected::TypeMismatch {
            expected: ValueType::Double,
            actual: ValueType::Int
        }
    );
    assert!(dir.lookup("/a").unwrap().value.is_none());

    let topic = dir.set_value(1, Value::Double(2.5), 42).unwrap();
    assert_eq!(topic.value.as_ref().unwrap().timestamp, 42);
    assert_eq!(topic.seq, 1);
}

#[test]
fn test_directory_remove_and_publications() {
    let mut dir = TopicDirectory::new();
    dir.create_or_update("/a", ValueType::Boolean, &Properties::new());
    let publication = Publication {
        session: "s1".to_string(),
        pubuid: 3,
    };
    assert!(dir.add_publication(1, publication.clone()));
    assert!(!dir.add_publication(1, publication.clone()));
    assert_eq!(dir.find_publication(&publication), Some(1));
    assert_eq!(dir.remove_session_publications(&"s1".to_string()), vec![1]);
    assert!(dir.lookup("/a").unwrap().is_orphaned());

    assert!(dir.remove_by_name("/a").is_some());
    assert!(dir.lookup("/a").is_none());
    assert!(dir.remove(1).is_none());
}

#[test]
fn test_subscription_exact_and_prefix() {
    assert!(matches("/a", &["/a"], false));
    assert!(!matches("/a/b", &["/a"], false));

    assert!(matches("/a", &["/a"], true));
    assert!(matches("/a/b", &["/a"], true));
    assert!(!matches("/ab", &["/a"], true));
    assert!(matches("/ab", &["/"], true));
    assert!(matches("/anything", &[""], true));
}

#[test]
fn test_subscription_empty_pattern_set_matches_nothing() {
    let none: [&str; 0] = [];
    assert!(!matches("/a", &none, true));
    assert!(!matches("/a", &none, false));
}

#[test]
fn test_matcher_register_and_unregister() {
    let mut matcher = SubscriptionMatcher::new();
    let s1 = "s1".to_string();
    let id = matcher.register(&s1, 7, vec!["/a".to_string()], everything());
    assert_eq!(matcher.value_targets("/a/b"), vec![s1.clone()]);

    // unknown id is a no-op
    assert!(matcher.unregister(id + 100).is_none());
    assert_eq!(matcher.len(), 1);

    assert!(matcher.unregister(id).is_some());
    assert!(matcher.value_targets("/a/b").is_empty());
}

#[test]
fn test_matcher_topics_only_gets_no_values() {
    let mut matcher = SubscriptionMatcher::new();
    let options = SubscribeOptions {
        topicsonly: true,
        ..everything()
    };
    matcher.register(&"s1".to_string(), 1, vec!["".to_string()], options);
    assert!(matcher.value_targets("/a").is_empty());
}

#[test]
fn test_publish_announces_to_every_session() {
    let mut coordinator = Coordinator::default();
    let (a, mut rx_a) = attach(&mut coordinator);
    let (_b, mut rx_b) = attach(&mut coordinator);

    let id = coordinator
        .publish(&a, "/test/counter", ValueType::Double, 5, &Properties::new())
        .unwrap();
    assert_eq!(id, 1);

    assert_eq!(announces(&drain(&mut rx_a)), vec![(1, "/test/counter".to_string(), Some(5))]);
    assert_eq!(announces(&drain(&mut rx_b)), vec![(1, "/test/counter".to_string(), None)]);
}

#[test]
fn test_publish_twice_announces_once() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (_b, mut rx_b) = attach(&mut coordinator);
    let properties = props(json!({"unit": "rpm"}));

    coordinator.publish(&a, "/x", ValueType::Double, 1, &properties);
    coordinator.publish(&a, "/x", ValueType::Double, 1, &properties);

    assert_eq!(coordinator.directory().len(), 1);
    let received = drain(&mut rx_b);
    assert_eq!(announces(&received).len(), 1);
    assert!(!received.iter().any(|m| matches!(m, Outgoing::Properties { .. })));
}

#[test]
fn test_concurrent_publishers_share_one_topic() {
    let mut coordinator = Coordinator::default();
    let (a, mut rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);

    let id_a = coordinator.publish(&a, "/x", ValueType::String, 5, &Properties::new());
    let id_b = coordinator.publish(&b, "/x", ValueType::String, 9, &Properties::new());
    assert_eq!(id_a, id_b);
    assert_eq!(coordinator.directory().len(), 1);

    let seen_a = announces(&drain(&mut rx_a));
    let seen_b = announces(&drain(&mut rx_b));
    assert_eq!(seen_a, vec![(1, "/x".to_string(), Some(5))]);
    assert_eq!(
        seen_b,
        vec![(1, "/x".to_string(), None), (1, "/x".to_string(), Some(9))]
    );

    // the topic survives until its last publisher leaves
    coordinator.unpublish(&a, 5);
    assert!(coordinator.directory().lookup("/x").is_some());
    coordinator.unpublish(&b, 9);
    assert!(coordinator.directory().lookup("/x").is_none());
}

#[test]
fn test_value_fans_out_to_matching_subscribers() {
    let mut coordinator = Coordinator::default();
    let (a, mut rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    let (_c, mut rx_c) = attach(&mut coordinator);
    coordinator.subscribe(&a, 1, vec!["/test".to_string()], everything());
    coordinator.subscribe(&b, 1, vec!["/test".to_string()], everything());

    let id = coordinator
        .publish(&a, "/test/counter", ValueType::Double, 1, &Properties::new())
        .unwrap();
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_c);

    assert!(coordinator.set_value(&a, i64::from(id), 1_000_000, Value::Double(3.14)));

    assert_eq!(
        drain(&mut rx_b),
        vec![Outgoing::Value {
            id,
            timestamp: 1_000_000,
            value: Value::Double(3.14),
            seq: 1
        }]
    );
    // no echo to the sender, nothing for the unsubscribed session
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_c).is_empty());
}

#[test]
fn test_new_session_gets_announce_then_value() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    coordinator.publish(&a, "/first", ValueType::Int, 1, &Properties::new());
    coordinator.publish(&a, "/second", ValueType::Int, 2, &Properties::new());
    coordinator.set_value(&a, 2, 10, Value::Int(7));

    let (_late, mut rx_late) = attach(&mut coordinator);
    let received = drain(&mut rx_late);
    assert_eq!(received.len(), 3);
    assert!(matches!(&received[0], Outgoing::Announce { id: 1, .. }));
    assert!(matches!(&received[1], Outgoing::Announce { id: 2, .. }));
    assert!(matches!(&received[2], Outgoing::Value { id: 2, value: Value::Int(7), .. }));
}

#[test]
fn test_unknown_id_and_type_mismatch_are_dropped() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    coordinator.subscribe(&b, 1, vec!["".to_string()], everything());
    coordinator.publish(&a, "/d", ValueType::Double, 1, &Properties::new());
    drain(&mut rx_b);

    assert!(!coordinator.set_value(&a, 99, 1, Value::Double(1.0)));
    assert!(!coordinator.set_value(&a, -5, 1, Value::Double(1.0)));
    assert!(!coordinator.set_value(&a, 1, 1, Value::String("nope".into())));

    assert!(drain(&mut rx_b).is_empty());
    assert_eq!(coordinator.directory().len(), 1);
    assert!(coordinator.directory().lookup("/d").unwrap().value.is_none());
}

#[test]
fn test_detach_removes_exclusive_topics() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    coordinator.publish(&a, "/t", ValueType::Boolean, 1, &Properties::new());
    coordinator.subscribe(&a, 4, vec!["/t".to_string()], SubscribeOptions::default());
    drain(&mut rx_b);

    assert!(coordinator.detach(&a));
    assert!(!coordinator.detach(&a));

    assert!(coordinator.directory().lookup("/t").is_none());
    assert!(coordinator.subscriptions().is_empty());
    let received = drain(&mut rx_b);
    let unannounces: Vec<_> = received
        .iter()
        .filter(|m| matches!(m, Outgoing::Unannounce { name, .. } if name == "/t"))
        .collect();
    assert_eq!(unannounces.len(), 1);
    assert!(coordinator.session(&b).is_some());
}

#[test]
fn test_retained_topic_outlives_publisher() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    coordinator.publish(&a, "/keep", ValueType::Int, 1, &props(json!({"retained": true})));
    coordinator.detach(&a);
    assert!(coordinator.directory().lookup("/keep").is_some());
    drain(&mut rx_b);

    coordinator.set_properties(&b, "/keep", &props(json!({"retained": null})));
    assert!(coordinator.directory().lookup("/keep").is_none());
    let received = drain(&mut rx_b);
    assert!(matches!(&received[0], Outgoing::Properties { ack: true, .. }));
    assert!(matches!(&received[1], Outgoing::Unannounce { .. }));
}

#[test]
fn test_set_properties_acks_only_issuer() {
    let mut coordinator = Coordinator::default();
    let (a, mut rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    coordinator.publish(&a, "/p", ValueType::Int, 1, &Properties::new());
    drain(&mut rx_a);
    drain(&mut rx_b);

    coordinator.set_properties(&b, "/p", &props(json!({"persistent": true})));

    assert!(matches!(&drain(&mut rx_a)[..], [Outgoing::Properties { ack: false, .. }]));
    match &drain(&mut rx_b)[..] {
        [Outgoing::Properties { ack, update, flags, .. }] => {
            assert!(*ack);
            assert_eq!(update, &props(json!({"persistent": true})));
            assert!(flags.is_persistent());
        }
        other => panic!("unexpected {:?}", other),
    }

    // unknown topic is ignored
    coordinator.set_properties(&b, "/missing", &props(json!({"x": 1})));
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn test_subscribe_pushes_current_values() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    coordinator.publish(&a, "/v/one", ValueType::Int, 1, &Properties::new());
    coordinator.publish(&a, "/v/two", ValueType::Int, 2, &Properties::new());
    coordinator.publish(&a, "/other", ValueType::Int, 3, &Properties::new());
    coordinator.set_value(&a, 1, 5, Value::Int(1));
    coordinator.set_value(&a, 3, 5, Value::Int(3));
    drain(&mut rx_b);

    coordinator.subscribe(&b, 1, vec!["/v".to_string()], everything());
    let received = drain(&mut rx_b);
    // only topics with a value are pushed
    assert_eq!(received.len(), 1);
    assert!(matches!(&received[0], Outgoing::Value { id: 1, .. }));

    let quiet = SubscribeOptions {
        immediate: false,
        ..everything()
    };
    coordinator.subscribe(&b, 2, vec!["/other".to_string()], quiet);
    assert!(drain(&mut rx_b).is_empty());

    coordinator.subscribe(&b, 3, Vec::new(), everything());
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn test_slow_session_is_evicted() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (slow, _rx_slow) = attach_with_capacity(&mut coordinator, 2);
    let (fast, mut rx_fast) = attach(&mut coordinator);

    for i in 0..4 {
        coordinator.publish(&a, &format!("/t{}", i), ValueType::Int, i, &Properties::new());
    }

    assert!(coordinator.session(&slow).is_none());
    assert!(coordinator.session(&fast).is_some());
    assert_eq!(announces(&drain(&mut rx_fast)).len(), 4);
}

#[test]
fn test_closed_receiver_is_evicted() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (gone, rx_gone) = attach(&mut coordinator);
    drop(rx_gone);

    coordinator.publish(&a, "/t", ValueType::Int, 1, &Properties::new());
    assert!(coordinator.session(&gone).is_none());
}

#[test]
fn test_nt3_handshake_holds_broadcasts() {
    let mut coordinator = Coordinator::new("unit-server");
    let (a, _rx_a) = attach(&mut coordinator);
    coordinator.publish(&a, "/pre", ValueType::Double, 1, &Properties::new());

    let (tx, mut rx) = mpsc::channel(64);
    let nt3 = coordinator.begin_nt3_handshake(Session::new(Generation::Nt3, None, tx));
    assert_eq!(
        coordinator.session(&nt3).unwrap().state(),
        SessionState::ProtocolNegotiated
    );

    let hello = drain(&mut rx);
    assert_eq!(hello.len(), 3);
    assert_eq!(
        hello[0],
        Outgoing::Nt3(Nt3Message::ServerHello {
            flags: 0,
            identity: "unit-server".to_string()
        })
    );
    assert!(matches!(&hello[1], Outgoing::Announce { name, .. } if name == "/pre"));
    assert_eq!(hello[2], Outgoing::Nt3(Nt3Message::ServerHelloComplete));

    coordinator.publish(&a, "/during", ValueType::Double, 2, &Properties::new());
    assert!(drain(&mut rx).is_empty());

    coordinator.complete_nt3_handshake(&nt3);
    assert_eq!(announces(&drain(&mut rx)), vec![(2, "/during".to_string(), None)]);

    // NT3 sessions see every value
    coordinator.set_value(&a, 2, 9, Value::Double(1.5));
    assert!(matches!(&drain(&mut rx)[..], [Outgoing::Value { id: 2, .. }]));
}

#[test]
fn test_nt3_entry_operations() {
    let mut coordinator = Coordinator::default();
    let (tx, _rx) = mpsc::channel(64);
    let nt3 = coordinator.begin_nt3_handshake(Session::new(Generation::Nt3, None, tx));
    coordinator.complete_nt3_handshake(&nt3);
    let (_b, mut rx_b) = attach(&mut coordinator);

    let id = coordinator
        .assign_entry(&nt3, "/legacy", TopicFlags::PERSISTENT, Value::Boolean(true), 0)
        .unwrap();
    let topic = coordinator.directory().lookup_by_id(id).unwrap();
    assert!(topic.is_persistent());
    assert_eq!(topic.value.as_ref().unwrap().value, Value::Boolean(true));

    coordinator.assign_entry(&nt3, "/scratch", TopicFlags::NONE, Value::Int(1), 1);
    coordinator.clear_entries(&nt3);
    assert!(coordinator.directory().lookup("/scratch").is_none());
    assert!(coordinator.directory().lookup("/legacy").is_some());

    coordinator.delete_entry(&nt3, id);
    assert!(coordinator.directory().is_empty());
    assert!(drain(&mut rx_b)
        .iter()
        .any(|m| matches!(m, Outgoing::Unannounce { name, .. } if name == "/legacy")));
}

#[test]
fn test_nt3_assignment_announces_carried_value() {
    let mut coordinator = Coordinator::default();
    let (tx, mut rx_nt3) = mpsc::channel(64);
    let nt3 = coordinator.begin_nt3_handshake(Session::new(Generation::Nt3, None, tx));
    coordinator.complete_nt3_handshake(&nt3);
    drain(&mut rx_nt3);
    let (b, mut rx_b) = attach(&mut coordinator);
    coordinator.subscribe(&b, 1, vec!["/x".to_string()], SubscribeOptions::default());

    coordinator.assign_entry(&nt3, "/x", TopicFlags::NONE, Value::Double(5.0), 0);

    match &drain(&mut rx_nt3)[..] {
        [Outgoing::Announce {
            initial, pubuid, ..
        }] => {
            assert_eq!(*initial, Value::Double(5.0));
            assert_eq!(*pubuid, Some(0));
        }
        other => panic!("unexpected {:?}", other),
    }
    let to_b = drain(&mut rx_b);
    assert_eq!(announces(&to_b), vec![(1, "/x".to_string(), None)]);
    assert!(matches!(
        &to_b[1..],
        [Outgoing::Value { id: 1, value: Value::Double(v), .. }] if *v == 5.0
    ));
}

#[test]
fn test_publish_with_conflicting_type_is_refused() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (b, mut rx_b) = attach(&mut coordinator);
    let (c, mut rx_c) = attach(&mut coordinator);
    coordinator.publish(&a, "/x", ValueType::Double, 1, &Properties::new());
    coordinator.subscribe(&b, 1, vec!["".to_string()], everything());
    drain(&mut rx_b);
    drain(&mut rx_c);

    assert_eq!(
        coordinator.publish(&c, "/x", ValueType::String, 1, &Properties::new()),
        None
    );
    assert!(drain(&mut rx_c).is_empty());
    assert_eq!(
        coordinator.directory().lookup("/x").unwrap().value_type,
        ValueType::Double
    );
    assert!(!coordinator.set_value(&c, 1, 5, Value::String("hi".into())));
    assert!(coordinator.set_value(&a, 1, 6, Value::Double(1.0)));

    match &drain(&mut rx_b)[..] {
        [Outgoing::Value { id: 1, value, .. }] => assert_eq!(*value, Value::Double(1.0)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unpublished_retained_topic_takes_new_type() {
    let mut coordinator = Coordinator::default();
    let (a, mut rx_a) = attach(&mut coordinator);
    coordinator.publish(&a, "/r", ValueType::Double, 1, &props(json!({"retained": true})));
    coordinator.unpublish(&a, 1);
    let (b, mut rx_b) = attach(&mut coordinator);
    drain(&mut rx_a);
    drain(&mut rx_b);

    assert_eq!(
        coordinator.publish(&b, "/r", ValueType::String, 4, &Properties::new()),
        Some(1)
    );
    for (rx, expected) in [(&mut rx_a, None), (&mut rx_b, Some(4))] {
        match &drain(rx)[..] {
            [Outgoing::Announce {
                id: 1,
                value_type,
                pubuid,
                ..
            }] => {
                assert_eq!(*value_type, ValueType::String);
                assert_eq!(*pubuid, expected);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_nt3_handshake_hold_is_bounded() {
    let mut coordinator = Coordinator::default();
    let (a, _rx_a) = attach(&mut coordinator);
    let (tx, _rx) = mpsc::channel(4);
    let nt3 = coordinator.begin_nt3_handshake(Session::new(Generation::Nt3, None, tx));

    for i in 0..4 {
        coordinator.publish(&a, &format!("/t{}", i), ValueType::Int, i, &Properties::new());
    }
    assert!(coordinator.session(&nt3).is_some());

    coordinator.publish(&a, "/t4", ValueType::Int, 4, &Properties::new());
    assert!(coordinator.session(&nt3).is_none());
}

#[test]
fn test_time_sync_replies_to_sender_only() {
    let mut coordinator = Coordinator::default();
    let (a, mut rx_a) = attach(&mut coordinator);
    let (_b, mut rx_b) = attach(&mut coordinator);

    coordinator.time_sync(&a, 1234);
    match &drain(&mut rx_a)[..] {
        [Outgoing::TimeSync {
            server_time,
            client_time,
        }] => {
            assert_eq!(*client_time, 1234);
            assert!(*server_time > 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn test_subprotocol_prefers_newest() {
    assert_eq!(
        select_subprotocol(&[SUBPROTOCOL_V40, SUBPROTOCOL_V41]),
        Some(SUBPROTOCOL_V41)
    );
    assert_eq!(select_subprotocol(&[SUBPROTOCOL_V40]), Some(SUBPROTOCOL_V40));
    assert_eq!(select_subprotocol(&["rtt.networktables.first.wpi.edu"]), None);
    let none: [String; 0] = [];
    assert_eq!(select_subprotocol(&none), None);
}
