// Verify wire format matches what EventSource clients expect.
// These tests ensure stream and JSON compatibility is never broken.

use herald_protocol::{ConnectionInfo, ConnectionNotice, Event, Target};
use std::collections::BTreeMap;

#[test]
fn event_block_is_blank_line_terminated() {
    let block = Event::new("payload").with_id("evt-1").encode();
    assert!(block.ends_with("\n\n"));
    assert_eq!(block.matches("\n\n").count(), 1);
}

#[test]
fn event_json_uses_short_field_names() {
    let ev = Event::new("d").with_id("1").with_type("update").with_retry(500);
    let json = serde_json::to_string(&ev).unwrap();

    assert!(json.contains(r#""id":"1""#));
    assert!(json.contains(r#""event":"update""#));
    assert!(json.contains(r#""retry":500"#));
    assert!(json.contains(r#""data":"d""#));
}

#[test]
fn event_json_omits_absent_fields() {
    let json = serde_json::to_string(&Event::new("only data")).unwrap();
    assert_eq!(json, r#"{"data":"only data"}"#);
}

#[test]
fn event_parses_from_producer_json() {
    let json = r#"{"id":"42","event":"alert","data":"line1\nline2"}"#;
    let ev: Event = serde_json::from_str(json).unwrap();
    assert_eq!(ev.cursor(), Some("42"));
    assert_eq!(ev.encode(), "id: 42\nevent: alert\ndata: line1\ndata: line2\n\n");
}

#[test]
fn notice_serializes_camel_case() {
    let notice = ConnectionNotice {
        connection_id: "c-1".into(),
        client_address: "10.0.0.4".into(),
        user_agent: "curl/8".into(),
        headers: BTreeMap::from([("accept".to_string(), "text/event-stream".to_string())]),
        query_parameters: BTreeMap::from([("topic".to_string(), "orders".to_string())]),
        topic: "orders".into(),
        last_seen_event_id: String::new(),
        timestamp: "2026-01-01T00:00:00+00:00".into(),
    };
    let json = serde_json::to_string(&notice).unwrap();

    assert!(json.contains(r#""connectionId":"c-1""#));
    assert!(json.contains(r#""clientAddress":"10.0.0.4""#));
    assert!(json.contains(r#""queryParameters":{"topic":"orders"}"#));
    assert!(json.contains(r#""lastSeenEventId":"""#));
}

#[test]
fn connection_info_uses_camel_case() {
    let info = ConnectionInfo {
        id: "c".into(),
        client_address: "10.0.0.4".into(),
        user_agent: String::new(),
        topic: "A".into(),
        last_event_id: String::new(),
        connected_at: String::new(),
        is_active: true,
    };
    let json = serde_json::to_string(&info).unwrap();
    assert!(json.contains(r#""clientAddress":"10.0.0.4""#));
    assert!(json.contains(r#""lastEventId":"""#));
    assert!(json.contains(r#""isActive":true"#));
}

#[test]
fn target_round_trips_through_json_string() {
    let t: Target = serde_json::from_str(r#""topic:orders""#).unwrap();
    assert_eq!(t, Target::Topic("orders".into()));
    assert_eq!(serde_json::to_string(&t).unwrap(), r#""topic:orders""#);
    assert!(serde_json::from_str::<Target>(r#""bogus""#).is_err());
}
