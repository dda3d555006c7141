//! Contract tests for the frozen envelope JSON shapes.

use ss_protocol::{RequestEnvelope, RequestParseError, ResponseEnvelope, status};

#[test]
fn request_round_trip_is_lossless() {
    let env = RequestEnvelope {
        request_id: "ab12cd34".to_owned(),
        reply_to: "AGENT_REPLY_deadbeef".to_owned(),
        intent: r#"{"task":"summarize"}"#.to_owned(),
        timestamp: 1_700_000_000.25,
    };
    let json = serde_json::to_string(&env).unwrap();
    let back: RequestEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back, env);
}

#[test]
fn request_parse_accepts_wire_example() {
    let payload = r#"{"request_id":"0f","reply_to":"AGENT_REPLY_01","intent":"hello","timestamp":123.5}"#;
    let env = RequestEnvelope::parse(payload).unwrap();
    assert_eq!(env.request_id, "0f");
    assert_eq!(env.reply_to, "AGENT_REPLY_01");
    assert_eq!(env.intent, "hello");
    assert_eq!(env.timestamp, 123.5);
}

#[test]
fn request_parse_rejects_non_json() {
    assert_eq!(
        RequestEnvelope::parse("not json at all"),
        Err(RequestParseError::NotJson)
    );
    // A JSON scalar is not an envelope either.
    assert_eq!(RequestEnvelope::parse("42"), Err(RequestParseError::NotJson));
}

#[test]
fn request_parse_reports_missing_field_with_surviving_reply_to() {
    let payload = r#"{"reply_to":"AGENT_REPLY_02","intent":"x"}"#;
    match RequestEnvelope::parse(payload) {
        Err(RequestParseError::MissingField {
            field,
            request_id,
            reply_to,
        }) => {
            assert_eq!(field, "request_id");
            assert_eq!(request_id, None);
            assert_eq!(reply_to.as_deref(), Some("AGENT_REPLY_02"));
        }
        other => panic!("expected MissingField, got {:?}", other),
    }
}

#[test]
fn request_parse_missing_timestamp_defaults_to_zero() {
    let payload = r#"{"request_id":"1","reply_to":"r","intent":"i"}"#;
    let env = RequestEnvelope::parse(payload).unwrap();
    assert_eq!(env.timestamp, 0.0);
}

#[test]
fn response_round_trip_is_lossless() {
    let env = ResponseEnvelope::success("ab12".to_owned(), "result body".to_owned());
    let json = serde_json::to_string(&env).unwrap();
    let back: ResponseEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back, env);
    assert!(back.is_success());
}

#[test]
fn response_unknown_status_is_not_success() {
    let payload = r#"{"request_id":"1","status":"partial","content":"x","error":"","timestamp":0}"#;
    let env: ResponseEnvelope = serde_json::from_str(payload).unwrap();
    assert!(!env.is_success());
}

#[test]
fn response_missing_fields_deserialize_with_defaults() {
    let payload = r#"{"request_id":"1"}"#;
    let env: ResponseEnvelope = serde_json::from_str(payload).unwrap();
    assert_eq!(env.status, "");
    assert_eq!(env.content, "");
    assert_eq!(env.error, "");
    assert!(!env.is_success());
}

#[test]
fn failure_constructor_sets_error_status() {
    let env = ResponseEnvelope::failure("1".to_owned(), "boom".to_owned());
    assert_eq!(env.status, status::ERROR);
    assert_eq!(env.content, "");
    assert_eq!(env.error, "boom");
}
