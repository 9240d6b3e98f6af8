//! Wire-format tests for the job envelope.

use relayq::envelope::{ErrorRecord, HandlerError, JobEnvelope, Meta};
use serde_json::json;

fn envelope() -> JobEnvelope {
    JobEnvelope {
        meta: Meta {
            id: 42,
            queue: "emails".to_string(),
            job_name: "send".to_string(),
            datetime: "2026-08-07T12:00:00".to_string(),
        },
        job: json!({ "to": "a@b.com" }),
        context: None,
    }
}

#[test]
fn wire_format_uses_the_legacy_field_names() {
    let raw = envelope().encode().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(value["meta"]["id"], 42);
    assert_eq!(value["meta"]["jobName"], "send");
    assert!(value["meta"].get("job_name").is_none());
    // context is absent, not null, until processing completes
    assert!(value.get("context").is_none());
}

#[test]
fn context_appears_once_set() {
    let mut env = envelope();
    env.context = Some(json!({ "sent": true }));
    let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
    assert_eq!(value["context"]["sent"], true);
}

#[test]
fn decode_rejects_garbage() {
    assert!(JobEnvelope::decode("not json").is_err());
    assert!(JobEnvelope::decode("{\"job\": {}}").is_err(), "meta is required");
}

#[test]
fn error_record_serializes_type_field_and_captures_location() {
    let record = ErrorRecord::from(HandlerError::new("boom").kind("timeout").code(-2));
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["type"], "timeout");
    assert_eq!(value["code"], -2);
    assert_eq!(value["message"], "boom");
    assert!(
        value["location"]
            .as_str()
            .unwrap()
            .contains("envelope_test.rs")
    );
}
