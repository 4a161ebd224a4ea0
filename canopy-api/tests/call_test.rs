use canopy_api::{Call, CallError, CallType, ControlAddress, Value};

fn address(text: &str) -> ControlAddress {
    text.parse().unwrap()
}

#[test]
fn test_invoke_matches_own_id() {
    let call = Call::invoke(address("/peer/osc1!frequency"), address("/local!ctl"), 42, vec![Value::Number(220.0)]);
    assert_eq!(call.kind(), CallType::Invoke);
    assert_eq!(call.match_id(), call.id());
    assert!(call.requires_reply());
    assert!(call.is_request());
    assert_eq!(call.args(), &[Value::Number(220.0)]);
}

#[test]
fn test_reply_swaps_addresses_and_keeps_time() {
    let call = Call::invoke(address("/peer/osc1!frequency"), address("/local!ctl"), 42, vec![]);
    let reply = call.reply(vec![Value::Int(1)]).unwrap();
    assert_eq!(reply.kind(), CallType::Return);
    assert_eq!(reply.to(), call.from());
    assert_eq!(reply.from(), call.to());
    assert_eq!(reply.match_id(), call.id());
    assert_ne!(reply.id(), call.id());
    assert_eq!(reply.time_code(), 42);
}

#[test]
fn test_quiet_call_can_still_error() {
    let call = Call::invoke_quiet(address("/a!b"), address("/c!d"), 0, vec![]);
    assert!(!call.requires_reply());
    let error = call.error_with("terminated", "root terminated").unwrap();
    assert_eq!(error.kind(), CallType::Error);
    assert_eq!(error.args()[0].error_kind(), Some("terminated"));
}

#[test]
fn test_cannot_answer_an_answer() {
    let call = Call::invoke(address("/a!b"), address("/c!d"), 0, vec![]);
    let reply = call.reply(vec![]).unwrap();
    let result = reply.error(vec![]);
    assert_eq!(
        result.unwrap_err(),
        CallError::NotRequest {
            id: reply.id(),
            kind: CallType::Return
        }
    );
}

#[test]
fn test_ids_are_unique_and_increasing() {
    let first = Call::invoke(address("/a!b"), address("/c!d"), 0, vec![]);
    let second = Call::invoke(address("/a!b"), address("/c!d"), 0, vec![]);
    assert!(second.id() > first.id());
}
