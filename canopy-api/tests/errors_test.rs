// Display output of the model error types

use canopy_api::{AddressError, Call, CallError, CallType, ControlAddress, ValueError};

#[test]
fn test_address_error_display() {
    assert_eq!(AddressError::Empty.to_string(), "Address is empty");
    assert_eq!(AddressError::NotAbsolute("a".to_string()).to_string(), "Address must start with '/': a");
    assert_eq!(AddressError::InvalidRootId("1a".to_string()).to_string(), "Invalid root id: 1a");
    assert_eq!(AddressError::MissingControl("/a".to_string()).to_string(), "Control address is missing its control: /a");
}

#[test]
fn test_call_error_display() {
    let to: ControlAddress = "/a!b".parse().unwrap();
    let call = Call::invoke(to.clone(), to, 0, vec![]);
    let reply = call.reply(vec![]).unwrap();
    let err = CallError::NotRequest { id: reply.id(), kind: CallType::Return };
    assert_eq!(
        err.to_string(),
        format!("Call {} of type Return is not a request and cannot be answered", reply.id())
    );
}

#[test]
fn test_value_error_display() {
    assert_eq!(ValueError::MissingArgument(2).to_string(), "Missing argument at index 2");
    assert_eq!(
        ValueError::UnexpectedType { expected: "text", found: "int" }.to_string(),
        "Expected text but found int"
    );
}
