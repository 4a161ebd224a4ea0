use canopy_api::address::{is_valid_component_id, is_valid_root_id};
use canopy_api::{AddressError, ComponentAddress, ControlAddress};
use proptest::prelude::*;

#[test]
fn test_parse_control_address() {
    let address: ControlAddress = "/peer/osc1!frequency".parse().unwrap();
    assert_eq!(address.root_id(), "peer");
    assert_eq!(address.control_id(), "frequency");
    assert_eq!(address.component().as_str(), "/peer/osc1");
    assert_eq!(address.to_string(), "/peer/osc1!frequency");
}

#[test]
fn test_root_control_address() {
    let address: ControlAddress = "/_sys!add-root".parse().unwrap();
    assert_eq!(address.root_id(), "_sys");
    assert!(address.is_system());
    assert_eq!(address.component().depth(), 1);
}

#[test]
fn test_rejects_invalid_addresses() {
    assert_eq!(ComponentAddress::parse(""), Err(AddressError::Empty));
    assert_eq!(
        ComponentAddress::parse("synth"),
        Err(AddressError::NotAbsolute("synth".to_string()))
    );
    assert_eq!(
        ComponentAddress::parse("/synth//osc"),
        Err(AddressError::EmptySegment("/synth//osc".to_string()))
    );
    assert_eq!(
        ComponentAddress::parse("/synth/"),
        Err(AddressError::EmptySegment("/synth/".to_string()))
    );
    assert_eq!(
        ComponentAddress::parse("/1synth"),
        Err(AddressError::InvalidRootId("1synth".to_string()))
    );
    assert_eq!(
        ComponentAddress::parse("/synth/_osc"),
        Err(AddressError::InvalidComponentId("_osc".to_string()))
    );
    assert_eq!(
        ControlAddress::parse("/synth/osc"),
        Err(AddressError::MissingControl("/synth/osc".to_string()))
    );
    assert_eq!(
        ControlAddress::parse("/synth/osc!"),
        Err(AddressError::InvalidControlId(String::new()))
    );
    assert_eq!(
        ControlAddress::parse("/synth/osc!a!b"),
        Err(AddressError::InvalidControlId("a!b".to_string()))
    );
    assert!(matches!(
        ComponentAddress::parse("/synth!gain"),
        Err(AddressError::UnexpectedControl(_))
    ));
}

#[test]
fn test_ordering_follows_string_form() {
    let mut addresses: Vec<ControlAddress> = ["/a/c!x", "/a-b!x", "/a!y", "/a!x"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    addresses.sort();
    let sorted: Vec<&str> = addresses.iter().map(|a| a.as_str()).collect();
    let mut expected = vec!["/a/c!x", "/a-b!x", "/a!y", "/a!x"];
    expected.sort();
    assert_eq!(sorted, expected);
}

#[test]
fn test_serde_uses_text_form() {
    let address: ControlAddress = "/synth!gain".parse().unwrap();
    let json = serde_json::to_string(&address).unwrap();
    assert_eq!(json, "\"/synth!gain\"");
    let back: ControlAddress = serde_json::from_str(&json).unwrap();
    assert_eq!(back, address);
    assert!(serde_json::from_str::<ControlAddress>("\"synth!gain\"").is_err());
}

fn root_id() -> impl Strategy<Value = String> {
    "_?[a-zA-Z][a-zA-Z0-9_-]{0,8}"
}

fn child_id() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,8}"
}

proptest! {
    #[test]
    fn prop_control_address_round_trips(
        root in root_id(),
        children in prop::collection::vec(child_id(), 0..4),
        control in child_id(),
    ) {
        let mut component = ComponentAddress::root(&root).unwrap();
        for child in &children {
            component = component.child(child).unwrap();
        }
        let address = component.control(&control).unwrap();
        let parsed = ControlAddress::parse(&address.to_string()).unwrap();
        prop_assert_eq!(&parsed, &address);
        prop_assert_eq!(parsed.component(), component);
    }

    #[test]
    fn prop_invalid_segment_fails_deterministically(
        root in root_id(),
        bad in "[0-9 .#][a-z]{0,4}",
    ) {
        prop_assert!(!is_valid_component_id(&bad));
        let input = format!("/{root}/{bad}");
        let first = ComponentAddress::parse(&input);
        let second = ComponentAddress::parse(&input);
        prop_assert!(first.is_err());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_valid_root_ids_accepted(root in root_id()) {
        prop_assert!(is_valid_root_id(&root));
    }
}
