//! Address rewriting at link boundaries.
//!
//! Both sides of a link own system roots with the same ids (`_sys`,
//! `_server`, ...). A system address entering from the peer is marked as
//! remote (`/_sys` becomes `/_remote_sys`) so it cannot collide with the
//! local root of the same name; the marker is stripped again when the
//! address leaves towards the peer. Other addresses pass unchanged.

use canopy_api::{AddressError, ComponentAddress, ControlAddress};

/// Prefix added to system root ids entering from a peer.
pub const REMOTE_MARKER: &str = "_remote";

/// Root id as seen locally for a root id received from the peer.
pub fn ingress_root_id(root_id: &str) -> Option<String> {
    root_id
        .starts_with('_')
        .then(|| format!("{REMOTE_MARKER}{root_id}"))
}

/// Root id as the peer knows it for a locally marked root id.
pub fn egress_root_id(root_id: &str) -> Option<&str> {
    root_id
        .strip_prefix(REMOTE_MARKER)
        .filter(|rest| rest.starts_with('_'))
}

pub fn ingress_component(address: &ComponentAddress) -> Result<ComponentAddress, AddressError> {
    match ingress_root_id(address.root_id()) {
        Some(root_id) => address.with_root_id(&root_id),
        None => Ok(address.clone()),
    }
}

pub fn ingress_control(address: &ControlAddress) -> Result<ControlAddress, AddressError> {
    match ingress_root_id(address.root_id()) {
        Some(root_id) => address.with_root_id(&root_id),
        None => Ok(address.clone()),
    }
}

pub fn egress_control(address: &ControlAddress) -> Result<ControlAddress, AddressError> {
    match egress_root_id(address.root_id()) {
        Some(root_id) => address.with_root_id(root_id),
        None => Ok(address.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(text: &str) -> ControlAddress {
        text.parse().unwrap()
    }

    #[test]
    fn test_system_addresses_marked() {
        let marked = ingress_control(&control("/_sys/manager!add-root")).unwrap();
        assert_eq!(marked.as_str(), "/_remote_sys/manager!add-root");

        let stripped = egress_control(&marked).unwrap();
        assert_eq!(stripped.as_str(), "/_sys/manager!add-root");
    }

    #[test]
    fn test_user_addresses_unchanged() {
        let address = control("/synth/osc1!frequency");
        assert_eq!(ingress_control(&address).unwrap(), address);
        assert_eq!(egress_control(&address).unwrap(), address);
    }

    #[test]
    fn test_nested_links_stack_markers() {
        let once = ingress_control(&control("/_sys!add-root")).unwrap();
        let twice = ingress_control(&once).unwrap();
        assert_eq!(twice.as_str(), "/_remote_remote_sys!add-root");
        assert_eq!(egress_control(&twice).unwrap(), once);
    }

    #[test]
    fn test_component_ingress() {
        let address: ComponentAddress = "/_server/log".parse().unwrap();
        assert_eq!(ingress_component(&address).unwrap().as_str(), "/_remote_server/log");
    }
}
