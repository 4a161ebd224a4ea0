//! # Address Module
//!
//! ## Key Concepts
//! - ComponentAddress: a root id followed by an optional chain of child ids
//! - ControlAddress: a component address plus the name of a control on it
//! - Textual form: `/root/child/grandchild` and `/root/child!control`
//!
//! ## Design Principles
//! - Immutable: addresses are shared freely between threads and roots
//! - Canonical: the textual form is stored once, so equality, hashing and
//!   ordering all follow the string form exactly
//! - Strict: invalid input is rejected at construction, never repaired
//!
//! Root ids starting with `_` are reserved for system roots.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::AddressError;

/// Separator between address segments.
pub const SEGMENT_SEPARATOR: char = '/';

/// Separator between a component address and a control id.
pub const CONTROL_SEPARATOR: char = '!';

/// Prefix marking a root id as a system root.
pub const SYSTEM_ROOT_PREFIX: char = '_';

/// Returns true if `id` is a legal root id.
///
/// Root ids start with an ASCII letter or `_` and continue with ASCII
/// alphanumerics, `_` or `-`.
pub fn is_valid_root_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == SYSTEM_ROOT_PREFIX => {}
        _ => return false,
    }
    chars.all(is_id_char)
}

/// Returns true if `id` is a legal child component id.
pub fn is_valid_component_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(is_id_char)
}

/// Returns true if `id` is a legal control id.
pub fn is_valid_control_id(id: &str) -> bool {
    // Controls follow the component rules.
    is_valid_component_id(id)
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// # Component Address
///
/// Identifies a root (depth 1) or a component nested beneath it.
///
/// ## Examples
/// ```rust
/// use canopy_api::ComponentAddress;
///
/// let address: ComponentAddress = "/synth/osc1".parse().unwrap();
/// assert_eq!(address.root_id(), "synth");
/// assert_eq!(address.depth(), 2);
/// assert_eq!(address.to_string(), "/synth/osc1");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentAddress {
    /// Canonical textual form, always valid
    text: Arc<str>,
}

impl ComponentAddress {
    /// Parses and validates a component address.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if input.is_empty() {
            return Err(AddressError::Empty);
        }
        if input.contains(CONTROL_SEPARATOR) {
            return Err(AddressError::UnexpectedControl(input.to_string()));
        }
        let body = input
            .strip_prefix(SEGMENT_SEPARATOR)
            .ok_or_else(|| AddressError::NotAbsolute(input.to_string()))?;

        for (index, segment) in body.split(SEGMENT_SEPARATOR).enumerate() {
            if segment.is_empty() {
                return Err(AddressError::EmptySegment(input.to_string()));
            }
            if index == 0 {
                if !is_valid_root_id(segment) {
                    return Err(AddressError::InvalidRootId(segment.to_string()));
                }
            } else if !is_valid_component_id(segment) {
                return Err(AddressError::InvalidComponentId(segment.to_string()));
            }
        }

        Ok(Self { text: Arc::from(input) })
    }

    /// Creates the address of a root.
    pub fn root(id: &str) -> Result<Self, AddressError> {
        if !is_valid_root_id(id) {
            return Err(AddressError::InvalidRootId(id.to_string()));
        }
        Ok(Self {
            text: Arc::from(format!("{SEGMENT_SEPARATOR}{id}")),
        })
    }

    /// The id of the root this address belongs to.
    pub fn root_id(&self) -> &str {
        let body = &self.text[1..];
        match body.find(SEGMENT_SEPARATOR) {
            Some(end) => &body[..end],
            None => body,
        }
    }

    /// Iterates over the segments, root id first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.text[1..].split(SEGMENT_SEPARATOR)
    }

    /// Number of segments; a root address has depth 1.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The last segment of the address.
    pub fn id(&self) -> &str {
        match self.text.rfind(SEGMENT_SEPARATOR) {
            Some(start) => &self.text[start + 1..],
            None => &self.text,
        }
    }

    /// The parent component, or `None` for a root address.
    pub fn parent(&self) -> Option<ComponentAddress> {
        let start = self.text.rfind(SEGMENT_SEPARATOR)?;
        if start == 0 {
            return None;
        }
        Some(Self {
            text: Arc::from(&self.text[..start]),
        })
    }

    /// Derives the address of a child component.
    pub fn child(&self, id: &str) -> Result<ComponentAddress, AddressError> {
        if !is_valid_component_id(id) {
            return Err(AddressError::InvalidComponentId(id.to_string()));
        }
        Ok(Self {
            text: Arc::from(format!("{}{SEGMENT_SEPARATOR}{id}", self.text)),
        })
    }

    /// Derives the address of a control on this component.
    pub fn control(&self, id: &str) -> Result<ControlAddress, AddressError> {
        ControlAddress::new(self.clone(), id)
    }

    /// Replaces the root id, keeping the rest of the path.
    pub fn with_root_id(&self, root_id: &str) -> Result<ComponentAddress, AddressError> {
        if !is_valid_root_id(root_id) {
            return Err(AddressError::InvalidRootId(root_id.to_string()));
        }
        let rest = &self.text[1 + self.root_id().len()..];
        Ok(Self {
            text: Arc::from(format!("{SEGMENT_SEPARATOR}{root_id}{rest}")),
        })
    }

    /// True if this address is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &ComponentAddress) -> bool {
        other.text.starts_with(&*self.text)
            && matches!(
                other.text[self.text.len()..].chars().next(),
                None | Some(SEGMENT_SEPARATOR)
            )
    }

    /// True if the root id marks a system root.
    pub fn is_system(&self) -> bool {
        self.root_id().starts_with(SYSTEM_ROOT_PREFIX)
    }

    /// The canonical textual form.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for ComponentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for ComponentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentAddress({})", self.text)
    }
}

impl FromStr for ComponentAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// # Control Address
///
/// Identifies a named control on a component: the endpoint a call is
/// addressed to or replied from.
///
/// ## Examples
/// ```rust
/// use canopy_api::ControlAddress;
///
/// let address: ControlAddress = "/synth/osc1!frequency".parse().unwrap();
/// assert_eq!(address.control_id(), "frequency");
/// assert_eq!(address.component().to_string(), "/synth/osc1");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlAddress {
    /// Canonical textual form, always valid
    text: Arc<str>,
    /// Byte offset of the control separator in `text`
    split: usize,
}

impl ControlAddress {
    /// Creates a control address from a component and a control id.
    pub fn new(component: ComponentAddress, control: &str) -> Result<Self, AddressError> {
        if !is_valid_control_id(control) {
            return Err(AddressError::InvalidControlId(control.to_string()));
        }
        let split = component.text.len();
        Ok(Self {
            text: Arc::from(format!("{}{CONTROL_SEPARATOR}{control}", component.text)),
            split,
        })
    }

    /// Parses and validates a control address.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if input.is_empty() {
            return Err(AddressError::Empty);
        }
        let split = input
            .find(CONTROL_SEPARATOR)
            .ok_or_else(|| AddressError::MissingControl(input.to_string()))?;
        let component = ComponentAddress::parse(&input[..split])?;
        Self::new(component, &input[split + 1..])
    }

    /// The component this control belongs to.
    pub fn component(&self) -> ComponentAddress {
        ComponentAddress {
            text: Arc::from(&self.text[..self.split]),
        }
    }

    /// The id of the root this address belongs to.
    pub fn root_id(&self) -> &str {
        let body = &self.text[1..self.split];
        match body.find(SEGMENT_SEPARATOR) {
            Some(end) => &body[..end],
            None => body,
        }
    }

    /// The control id.
    pub fn control_id(&self) -> &str {
        &self.text[self.split + 1..]
    }

    /// Replaces the root id, keeping the rest of the address.
    pub fn with_root_id(&self, root_id: &str) -> Result<ControlAddress, AddressError> {
        let component = self.component().with_root_id(root_id)?;
        Self::new(component, self.control_id())
    }

    /// True if the root id marks a system root.
    pub fn is_system(&self) -> bool {
        self.root_id().starts_with(SYSTEM_ROOT_PREFIX)
    }

    /// The canonical textual form.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlAddress({})", self.text)
    }
}

impl FromStr for ControlAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Addresses travel as their textual form.

impl Serialize for ComponentAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for ComponentAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ControlAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for ControlAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_child_derivation() {
        let root = ComponentAddress::root("synth").unwrap();
        let osc = root.child("osc1").unwrap();
        assert_eq!(osc.as_str(), "/synth/osc1");
        assert_eq!(osc.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
        assert_eq!(osc.id(), "osc1");
        assert_eq!(root.id(), "synth");
    }

    #[test]
    fn test_ancestry_respects_segment_boundaries() {
        let a: ComponentAddress = "/synth/osc".parse().unwrap();
        let b: ComponentAddress = "/synth/osc1".parse().unwrap();
        let c: ComponentAddress = "/synth/osc/env".parse().unwrap();
        assert!(!a.is_ancestor_of(&b));
        assert!(a.is_ancestor_of(&c));
        assert!(a.is_ancestor_of(&a));
    }

    #[test]
    fn test_with_root_id_keeps_tail() {
        let address: ControlAddress = "/_sys/log!write".parse().unwrap();
        let moved = address.with_root_id("_remote_sys").unwrap();
        assert_eq!(moved.as_str(), "/_remote_sys/log!write");
        assert_eq!(moved.control_id(), "write");
    }
}
