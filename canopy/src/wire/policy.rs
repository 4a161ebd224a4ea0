use std::net::IpAddr;

use crate::error::ConfigError;

/// One CIDR range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRange(text.to_string());
        let (address, prefix) = match text.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (text, None),
        };
        let network: IpAddr = address.trim().parse().map_err(|_| invalid())?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(prefix) => prefix.trim().parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }

    fn contains(&self, address: IpAddr) -> bool {
        match (self.network, address.to_canonical()) {
            (IpAddr::V4(network), IpAddr::V4(address)) => {
                prefix_matches(u32::from(network).into(), u32::from(address).into(), 32, self.prefix)
            }
            (IpAddr::V6(network), IpAddr::V6(address)) => {
                prefix_matches(u128::from(network), u128::from(address), 128, self.prefix)
            }
            _ => false,
        }
    }
}

fn prefix_matches(network: u128, address: u128, bits: u32, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = bits - u32::from(prefix);
    (network >> shift) == (address >> shift)
}

/// # Network Policy
///
/// The set of address ranges a server accepts peers from.
///
/// An empty policy accepts loopback peers only.
///
/// ```rust
/// use canopy::wire::NetworkPolicy;
///
/// let policy = NetworkPolicy::parse(&["10.0.0.0/8".to_string()]).unwrap();
/// assert!(policy.allows("10.1.2.3".parse().unwrap()));
/// assert!(!policy.allows("192.168.1.1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    ranges: Vec<IpRange>,
}

impl NetworkPolicy {
    /// Parses CIDR ranges such as `10.0.0.0/8` or `::1/128`. A bare address
    /// is a single-host range.
    pub fn parse(ranges: &[String]) -> Result<Self, ConfigError> {
        let ranges = ranges
            .iter()
            .map(|range| IpRange::parse(range))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }

    pub fn allows(&self, address: IpAddr) -> bool {
        if self.ranges.is_empty() {
            return address.to_canonical().is_loopback();
        }
        self.ranges.iter().any(|range| range.contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ranges: &[&str]) -> NetworkPolicy {
        let ranges: Vec<String> = ranges.iter().map(|range| range.to_string()).collect();
        NetworkPolicy::parse(&ranges).unwrap()
    }

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_empty_policy_is_loopback_only() {
        let policy = NetworkPolicy::default();
        assert!(policy.allows(ip("127.0.0.1")));
        assert!(policy.allows(ip("::1")));
        assert!(policy.allows(ip("::ffff:127.0.0.1")));
        assert!(!policy.allows(ip("10.0.0.1")));
    }

    #[test]
    fn test_ranges() {
        let policy = policy(&["10.0.0.0/8", "192.168.1.0/24", "fd00::/8"]);
        assert!(policy.allows(ip("10.255.0.1")));
        assert!(policy.allows(ip("192.168.1.77")));
        assert!(!policy.allows(ip("192.168.2.1")));
        assert!(policy.allows(ip("fd12::1")));
        assert!(policy.allows(ip("::ffff:10.0.0.1")));
        assert!(!policy.allows(ip("127.0.0.1")));
    }

    #[test]
    fn test_single_host_and_any() {
        assert!(policy(&["172.16.0.5"]).allows(ip("172.16.0.5")));
        assert!(!policy(&["172.16.0.5"]).allows(ip("172.16.0.6")));
        assert!(policy(&["0.0.0.0/0"]).allows(ip("8.8.8.8")));
    }

    #[test]
    fn test_invalid_ranges() {
        for range in ["10.0.0.0/33", "not-an-ip/8", "::1/129", "10.0.0.0/x"] {
            assert_eq!(
                NetworkPolicy::parse(&[range.to_string()]),
                Err(ConfigError::InvalidRange(range.to_string()))
            );
        }
    }
}
