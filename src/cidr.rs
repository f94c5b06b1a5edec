//! IP range parsing and containment for note access policies.
//!
//! A range list is a comma-separated set of CIDR blocks (`10.0.0.0/8,
//! 2001:db8::/32`). Bare addresses are accepted as single-host ranges.

use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid IP range: {0}")]
    InvalidRange(String),
}

/// Parse a comma-separated list of ranges. Empty entries are skipped.
pub fn parse_ranges(ranges: &str) -> Result<Vec<IpNet>, RangeError> {
    ranges
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_range)
        .collect()
}

fn parse_range(entry: &str) -> Result<IpNet, RangeError> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Ok(net);
    }
    entry
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| RangeError::InvalidRange(entry.to_string()))
}

/// Validate a range list without keeping the result.
pub fn check_valid_ranges(ranges: &str) -> Result<(), RangeError> {
    parse_ranges(ranges).map(|_| ())
}

/// Whether `ip` falls inside any of `ranges`. An empty list allows everyone.
pub fn within_ranges(ip: &str, ranges: &str) -> Result<bool, RangeError> {
    let nets = parse_ranges(ranges)?;
    if nets.is_empty() {
        return Ok(true);
    }

    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| RangeError::InvalidAddress(ip.to_string()))?;

    Ok(contains(&nets, &addr))
}

pub fn contains(nets: &[IpNet], addr: &IpAddr) -> bool {
    nets.iter().any(|net| net.contains(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_allows_everyone() {
        assert!(within_ranges("203.0.113.9", "").unwrap());
        assert!(within_ranges("203.0.113.9", " , ").unwrap());
    }

    #[test]
    fn test_containment() {
        let ranges = "1.1.1.0/24, 2.2.0.0/16";
        assert!(within_ranges("1.1.1.200", ranges).unwrap());
        assert!(within_ranges("2.2.99.1", ranges).unwrap());
        assert!(!within_ranges("3.3.3.3", ranges).unwrap());
    }

    #[test]
    fn test_ipv6_and_bare_addresses() {
        assert!(within_ranges("2001:db8::1", "2001:db8::/32").unwrap());
        assert!(within_ranges("192.0.2.7", "192.0.2.7").unwrap());
        assert!(!within_ranges("192.0.2.8", "192.0.2.7").unwrap());
    }

    #[test]
    fn test_invalid_range_rejected() {
        assert_eq!(
            check_valid_ranges("1.1.1.0/24, nonsense"),
            Err(RangeError::InvalidRange("nonsense".to_string()))
        );
        assert!(check_valid_ranges("10.0.0.0/33").is_err());
        assert!(check_valid_ranges("").is_ok());
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(matches!(
            within_ranges("unknown", "10.0.0.0/8"),
            Err(RangeError::InvalidAddress(_))
        ));
    }
}
