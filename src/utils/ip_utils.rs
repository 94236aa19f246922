use crate::error::ConfigError;
use std::net::IpAddr;

/// IP utility functions for parsing user supplied addresses and ranges

/// Parse an address, naming where it came from on failure.
pub fn parse_address(value: &str, context: &str) -> Result<IpAddr, ConfigError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ConfigError::InvalidAddress {
            value: value.to_string(),
            context: context.to_string(),
        })
}

/// Inclusive address range, as written in `used_ips`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl AddressRange {
    pub fn single(address: IpAddr) -> Self {
        AddressRange {
            start: address,
            end: address,
        }
    }

    /// Whether `address` falls inside the range. Mixed families never match.
    pub fn contains(&self, address: &IpAddr) -> bool {
        match (self.start, self.end, address) {
            (IpAddr::V4(start), IpAddr::V4(end), IpAddr::V4(addr)) => {
                (start..=end).contains(addr)
            }
            (IpAddr::V6(start), IpAddr::V6(end), IpAddr::V6(addr)) => {
                (start..=end).contains(addr)
            }
            _ => false,
        }
    }
}

/// Parse a `used_ips` entry: either `"a.b.c.d"` or `"start,end"`.
///
/// With more than two comma separated values the first and last bound the
/// range. Reversed bounds are normalised.
pub fn parse_used_ip_entry(entry: &str) -> Result<AddressRange, ConfigError> {
    let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
    let context = "used_ips";
    let start = parse_address(parts[0], context)?;
    if parts.len() < 2 {
        return Ok(AddressRange::single(start));
    }

    let end = parse_address(parts[parts.len() - 1], context)?;
    if start.is_ipv4() != end.is_ipv4() {
        return Err(ConfigError::InvalidAddress {
            value: entry.to_string(),
            context: context.to_string(),
        });
    }
    if end < start {
        Ok(AddressRange { start: end, end: start })
    } else {
        Ok(AddressRange { start, end })
    }
}
