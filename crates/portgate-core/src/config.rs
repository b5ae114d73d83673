//! Forwarder map file: the line-oriented config consumed once at startup.
//!
//! Format:
//!
//! ```text
//! line 0: <label> <external IPv4 bind address>
//! line 1: <label> <internal IPv4 target address>
//! line 2: <label> <external IPv6 bind address>
//! line 3: <label> <internal IPv6 target address>
//! line 4..: <external port> <internal port>    (one mapping per line)
//! ```
//!
//! Validation happens entirely here: at least five lines, all four addresses
//! parse as literals of the right family, every port pair is an integer in
//! [1, 65535], external ports unique. The forwarder itself only ever sees the
//! validated [`ForwardConfig`].

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;

use crate::error::{ForwardError, ForwardResult};
use crate::portmap::PortMap;

/// Validated contents of the forwarder map file: the four bind/target
/// addresses plus the port map.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// External IPv4 address the forwarder binds its listeners to.
    pub external_v4: Ipv4Addr,
    /// Internal IPv4 address backend connections are made to.
    pub internal_v4: Ipv4Addr,
    /// External IPv6 bind address.
    pub external_v6: Ipv6Addr,
    /// Internal IPv6 target address.
    pub internal_v6: Ipv6Addr,
    /// External port → internal port table.
    pub port_map: PortMap,
}

impl ForwardConfig {
    /// Read and parse the map file at `path`.
    pub fn load(path: &Path) -> ForwardResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse the line-oriented map format.
    pub fn parse(content: &str) -> ForwardResult<Self> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < 5 {
            return Err(ForwardError::MapTooShort(lines.len()));
        }

        let external_v4 = parse_addr::<Ipv4Addr>(lines[0], 0, "IPv4")?;
        let internal_v4 = parse_addr::<Ipv4Addr>(lines[1], 1, "IPv4")?;
        let external_v6 = parse_addr::<Ipv6Addr>(lines[2], 2, "IPv6")?;
        let internal_v6 = parse_addr::<Ipv6Addr>(lines[3], 3, "IPv6")?;

        let mut port_map = PortMap::new();
        for (idx, line) in lines.iter().enumerate().skip(4) {
            let (external, internal) = parse_mapping(line, idx)?;
            port_map.insert(external, internal)?;
        }

        Ok(Self {
            external_v4,
            internal_v4,
            external_v6,
            internal_v6,
            port_map,
        })
    }
}

/// Address lines are `<label> <address>`; only the second field matters.
fn parse_addr<T: FromStr>(line: &str, idx: usize, family: &'static str) -> ForwardResult<T> {
    let value = line.split_whitespace().nth(1).unwrap_or_default();
    value.parse().map_err(|_| ForwardError::InvalidAddress {
        line: idx,
        family,
        value: value.to_string(),
    })
}

fn parse_mapping(line: &str, idx: usize) -> ForwardResult<(u32, u32)> {
    let invalid = || ForwardError::InvalidMapping {
        line: idx,
        value: line.to_string(),
    };
    let mut fields = line.split_whitespace();
    let external = fields.next().ok_or_else(invalid)?;
    let internal = fields.next().ok_or_else(invalid)?;
    let external: u32 = external.parse().map_err(|_| invalid())?;
    let internal: u32 = internal.parse().map_err(|_| invalid())?;
    Ok((external, internal))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "\
external_v4 0.0.0.0
internal_v4 192.168.0.20
external_v6 ::
internal_v6 fd00::20
9000 9100
9001 9101
";

    #[test]
    fn test_parse_valid() {
        let config = ForwardConfig::parse(VALID).unwrap();
        assert_eq!(config.external_v4, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.internal_v4, "192.168.0.20".parse::<Ipv4Addr>().unwrap());
        assert_eq!(config.external_v6, Ipv6Addr::UNSPECIFIED);
        assert_eq!(config.internal_v6, "fd00::20".parse::<Ipv6Addr>().unwrap());
        assert_eq!(config.port_map.len(), 2);
        assert_eq!(config.port_map.internal_port(9000), Some(9100));
        assert_eq!(config.port_map.internal_port(9001), Some(9101));
    }

    #[test]
    fn test_too_short() {
        let result = ForwardConfig::parse("a 0.0.0.0\nb 10.0.0.1\nc ::\nd ::1\n");
        assert!(matches!(result, Err(ForwardError::MapTooShort(4))));
    }

    #[test]
    fn test_invalid_ipv4() {
        let text = VALID.replace("192.168.0.20", "not-an-address");
        assert!(matches!(
            ForwardConfig::parse(&text),
            Err(ForwardError::InvalidAddress { line: 1, .. })
        ));
    }

    #[test]
    fn test_ipv6_literal_rejected_in_ipv4_slot() {
        let text = VALID.replace("192.168.0.20", "fd00::20");
        assert!(matches!(
            ForwardConfig::parse(&text),
            Err(ForwardError::InvalidAddress { line: 1, .. })
        ));
    }

    #[test]
    fn test_non_integer_port() {
        let text = VALID.replace("9001 9101", "9001 hello");
        assert!(matches!(
            ForwardConfig::parse(&text),
            Err(ForwardError::InvalidMapping { line: 5, .. })
        ));
    }

    #[test]
    fn test_missing_internal_port() {
        let text = VALID.replace("9001 9101", "9001");
        assert!(matches!(
            ForwardConfig::parse(&text),
            Err(ForwardError::InvalidMapping { line: 5, .. })
        ));
    }

    #[test]
    fn test_out_of_range_port() {
        let text = VALID.replace("9001 9101", "9001 70000");
        assert!(matches!(
            ForwardConfig::parse(&text),
            Err(ForwardError::PortOutOfRange(70000))
        ));
    }

    #[test]
    fn test_duplicate_external_port() {
        let text = VALID.replace("9001 9101", "9000 9101");
        assert!(matches!(
            ForwardConfig::parse(&text),
            Err(ForwardError::DuplicatePort(9000))
        ));
    }
}
