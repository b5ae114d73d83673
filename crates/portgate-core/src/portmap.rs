//! Static external-port → internal-port table.

use std::collections::HashMap;

use crate::error::{ForwardError, ForwardResult};

/// One external → internal port pair from the map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub external: u16,
    pub internal: u16,
}

/// The static table translating an externally exposed port to the internal
/// backend port it forwards to. External ports are unique within the map.
#[derive(Debug, Clone, Default)]
pub struct PortMap {
    bindings: HashMap<u16, u16>,
}

impl PortMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a binding, rejecting out-of-range ports and duplicate external
    /// ports.
    pub fn insert(&mut self, external: u32, internal: u32) -> ForwardResult<()> {
        let external = in_port_range(external)?;
        let internal = in_port_range(internal)?;
        if self.bindings.contains_key(&external) {
            return Err(ForwardError::DuplicatePort(external));
        }
        self.bindings.insert(external, internal);
        Ok(())
    }

    /// Internal backend port for the given external port, if mapped.
    pub fn internal_port(&self, external: u16) -> Option<u16> {
        self.bindings.get(&external).copied()
    }

    /// All bindings, in no particular order.
    pub fn bindings(&self) -> impl Iterator<Item = PortBinding> + '_ {
        self.bindings
            .iter()
            .map(|(&external, &internal)| PortBinding { external, internal })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

fn in_port_range(port: u32) -> ForwardResult<u16> {
    if (1..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(ForwardError::PortOutOfRange(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut map = PortMap::new();
        map.insert(9000, 9100).unwrap();
        map.insert(9001, 9101).unwrap();
        assert_eq!(map.internal_port(9000), Some(9100));
        assert_eq!(map.internal_port(9001), Some(9101));
        assert_eq!(map.internal_port(9002), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_duplicate_external_rejected() {
        let mut map = PortMap::new();
        map.insert(9000, 9100).unwrap();
        assert!(matches!(
            map.insert(9000, 9200),
            Err(ForwardError::DuplicatePort(9000))
        ));
    }

    #[test]
    fn test_port_range() {
        let mut map = PortMap::new();
        assert!(matches!(
            map.insert(0, 9100),
            Err(ForwardError::PortOutOfRange(0))
        ));
        assert!(matches!(
            map.insert(9000, 65536),
            Err(ForwardError::PortOutOfRange(65536))
        ));
        map.insert(1, 65535).unwrap();
        assert_eq!(map.internal_port(1), Some(65535));
    }
}
