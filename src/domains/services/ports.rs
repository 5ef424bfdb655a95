use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use crate::errors::CellyardError;

/// Ports handed out to services, drawn from a fixed range.
#[derive(Debug, Clone)]
pub struct PortRegistry {
    range: RangeInclusive<u16>,
    reserved: BTreeSet<u16>,
}

impl PortRegistry {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            reserved: BTreeSet::new(),
        }
    }

    /// Reserves `preferred` when given (it may lie outside the range), else
    /// the lowest free port in the range.
    pub fn reserve(&mut self, preferred: Option<u16>) -> Result<u16, CellyardError> {
        if let Some(port) = preferred {
            if port == 0 || !self.reserved.insert(port) {
                return Err(CellyardError::PortUnavailable { port });
            }
            return Ok(port);
        }

        let port = self
            .range
            .clone()
            .find(|port| !self.reserved.contains(port))
            .ok_or(CellyardError::PortUnavailable {
                port: *self.range.end(),
            })?;
        self.reserved.insert(port);
        Ok(port)
    }

    /// Returns whether the port was reserved.
    pub fn release(&mut self, port: u16) -> bool {
        self.reserved.remove(&port)
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_lowest_free_port() {
        let mut ports = PortRegistry::new(100..=102);
        assert_eq!(ports.reserve(None).unwrap(), 100);
        assert_eq!(ports.reserve(None).unwrap(), 101);
        assert!(ports.release(100));
        assert!(!ports.release(100));
        assert_eq!(ports.reserve(None).unwrap(), 100);
        assert_eq!(ports.reserve(None).unwrap(), 102);
        assert_eq!(
            ports.reserve(None),
            Err(CellyardError::PortUnavailable { port: 102 })
        );
    }

    #[test]
    fn preferred_port_must_be_free() {
        let mut ports = PortRegistry::new(100..=102);
        assert_eq!(ports.reserve(Some(8080)).unwrap(), 8080);
        assert!(ports.reserve(Some(8080)).is_err());
        assert!(ports.reserve(Some(0)).is_err());
        assert!(ports.is_reserved(8080));
    }
}
