//! Broker version numbers
//!
//! Versions are packed as `a.b.c.d` into one `u32` (one byte per component)
//! so that applicability ranges compare with plain integer ordering.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Packed `a.b.c.d` broker version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BrokerVersion(u32);

impl BrokerVersion {
    /// Version used for the `trunk` alias
    pub const TRUNK: BrokerVersion = BrokerVersion::new(0, 10, 0, 0);

    /// Pack four components
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8) | d as u32)
    }

    /// Component `i` (0 = major)
    pub const fn component(&self, i: u32) -> u8 {
        ((self.0 >> (24 - 8 * i)) & 0xff) as u8
    }

    /// Packed value
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BrokerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.component(0),
            self.component(1),
            self.component(2),
            self.component(3)
        )
    }
}

impl FromStr for BrokerVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "trunk" {
            return Ok(BrokerVersion::TRUNK);
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 4 {
            return Err(Error::InvalidBrokerVersion(s.to_string()));
        }

        let mut c = [0u8; 4];
        for (slot, part) in c.iter_mut().zip(parts) {
            *slot = part
                .parse::<u8>()
                .map_err(|_| Error::InvalidBrokerVersion(s.to_string()))?;
        }
        Ok(BrokerVersion::new(c[0], c[1], c[2], c[3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: BrokerVersion = "0.9.0.1".parse().unwrap();
        assert_eq!(v, BrokerVersion::new(0, 9, 0, 1));
        assert_eq!(v.to_string(), "0.9.0.1");
    }

    #[test]
    fn test_trunk_alias() {
        let v: BrokerVersion = "trunk".parse().unwrap();
        assert_eq!(v, BrokerVersion::TRUNK);
        assert_eq!(v.to_string(), "0.10.0.0");
    }

    #[test]
    fn test_ordering_is_numeric() {
        let old = BrokerVersion::new(0, 9, 0, 0);
        let new = BrokerVersion::new(0, 10, 0, 0);
        assert!(old < new);
        assert!(BrokerVersion::new(1, 0, 0, 0) > new);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["0.9", "0.9.0.0.1", "a.b.c.d", "0.9.0.300", ""] {
            let err = bad.parse::<BrokerVersion>().unwrap_err();
            assert!(matches!(err, Error::InvalidBrokerVersion(_)), "{}", bad);
        }
    }
}
