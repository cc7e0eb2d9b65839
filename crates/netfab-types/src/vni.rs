//! Virtual-network identifier with range validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 24-bit virtual-network identifier (VXLAN VNI).
///
/// Valid range is 0-16777215. VLAN-backed networks carry a narrower
/// 12-bit space; that constraint is enforced by the VLAN driver, not
/// here.
///
/// # Examples
///
/// ```
/// use netfab_types::Vni;
///
/// let vni = Vni::new(100).unwrap();
/// assert_eq!(vni.as_u32(), 100);
///
/// assert!(Vni::new(1 << 24).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Vni(u32);

impl Vni {
    /// Maximum valid VNI.
    pub const MAX: u32 = (1 << 24) - 1;

    /// Creates a new VNI.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not fit in 24 bits.
    pub const fn new(id: u32) -> Result<Self, ParseError> {
        if id <= Self::MAX {
            Ok(Vni(id))
        } else {
            Err(ParseError::InvalidVni(id))
        }
    }

    /// Returns the VNI as a u32.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Vni {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s
            .parse()
            .map_err(|_| ParseError::InvalidVni(u32::MAX))?;
        Vni::new(raw)
    }
}

impl TryFrom<u32> for Vni {
    type Error = ParseError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Vni::new(id)
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> u32 {
        vni.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_range() {
        assert!(Vni::new(0).is_ok());
        assert!(Vni::new(Vni::MAX).is_ok());
        assert!(Vni::new(Vni::MAX + 1).is_err());
    }

    #[test]
    fn test_parse() {
        let vni: Vni = "4096".parse().unwrap();
        assert_eq!(vni.as_u32(), 4096);
        assert!("16777216".parse::<Vni>().is_err());
        assert!("nope".parse::<Vni>().is_err());
    }
}
