//! MAC addresses as switching keys.
//!
//! In a statically switched net the model's MAC attributes are the
//! entire forwarding table: every classifier rule keys on a MAC under
//! a mask. The constants here are the masks those rules are built
//! from.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitAnd;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Doubles as a mask: classifier keys are produced by AND-ing an
/// address with one of the mask constants.
///
/// # Examples
///
/// ```
/// use netfab_types::MacAddress;
///
/// let mac: MacAddress = "02:a1:b2:c3:d4:e5".parse().unwrap();
/// assert!(mac.is_unicast());
/// assert_eq!(mac.masked(&MacAddress::EXACT_MASK), mac);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// The all-zeroes address. As a mask it matches every frame, which
    /// is what a default (catch-all) switching rule keys on.
    pub const ALL_ZEROES: MacAddress = MacAddress([0; 6]);

    /// Mask isolating the group bit (01:00:00:00:00:00). One rule
    /// under this mask diverts all multicast and broadcast frames to
    /// the replication chain.
    pub const MULTICAST_MASK: MacAddress = MacAddress([0x01, 0, 0, 0, 0, 0]);

    /// Mask selecting one address exactly; unicast switching rules use
    /// this.
    pub const EXACT_MASK: MacAddress = MacAddress([0xff; 6]);

    /// Creates an address from its octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    /// The address octets, transmission order.
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the group bit is set (multicast or broadcast).
    pub fn is_multicast(&self) -> bool {
        self.masked(&Self::MULTICAST_MASK) != Self::ALL_ZEROES
    }

    /// Whether this addresses a single endpoint.
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Whether this is the all-ones broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// Returns this address with `mask` applied octet-wise.
    pub fn masked(&self, mask: &MacAddress) -> MacAddress {
        *self & *mask
    }

    /// The first four octets as one big-endian word, for classifiers
    /// keyed on 32-bit values.
    pub const fn high32(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// The last four octets as one big-endian word.
    pub const fn low32(&self) -> u32 {
        u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }

    /// The first two octets as a big-endian halfword.
    pub const fn high16(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// The last two octets as a big-endian halfword.
    pub const fn low16(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }
}

impl BitAnd for MacAddress {
    type Output = MacAddress;

    fn bitand(self, rhs: MacAddress) -> MacAddress {
        let mut out = [0u8; 6];
        for (i, octet) in out.iter_mut().enumerate() {
            *octet = self.0[i] & rhs.0[i];
        }
        MacAddress(out)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for octet in &self.0 {
            write!(f, "{sep}{octet:02x}")?;
            sep = ":";
        }
        Ok(())
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    /// Accepts six two-digit hex octets, separated by `:` or `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::InvalidMacAddress(s.to_string());

        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(malformed)?;
            if part.len() != 2 {
                return Err(malformed());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(MacAddress(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(mac: MacAddress) -> [u8; 6] {
        mac.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_render() {
        let mac: MacAddress = "02:a1:b2:c3:d4:e5".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5]);
        // Rendering is lowercase and colon-separated regardless of the
        // input form.
        let dashed: MacAddress = "02-A1-B2-C3-D4-E5".parse().unwrap();
        assert_eq!(dashed, mac);
        assert_eq!(dashed.to_string(), "02:a1:b2:c3:d4:e5");
    }

    #[test]
    fn test_reject_malformed() {
        for input in [
            "",
            "02:a1:b2:c3:d4",
            "02:a1:b2:c3:d4:e5:f6",
            "2:a1:b2:c3:d4:e5",
            "002:a1:b2:c3:d4:e5",
            "02:zz:b2:c3:d4:e5",
            "02a1.b2c3.d4e5",
        ] {
            assert!(
                input.parse::<MacAddress>().is_err(),
                "accepted malformed address: {input:?}"
            );
        }
    }

    #[test]
    fn test_group_bit_classification() {
        // The multicast mask splits the address space the way the
        // replication rules do.
        let endpoint: MacAddress = "02:00:00:00:00:07".parse().unwrap();
        assert!(endpoint.is_unicast());
        assert_eq!(
            endpoint.masked(&MacAddress::MULTICAST_MASK),
            MacAddress::ALL_ZEROES
        );

        let group: MacAddress = "33:33:00:00:00:16".parse().unwrap();
        assert!(group.is_multicast());
        assert!(!group.is_broadcast());
        assert_eq!(
            group.masked(&MacAddress::MULTICAST_MASK),
            MacAddress::MULTICAST_MASK
        );

        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::BROADCAST.is_broadcast());
    }

    #[test]
    fn test_mask_algebra() {
        let mac = MacAddress::new([0x02, 0x5e, 0x10, 0x00, 0x00, 0x2a]);
        // An exact mask keys on the full address, the zero mask on
        // nothing.
        assert_eq!(mac.masked(&MacAddress::EXACT_MASK), mac);
        assert_eq!(mac.masked(&MacAddress::ALL_ZEROES), MacAddress::ALL_ZEROES);
        // Masking is plain octet-wise AND.
        let upper_only = MacAddress::new([0xff, 0xff, 0xff, 0, 0, 0]);
        assert_eq!(
            mac & upper_only,
            MacAddress::new([0x02, 0x5e, 0x10, 0, 0, 0])
        );
    }

    #[test]
    fn test_classifier_words() {
        let mac = MacAddress::new([0x02, 0x5e, 0x10, 0x99, 0xab, 0xcd]);
        assert_eq!(mac.high32(), 0x025e_1099);
        assert_eq!(mac.low32(), 0x1099_abcd);
        assert_eq!(mac.high16(), 0x025e);
        assert_eq!(mac.low16(), 0xabcd);
        // The two words overlap in the middle: together they cover all
        // six octets for a pair of 32-bit keys.
        assert_eq!(mac.high32() & 0xffff, (mac.low32() >> 16) & 0xffff);
    }

    #[test]
    fn test_octet_conversions() {
        let octets = [0x02, 0, 0, 0, 0, 0x01];
        let mac = MacAddress::from(octets);
        assert_eq!(<[u8; 6]>::from(mac), octets);
        assert_eq!(String::from(mac), "02:00:00:00:00:01");
    }
}
