//! Declarative model of the TC filters the control plane installs.
//!
//! The ruleset and broadcast layers describe filters as [`FlowerSpec`]
//! values and hand them to a [`TcSink`]. The netlink-backed sink lives
//! on [`crate::LinkApi`]; tests substitute a recording sink.

use netfab_types::{IpAddress, Ipv4Address, Ipv6Address, MacAddress};
use std::fmt;

/// Maximum number of match conditions per rule.
pub const MAX_MATCHES: usize = 2;

/// Parent handle for the clsact ingress hook.
pub const CLSACT_INGRESS_PARENT: u32 = 0xFFFF_FFF2;

/// Parent handle for the clsact egress hook.
pub const CLSACT_EGRESS_PARENT: u32 = 0xFFFF_FFF3;

/// A packet field a rule can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTarget {
    /// Slot unused.
    None,
    /// Source MAC address.
    SrcMac,
    /// Destination MAC address.
    DstMac,
    /// Source IPv4 address.
    SrcIpv4,
    /// Destination IPv4 address.
    DstIpv4,
    /// Source IPv6 address.
    SrcIpv6,
    /// Destination IPv6 address.
    DstIpv6,
    /// Tunnel key id (VNI) on decapsulated packets.
    EncKeyId,
}

impl RuleTarget {
    /// Whether flower accepts a mask for this field.
    pub fn supports_masking(&self) -> bool {
        !matches!(self, RuleTarget::EncKeyId | RuleTarget::None)
    }

    /// Width of the field in bytes.
    pub fn width(&self) -> usize {
        match self {
            RuleTarget::None => 0,
            RuleTarget::SrcMac | RuleTarget::DstMac => 6,
            RuleTarget::SrcIpv4 | RuleTarget::DstIpv4 | RuleTarget::EncKeyId => 4,
            RuleTarget::SrcIpv6 | RuleTarget::DstIpv6 => 16,
        }
    }
}

/// A match value or mask, sized for the widest supported field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MatchValue([u8; 16]);

impl MatchValue {
    /// The all-zero value (also the "match nothing in particular" mask).
    pub const ZERO: MatchValue = MatchValue([0; 16]);

    /// The all-ones mask.
    pub const EXACT: MatchValue = MatchValue([0xff; 16]);

    pub fn from_mac(mac: MacAddress) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(&mac.octets());
        MatchValue(bytes)
    }

    pub fn from_ipv4(ip: Ipv4Address) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&ip.octets());
        MatchValue(bytes)
    }

    pub fn from_ipv6(ip: Ipv6Address) -> Self {
        MatchValue(ip.octets())
    }

    pub fn from_u32(value: u32) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&value.to_be_bytes());
        MatchValue(bytes)
    }

    /// The raw bytes, `width` of them meaningful for a given target.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns this value AND-ed with `mask`.
    pub fn masked(&self, mask: &MatchValue) -> MatchValue {
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] & mask.0[i];
        }
        MatchValue(out)
    }
}

impl fmt::Debug for MatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchValue(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// One TC action, described declaratively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSpec {
    /// mirred egress redirect to another interface.
    Redirect { ifindex: u32 },
    /// mirred egress mirror to another interface.
    Mirror { ifindex: u32 },
    /// tunnel_key set: encapsulation metadata for a following redirect.
    TunnelKeySet {
        id: u32,
        src: Option<IpAddress>,
        dst: IpAddress,
        dst_port: u16,
    },
    /// tunnel_key unset.
    TunnelKeyRelease,
    /// gact drop.
    Drop,
    /// gact pass.
    Pass,
    /// gact continue: fall through to the next filter.
    Continue,
    /// Jump to another chain on the same hook.
    Goto { chain: u32 },
}

/// A callback-built sequence of actions.
///
/// Actions are emitted directly onto the filter being constructed, so
/// the owner of an action list provides a builder instead of a value:
/// the same descriptor may be replayed every time its filter is
/// rebuilt. `size` is the number of actions the builder will append,
/// declared up front because fan-out capacity accounting needs it
/// before the filter exists.
pub struct ActionDesc {
    pub size: usize,
    pub build: Box<dyn Fn(&mut Vec<ActionSpec>)>,
}

impl ActionDesc {
    /// Creates a descriptor from a fixed list of actions.
    pub fn fixed(actions: Vec<ActionSpec>) -> Self {
        let size = actions.len();
        ActionDesc {
            size,
            build: Box::new(move |out| out.extend(actions.iter().cloned())),
        }
    }

    /// Creates a descriptor from a builder callback.
    pub fn new(size: usize, build: impl Fn(&mut Vec<ActionSpec>) + 'static) -> Self {
        ActionDesc {
            size,
            build: Box::new(build),
        }
    }

    /// Runs the builder, appending `size` actions to `out`.
    pub fn emit(&self, out: &mut Vec<ActionSpec>) {
        (self.build)(out);
    }
}

impl fmt::Debug for ActionDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDesc").field("size", &self.size).finish()
    }
}

/// Where a filter lives: one interface, one hook, one chain, one
/// priority, one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterLocation {
    pub ifindex: u32,
    pub parent: u32,
    pub chain: u32,
    pub prio: u16,
    pub handle: u32,
}

/// The match key of a flower filter: up to [`MAX_MATCHES`] fields with
/// masks and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowerKey {
    pub targets: [RuleTarget; MAX_MATCHES],
    pub masks: [MatchValue; MAX_MATCHES],
    pub values: [MatchValue; MAX_MATCHES],
}

/// A fully described filter: location, optional flower key (`None`
/// means a match-all filter), and its action list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowerSpec {
    pub loc: FilterLocation,
    pub key: Option<FlowerKey>,
    pub actions: Vec<ActionSpec>,
}

/// Where classifier specs get applied.
///
/// The production implementation encodes them into netlink TC messages;
/// the recording implementation captures them for assertions.
pub trait TcSink {
    /// Installs or replaces the filter described by `spec`.
    fn install(&mut self, spec: &FlowerSpec) -> crate::TcResult<()>;

    /// Removes the filter at `loc`. `kind` names the classifier
    /// ("flower" or "matchall"); the kernel matches it on deletion.
    fn remove(&mut self, loc: &FilterLocation, kind: &str) -> crate::TcResult<()>;
}

/// A sink that records every operation instead of touching the kernel.
#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub ops: Vec<SinkOp>,
}

#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
    Install(FlowerSpec),
    Remove(FilterLocation),
}

#[cfg(any(test, feature = "mock"))]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters currently installed (installs minus removes), by location.
    pub fn live(&self) -> Vec<&FlowerSpec> {
        let mut live: Vec<&FlowerSpec> = Vec::new();
        for op in &self.ops {
            match op {
                SinkOp::Install(spec) => {
                    live.retain(|s| s.loc != spec.loc);
                    live.push(spec);
                }
                SinkOp::Remove(loc) => live.retain(|s| s.loc != *loc),
            }
        }
        live
    }
}

#[cfg(any(test, feature = "mock"))]
impl TcSink for RecordingSink {
    fn install(&mut self, spec: &FlowerSpec) -> crate::TcResult<()> {
        self.ops.push(SinkOp::Install(spec.clone()));
        Ok(())
    }

    fn remove(&mut self, loc: &FilterLocation, _kind: &str) -> crate::TcResult<()> {
        self.ops.push(SinkOp::Remove(*loc));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let value = MatchValue::from_mac(mac);
        assert_eq!(value.masked(&MatchValue::EXACT), value);
        assert_eq!(value.masked(&MatchValue::ZERO), MatchValue::ZERO);
    }

    #[test]
    fn test_action_desc_replay() {
        let desc = ActionDesc::fixed(vec![ActionSpec::Redirect { ifindex: 4 }]);
        let mut first = Vec::new();
        let mut second = Vec::new();
        desc.emit(&mut first);
        desc.emit(&mut second);
        assert_eq!(first, second);
        assert_eq!(first.len(), desc.size);
    }

    #[test]
    fn test_target_widths() {
        assert_eq!(RuleTarget::DstMac.width(), 6);
        assert_eq!(RuleTarget::SrcIpv4.width(), 4);
        assert_eq!(RuleTarget::DstIpv6.width(), 16);
        assert!(!RuleTarget::EncKeyId.supports_masking());
    }
}
