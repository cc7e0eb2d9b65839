//! The concrete network-type drivers for netfab.
//!
//! Each driver implements [`netfab_model::NetOps`] for one tunneling +
//! switching discipline and ships a settings constructor:
//!
//! | Constructor | Tunnel | Switching |
//! |---|---|---|
//! | [`new_direct`] | none | kernel learning bridge |
//! | [`new_vlan`] | 802.1q tag | kernel learning bridge |
//! | [`new_vxlan_mcast`] | vxlan, multicast discovery | kernel learning bridge |
//! | [`new_vxlan_e2e`] | vxlan, tunnel per peer | kernel learning bridge |
//! | [`new_vxlan_static`] | vxlan, shared metadata tunnel | static flower rules |
//!
//! Drivers keep their kernel artifacts (bridges, tunnels, rulesets) in
//! maps keyed by the model ids they were created for; the model graph
//! never sees them.

mod direct;
mod lbridge;
mod vlan;
mod vxlan;

#[cfg(any(test, feature = "test-util"))]
pub mod harness;

pub use direct::new_direct;
pub use lbridge::LBridge;
pub use vlan::new_vlan;
pub use vxlan::{new_vxlan_e2e, new_vxlan_mcast, new_vxlan_static};
