//! Netlink link management and traffic-control primitives for netfab.
//!
//! This crate is the data-plane toolbox the nettype drivers build on:
//!
//! - [`LinkApi`]: synchronous NETLINK_ROUTE operations (bridges, vlan and
//!   vxlan links, enslaving, qdisc and filter management)
//! - [`IfHandle`]: an interface name with its lazily resolved ifindex
//! - [`Ruleset`]: priority-slotted flower classifier chains with duplicate
//!   detection and per-slot handle allocation
//! - [`Broadcast`]: action-list fan-out across a chain of filters
//! - [`CleanupRegistry`]: deferred release of resources shared between
//!   several owners
//!
//! Everything here is synchronous; the only blocking is netlink I/O.

mod broadcast;
mod cleanup;
mod error;
mod idalloc;
mod iface;
mod link;
mod ruleset;
mod socket;
pub mod tc;

pub use broadcast::{Broadcast, BroadcastHandle, MAX_FILTER_ACTIONS};
pub use cleanup::{CleanupId, CleanupRegistry};
pub use error::{TcError, TcResult};
pub use idalloc::IdAllocator;
pub use iface::IfHandle;
pub use link::{LinkApi, VxlanConfig};
pub use ruleset::{RuleHandle, Ruleset};
pub use socket::NlSocket;
pub use tc::{
    ActionDesc, ActionSpec, FilterLocation, FlowerKey, FlowerSpec, MatchValue, RuleTarget, TcSink,
    MAX_MATCHES,
};
