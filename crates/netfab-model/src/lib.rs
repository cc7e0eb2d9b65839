//! The netfab model: a declarative description of virtual networks
//! spanning physical hosts, reconciled against the Linux kernel's
//! traffic-control data plane by differential commits.
//!
//! # Architecture
//!
//! The model is an object graph rooted in a [`Context`]:
//!
//! ```text
//! Context ─┬─ Settings ──── (driver: NetOps)
//!          ├─ Net ───┬─ Attachment ─── remote views
//!          │         └─ Virt
//!          └─ Phys ──┘
//! ```
//!
//! Every object carries a lifecycle [`State`]. Mutations only touch
//! memory and mark affected objects for renewal;
//! [`Context::commit`] validates the graph, tears down stale kernel
//! state, rebuilds what changed, and acknowledges the states. Running
//! the same declarative program on every host, with only the
//! [`Context::phys_claim_local`] call differing, yields one consistent
//! virtual network.
//!
//! Network types plug in through the [`NetOps`] trait; the concrete
//! drivers (direct, vlan, vxlan variants) live in the
//! `netfab-drivers` crate.

mod attachment;
mod commit;
mod context;
mod error;
mod graph;
mod names;
mod net;
mod ops;
mod phys;
mod problem;
mod settings;
mod state;
mod validate;
mod virt;

pub use attachment::{Attachment, RemotePa, RemoteVirt};
pub use context::{Context, IfNamer};
pub use error::{Error, ModelResult};
pub use graph::{EntityId, NetId, PaId, PhysId, RemotePaId, RemoteVirtId, SettingsId, VirtId};
pub use net::Net;
pub use ops::{DataPlane, NetOps, PaView, RemotePaView, RemoteVirtView, VirtView};
pub use phys::Phys;
pub use problem::{Problem, ProblemCode, ProblemRef, ProblemSink};
pub use settings::{NetClass, NetType, Settings, StartupEvent, SwitchType, UserHooks};
pub use state::State;
pub use virt::Virt;
