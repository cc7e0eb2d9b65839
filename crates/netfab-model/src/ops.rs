//! The driver interface: operations every network type implements.
//!
//! A driver realizes one tunneling + switching discipline. The commit
//! engine dispatches to it with read-only views of the model and a
//! handle to the kernel; the driver keeps whatever artifact state it
//! needs (bridges, tunnels, rulesets), keyed by the view ids.
//!
//! All hooks have no-op defaults: a driver only implements the
//! capabilities its discipline needs.

use crate::context::IfNamer;
use crate::graph::{NetId, PaId, PhysId, RemotePaId, RemoteVirtId, VirtId};
use crate::problem::ProblemSink;
use crate::settings::{NetType, SwitchType};
use netfab_tc::{IfHandle, LinkApi, TcResult};
use netfab_types::{IpAddress, MacAddress};

/// Kernel access handed to driver hooks.
pub struct DataPlane<'a> {
    /// The context's netlink link API.
    pub link: &'a mut LinkApi,
    /// Generator for interface names owned by this context.
    pub names: &'a mut IfNamer,
    /// False while the context is being freed without touching the
    /// kernel; drivers must skip kernel removals then.
    pub decommit_enabled: bool,
}

/// Snapshot of one attachment, resolved for driver consumption.
#[derive(Debug, Clone)]
pub struct PaView {
    pub pa: PaId,
    pub net: NetId,
    pub phys: PhysId,
    /// The net's name, if assigned.
    pub net_name: Option<String>,
    /// The phys's name, if assigned.
    pub phys_name: Option<String>,
    /// The net's tenant-visible id.
    pub vnet_id: u32,
    /// The net's type, with its tunnel parameters.
    pub nettype: NetType,
    /// The net's switching discipline.
    pub switch_type: SwitchType,
    /// The phys's kernel interface attribute.
    pub phys_iface: Option<String>,
    /// The phys's tunnel endpoint address.
    pub phys_ip: Option<IpAddress>,
    /// Whether the attachment's phys is the local host.
    pub local: bool,
}

/// Snapshot of one virt on a local attachment.
#[derive(Debug, Clone)]
pub struct VirtView {
    pub virt: VirtId,
    /// The attachment the virt is realized on.
    pub pa: PaView,
    pub mac: Option<MacAddress>,
    /// The virt's kernel interface. For `add_virt` this is the
    /// just-committed interface; for `remove_virt` the one the
    /// previous commit realized.
    pub iface: Option<IfHandle>,
}

/// Snapshot of a peer attachment as seen from a local one.
#[derive(Debug, Clone)]
pub struct RemotePaView {
    pub rpa: RemotePaId,
    pub local: PaView,
    pub remote: PaView,
}

/// Snapshot of one virt on a peer attachment.
#[derive(Debug, Clone)]
pub struct RemoteVirtView {
    pub rv: RemoteVirtId,
    pub rpa: RemotePaView,
    pub virt: VirtId,
    pub mac: Option<MacAddress>,
}

/// Operations realizing one network type.
///
/// Ordering contract, upheld by the commit engine: `create_pa`
/// precedes any `add_virt`/`add_remote_pa` on that attachment;
/// `add_remote_pa` precedes any `add_remote_virt` on that view;
/// removals run in reverse. A failing hook fails the whole commit; the
/// engine never applies half an object.
pub trait NetOps {
    /// Driver name for logs.
    fn kind(&self) -> &'static str;

    /// Driver-specific validation of an attachment about to commit.
    fn validate_pa(&mut self, pa: &PaView, problems: &mut ProblemSink<'_>) {
        let _ = (pa, problems);
    }

    /// Driver-specific validation of a virt about to commit.
    fn validate_virt(&mut self, virt: &VirtView, problems: &mut ProblemSink<'_>) {
        let _ = (virt, problems);
    }

    /// Creates the local data-plane anchor (tunnels, bridges) for an
    /// attachment.
    fn create_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let _ = (dp, pa);
        Ok(())
    }

    /// Inverse of [`NetOps::create_pa`].
    fn destroy_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let _ = (dp, pa);
        Ok(())
    }

    /// Plugs a local virt into the attachment's data plane.
    fn add_virt(&mut self, dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        let _ = (dp, virt);
        Ok(())
    }

    /// Inverse of [`NetOps::add_virt`].
    fn remove_virt(&mut self, dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        let _ = (dp, virt);
        Ok(())
    }

    /// Programs reachability toward a peer attachment.
    fn add_remote_pa(&mut self, dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        let _ = (dp, rpa);
        Ok(())
    }

    /// Inverse of [`NetOps::add_remote_pa`].
    fn remove_remote_pa(&mut self, dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        let _ = (dp, rpa);
        Ok(())
    }

    /// Programs reachability toward one virt on a peer attachment
    /// (statically switched nets only).
    fn add_remote_virt(&mut self, dp: &mut DataPlane<'_>, rv: &RemoteVirtView) -> TcResult<()> {
        let _ = (dp, rv);
        Ok(())
    }

    /// Inverse of [`NetOps::add_remote_virt`].
    fn remove_remote_virt(&mut self, dp: &mut DataPlane<'_>, rv: &RemoteVirtView) -> TcResult<()> {
        let _ = (dp, rv);
        Ok(())
    }
}
