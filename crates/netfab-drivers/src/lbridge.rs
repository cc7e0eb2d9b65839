//! Linux-bridge plumbing shared by the learning-switch drivers.

use netfab_model::{DataPlane, VirtView};
use netfab_tc::tc::{CLSACT_EGRESS_PARENT, CLSACT_INGRESS_PARENT};
use netfab_tc::{IfHandle, Ruleset, TcError, TcResult};
use tracing::debug;

/// Priority range reserved on each virt hook for classifier rules.
const VIRT_RULES_PRIO_START: u16 = 0x100;
const VIRT_RULES_PRIO_COUNT: u16 = 0x100;

/// A kernel learning bridge owned by one attachment.
#[derive(Debug)]
pub struct LBridge {
    bridge: IfHandle,
}

impl LBridge {
    /// Creates a bridge named from the context's interface namer and
    /// brings it up.
    pub fn create(dp: &mut DataPlane<'_>) -> TcResult<Self> {
        let name = dp.names.next_name();
        let mut bridge = dp.link.create_bridge(&name)?;
        dp.link.set_up(bridge.resolve()?)?;
        debug!(bridge = %bridge, "bridge created");
        Ok(LBridge { bridge })
    }

    /// The bridge interface.
    pub fn iface(&self) -> &IfHandle {
        &self.bridge
    }

    /// Enslaves `iface` and brings it up.
    pub fn enslave(&mut self, dp: &mut DataPlane<'_>, iface: &mut IfHandle) -> TcResult<()> {
        let slave = iface.resolve()?;
        dp.link.set_master(slave, Some(self.bridge.resolve()?))?;
        dp.link.set_up(slave)
    }

    /// Releases `iface` from the bridge.
    pub fn release(&mut self, dp: &mut DataPlane<'_>, iface: &mut IfHandle) -> TcResult<()> {
        if dp.decommit_enabled {
            dp.link.set_master(iface.resolve()?, None)?;
        }
        Ok(())
    }

    /// Deletes the bridge.
    pub fn free(mut self, dp: &mut DataPlane<'_>) -> TcResult<()> {
        if dp.decommit_enabled {
            dp.link.delete_link(self.bridge.resolve()?)?;
        }
        Ok(())
    }
}

/// A virt plugged into a bridge, with its ingress/egress rulesets
/// anchored at the virt's interface.
pub struct BridgePort {
    pub iface: IfHandle,
    pub rules_in: Ruleset,
    pub rules_out: Ruleset,
}

/// Connects a virt to the bridge and prepares its classifier anchors.
pub fn bridge_add_virt(
    dp: &mut DataPlane<'_>,
    bridge: &mut LBridge,
    virt: &VirtView,
) -> TcResult<BridgePort> {
    let mut iface = virt
        .iface
        .clone()
        .ok_or_else(|| TcError::no_if("<disconnected>"))?;
    bridge.enslave(dp, &mut iface)?;

    let ifindex = iface.resolve()?;
    dp.link.ensure_clsact(ifindex)?;
    let rules_in = Ruleset::new(
        ifindex,
        CLSACT_INGRESS_PARENT,
        0,
        VIRT_RULES_PRIO_START,
        VIRT_RULES_PRIO_COUNT,
    );
    let rules_out = Ruleset::new(
        ifindex,
        CLSACT_EGRESS_PARENT,
        0,
        VIRT_RULES_PRIO_START,
        VIRT_RULES_PRIO_COUNT,
    );
    debug!(virt = %virt.virt, iface = %iface, "virt bridged");
    Ok(BridgePort {
        iface,
        rules_in,
        rules_out,
    })
}

/// Disconnects a virt from the bridge, dropping its classifier state.
pub fn bridge_remove_virt(
    dp: &mut DataPlane<'_>,
    bridge: &mut LBridge,
    mut port: BridgePort,
) -> TcResult<()> {
    if dp.decommit_enabled {
        port.rules_in.free(dp.link)?;
        port.rules_out.free(dp.link)?;
    }
    bridge.release(dp, &mut port.iface)
}
