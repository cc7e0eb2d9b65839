//! The VLAN network type: an 802.1q subinterface of the phys interface
//! carries the net, bridged locally with the virts.

use crate::lbridge::{bridge_add_virt, bridge_remove_virt, BridgePort, LBridge};
use netfab_model::{
    Context, DataPlane, NetOps, NetType, PaId, PaView, ProblemCode, ProblemRef, ProblemSink,
    SettingsId, SwitchType, VirtId, VirtView,
};
use netfab_tc::{IfHandle, TcError, TcResult};
use std::collections::HashMap;

/// Largest id an 802.1q tag can carry.
const VLAN_ID_MAX: u32 = 4094;

#[derive(Debug)]
struct VlanPa {
    tagged: IfHandle,
    bridge: LBridge,
}

/// Driver for VLAN-backed networks.
#[derive(Default)]
struct VlanOps {
    pas: HashMap<PaId, VlanPa>,
    ports: HashMap<VirtId, BridgePort>,
}

impl NetOps for VlanOps {
    fn kind(&self) -> &'static str {
        "vlan"
    }

    fn validate_pa(&mut self, pa: &PaView, problems: &mut ProblemSink<'_>) {
        if pa.vnet_id == 0 || pa.vnet_id > VLAN_ID_MAX {
            problems.report(
                ProblemCode::NetBadId,
                vec![
                    ProblemRef::NetId(pa.vnet_id),
                    ProblemRef::Net {
                        id: pa.net,
                        name: pa.net_name.clone(),
                    },
                ],
            );
        }
    }

    fn create_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let parent = pa
            .phys_iface
            .as_deref()
            .ok_or_else(|| TcError::no_if("<unset>"))?;
        let parent = dp.link.ifindex(parent)?;

        let name = dp.names.next_name();
        let mut tagged = dp.link.create_vlan(&name, parent, pa.vnet_id as u16)?;

        let mut bridge = LBridge::create(dp)?;
        bridge.enslave(dp, &mut tagged)?;
        self.pas.insert(pa.pa, VlanPa { tagged, bridge });
        Ok(())
    }

    fn destroy_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let Some(mut artifacts) = self.pas.remove(&pa.pa) else {
            return Ok(());
        };
        artifacts.bridge.release(dp, &mut artifacts.tagged)?;
        if dp.decommit_enabled {
            dp.link.delete_link(artifacts.tagged.resolve()?)?;
        }
        artifacts.bridge.free(dp)
    }

    fn add_virt(&mut self, dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        let artifacts = self
            .pas
            .get_mut(&virt.pa.pa)
            .ok_or_else(|| TcError::no_if("<no attachment anchor>"))?;
        let port = bridge_add_virt(dp, &mut artifacts.bridge, virt)?;
        self.ports.insert(virt.virt, port);
        Ok(())
    }

    fn remove_virt(&mut self, dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        let Some(port) = self.ports.remove(&virt.virt) else {
            return Ok(());
        };
        let artifacts = self
            .pas
            .get_mut(&virt.pa.pa)
            .ok_or_else(|| TcError::no_if("<no attachment anchor>"))?;
        bridge_remove_virt(dp, &mut artifacts.bridge, port)
    }
}

/// Creates settings for a VLAN network.
pub fn new_vlan(ctx: &mut Context) -> SettingsId {
    ctx.new_settings(
        NetType::Vlan,
        SwitchType::Learning,
        Box::new(VlanOps::default()),
    )
}
