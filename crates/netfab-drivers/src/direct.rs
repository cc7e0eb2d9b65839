//! The "direct" network type: no tunneling, the phys interface joins a
//! local learning bridge together with the virts.
//!
//! Remote hooks are irrelevant here; switching between hosts is
//! whatever the physical segment does.

use crate::lbridge::{bridge_add_virt, bridge_remove_virt, BridgePort, LBridge};
use netfab_model::{Context, DataPlane, NetOps, NetType, PaId, PaView, SettingsId, SwitchType, VirtId, VirtView};
use netfab_tc::{IfHandle, TcError, TcResult};
use std::collections::HashMap;

#[derive(Debug)]
struct DirectPa {
    outgoing: IfHandle,
    bridge: LBridge,
}

/// Driver for direct (untunneled) networks.
#[derive(Default)]
struct DirectOps {
    pas: HashMap<PaId, DirectPa>,
    ports: HashMap<VirtId, BridgePort>,
}

impl NetOps for DirectOps {
    fn kind(&self) -> &'static str {
        "direct"
    }

    fn create_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let name = pa
            .phys_iface
            .as_deref()
            .ok_or_else(|| TcError::no_if("<unset>"))?;
        let mut outgoing = IfHandle::new(name);
        outgoing.resolve()?;

        let mut bridge = LBridge::create(dp)?;
        bridge.enslave(dp, &mut outgoing)?;
        self.pas.insert(pa.pa, DirectPa { outgoing, bridge });
        Ok(())
    }

    fn destroy_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let Some(mut artifacts) = self.pas.remove(&pa.pa) else {
            return Ok(());
        };
        artifacts
            .bridge
            .release(dp, &mut artifacts.outgoing)?;
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

/// Creates settings for a direct network.
pub fn new_direct(ctx: &mut Context) -> SettingsId {
    ctx.new_settings(
        NetType::Direct,
        SwitchType::Learning,
        Box::new(DirectOps::default()),
    )
}
