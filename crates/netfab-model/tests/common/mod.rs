//! Shared test support: a driver that records every hook invocation
//! instead of touching the kernel.

use netfab_model::{
    Context, DataPlane, NetOps, NetType, PaId, PaView, RemotePaView, RemoteVirtView, SettingsId,
    SwitchType, VirtId, VirtView,
};
use netfab_tc::TcResult;
use std::cell::RefCell;
use std::rc::Rc;

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    CreatePa(PaId),
    DestroyPa(PaId),
    AddVirt(VirtId),
    RemoveVirt(VirtId),
    AddRemotePa { local: PaId, remote: PaId },
    RemoveRemotePa { local: PaId, remote: PaId },
    AddRemoteVirt { local: PaId, virt: VirtId },
    RemoveRemoteVirt { local: PaId, virt: VirtId },
}

pub type CallLog = Rc<RefCell<Vec<DriverCall>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Driver stub that appends every invocation to a shared log.
pub struct RecordingOps {
    calls: CallLog,
}

impl RecordingOps {
    pub fn new(calls: &CallLog) -> Self {
        RecordingOps {
            calls: Rc::clone(calls),
        }
    }
}

impl NetOps for RecordingOps {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn create_pa(&mut self, _dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::CreatePa(pa.pa));
        Ok(())
    }

    fn destroy_pa(&mut self, _dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::DestroyPa(pa.pa));
        Ok(())
    }

    fn add_virt(&mut self, _dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::AddVirt(virt.virt));
        Ok(())
    }

    fn remove_virt(&mut self, _dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        self.calls
            .borrow_mut()
            .push(DriverCall::RemoveVirt(virt.virt));
        Ok(())
    }

    fn add_remote_pa(&mut self, _dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::AddRemotePa {
            local: rpa.local.pa,
            remote: rpa.remote.pa,
        });
        Ok(())
    }

    fn remove_remote_pa(&mut self, _dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::RemoveRemotePa {
            local: rpa.local.pa,
            remote: rpa.remote.pa,
        });
        Ok(())
    }

    fn add_remote_virt(&mut self, _dp: &mut DataPlane<'_>, rv: &RemoteVirtView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::AddRemoteVirt {
            local: rv.rpa.local.pa,
            virt: rv.virt,
        });
        Ok(())
    }

    fn remove_remote_virt(&mut self, _dp: &mut DataPlane<'_>, rv: &RemoteVirtView) -> TcResult<()> {
        self.calls.borrow_mut().push(DriverCall::RemoveRemoteVirt {
            local: rv.rpa.local.pa,
            virt: rv.virt,
        });
        Ok(())
    }
}

/// Registers recording settings of an arbitrary direct-class type.
pub fn recording_settings(ctx: &mut Context, calls: &CallLog) -> SettingsId {
    ctx.new_settings(
        NetType::Direct,
        SwitchType::Learning,
        Box::new(RecordingOps::new(calls)),
    )
}

/// Registers recording settings pretending to be a static VXLAN.
pub fn recording_vxlan_static(ctx: &mut Context, calls: &CallLog, port: u16) -> SettingsId {
    ctx.new_settings(
        NetType::VxlanStatic { port },
        SwitchType::StaticE2E,
        Box::new(RecordingOps::new(calls)),
    )
}
