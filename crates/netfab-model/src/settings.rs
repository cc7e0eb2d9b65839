//! Settings: the description of a network type shared by many nets.

use crate::graph::{NetId, PhysId, SettingsId};
use crate::ops::NetOps;
use crate::state::State;
use crate::{Context, Error, ModelResult};
use netfab_types::IpAddress;

/// The tunneling technique realizing a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetType {
    /// No tunneling; the phys interface carries the network directly.
    Direct,
    /// 802.1q tagging on the phys interface.
    Vlan,
    /// VXLAN with multicast endpoint discovery.
    VxlanMcast {
        /// Multicast group carrying broadcast and unknown-dst traffic.
        mcast_ip: IpAddress,
        /// UDP port (0 selects the kernel default).
        port: u16,
    },
    /// VXLAN with one learning tunnel per connected endpoint.
    VxlanE2E {
        /// UDP port (0 selects the kernel default).
        port: u16,
    },
    /// VXLAN with static, model-driven switching rules.
    VxlanStatic {
        /// UDP port (0 selects the kernel default).
        port: u16,
    },
}

/// Equality class used by duplicate-id validation: all VXLAN variants
/// share one tenant-visible id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetClass {
    Direct,
    Vlan,
    Vxlan,
}

impl NetType {
    /// This type's id-space class.
    pub fn class(&self) -> NetClass {
        match self {
            NetType::Direct => NetClass::Direct,
            NetType::Vlan => NetClass::Vlan,
            NetType::VxlanMcast { .. } | NetType::VxlanE2E { .. } | NetType::VxlanStatic { .. } => {
                NetClass::Vxlan
            }
        }
    }

    /// The UDP port for VXLAN types, `None` otherwise.
    pub fn vxlan_port(&self) -> Option<u16> {
        match self {
            NetType::VxlanMcast { port, .. }
            | NetType::VxlanE2E { port }
            | NetType::VxlanStatic { port } => Some(*port),
            _ => None,
        }
    }
}

/// The switching discipline of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    /// A learning switch with a single tunnel shared by the phys.
    Learning,
    /// A learning switch with a tunnel per connected endpoint.
    LearningE2E,
    /// Static switching with a tunnel per endpoint, driven entirely by
    /// the model's MAC attributes.
    StaticE2E,
}

/// Data handed to a startup hook for one (net, phys) pair.
#[derive(Debug, Clone)]
pub struct StartupEvent {
    pub net: NetId,
    pub net_name: Option<String>,
    pub vnet_id: u32,
    pub phys: PhysId,
    pub phys_iface: Option<String>,
}

/// Optional per-settings callbacks invoked by the commit engine.
///
/// The startup hook runs once per commit for every local (net, phys)
/// pair and is expected to be idempotent: it typically pre-creates
/// interfaces the model expects to exist.
pub trait UserHooks {
    /// Called at the start of every commit for each local attachment.
    fn startup(&mut self, event: &StartupEvent) {
        let _ = event;
    }
}

/// A network-type description. Multiple nets may share one settings
/// object; the driver bound to it realizes all of them.
#[derive(Debug)]
pub struct Settings {
    pub id: SettingsId,
    pub name: Option<String>,
    pub state: State,
    pub nettype: NetType,
    pub switch_type: SwitchType,
    /// Nets using this settings object.
    pub nets: Vec<NetId>,
}

impl Context {
    /// Registers a settings object binding `nettype` and
    /// `switch_type` to a driver.
    ///
    /// The concrete constructors live with the drivers; this is the
    /// generic registration point they (and tests) use.
    pub fn new_settings(
        &mut self,
        nettype: NetType,
        switch_type: SwitchType,
        ops: Box<dyn NetOps>,
    ) -> SettingsId {
        let id = self.settings.insert_with(|id| Settings {
            id,
            name: None,
            state: State::New,
            nettype,
            switch_type,
            nets: Vec::new(),
        });
        self.drivers.insert(id, ops);
        id
    }

    /// Assigns a unique name to a settings object.
    pub fn settings_set_name(&mut self, id: SettingsId, name: &str) -> ModelResult<()> {
        if self.settings_names.claim(name, id).is_err() {
            return Err(Error::duplicate(name));
        }
        let settings = self.settings.get_mut(id).expect("stale settings id");
        if let Some(old) = settings.name.replace(name.to_string()) {
            self.settings_names.release(&old);
        }
        Ok(())
    }

    /// The settings object's name, if assigned.
    pub fn settings_name(&self, id: SettingsId) -> Option<&str> {
        self.settings(id).name.as_deref()
    }

    /// Finds a settings object by name.
    pub fn settings_by_name(&self, name: &str) -> Option<SettingsId> {
        self.settings_names.get(name)
    }

    /// Associates user hooks with a settings object.
    pub fn settings_register_user_hooks(&mut self, id: SettingsId, hooks: Box<dyn UserHooks>) {
        assert!(self.settings.contains(id), "stale settings id");
        self.user_hooks.insert(id, hooks);
    }

    /// Requests removal of a settings object and every net using it.
    pub fn settings_free(&mut self, id: SettingsId) {
        let nets = self.settings(id).nets.clone();
        for net in nets {
            self.net_free(net);
        }
        let settings = self.settings.get_mut(id).expect("stale settings id");
        if settings.state == State::New {
            self.settings_do_free(id);
        } else {
            settings.state = State::Delete;
        }
    }

    /// Unlinks and drops a settings object. Requires all its nets to
    /// be gone already.
    pub(crate) fn settings_do_free(&mut self, id: SettingsId) {
        let settings = self.settings.remove(id).expect("stale settings id");
        assert!(settings.nets.is_empty());
        if let Some(name) = &settings.name {
            self.settings_names.release(name);
        }
        self.drivers.remove(&id);
        self.user_hooks.remove(&id);
    }
}
