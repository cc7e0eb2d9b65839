//! Nets: virtual networks overlaid on the physical hosts.

use crate::graph::{NetId, PaId, SettingsId, VirtId};
use crate::names::NameTable;
use crate::state::State;
use crate::{Context, Error, ModelResult};

/// A virtual network. Virts connect to it through the attachments of
/// the physical hosts participating in it.
#[derive(Debug)]
pub struct Net {
    pub id: NetId,
    pub name: Option<String>,
    pub state: State,
    /// The settings (type + driver) realizing this net.
    pub settings: SettingsId,
    /// Tenant-visible network id (VLAN id, VNI, ...).
    pub vnet_id: u32,
    /// Attachments of participating physes.
    pub attachments: Vec<PaId>,
    /// Virts belonging to this net.
    pub virts: Vec<VirtId>,
    /// Per-net namespace for virt names.
    pub(crate) virt_names: NameTable<VirtId>,
}

impl Context {
    /// Creates a net of the type described by `settings`, carrying the
    /// tenant-visible id `vnet_id`.
    pub fn new_net(&mut self, settings: SettingsId, vnet_id: u32) -> NetId {
        assert!(self.settings.contains(settings), "stale settings id");
        let id = self.nets.insert_with(|id| Net {
            id,
            name: None,
            state: State::New,
            settings,
            vnet_id,
            attachments: Vec::new(),
            virts: Vec::new(),
            virt_names: NameTable::new(),
        });
        self.settings
            .get_mut(settings)
            .expect("stale settings id")
            .nets
            .push(id);
        id
    }

    /// Assigns a unique name to a net.
    pub fn net_set_name(&mut self, id: NetId, name: &str) -> ModelResult<()> {
        if self.net_names.claim(name, id).is_err() {
            return Err(Error::duplicate(name));
        }
        let net = self.nets.get_mut(id).expect("stale net id");
        if let Some(old) = net.name.replace(name.to_string()) {
            self.net_names.release(&old);
        }
        Ok(())
    }

    /// The net's name, if assigned.
    pub fn net_name(&self, id: NetId) -> Option<&str> {
        self.net(id).name.as_deref()
    }

    /// Finds a net by name.
    pub fn net_by_name(&self, name: &str) -> Option<NetId> {
        self.net_names.get(name)
    }

    /// Requests removal of a net, its virts, and its attachments.
    pub fn net_free(&mut self, id: NetId) {
        for virt in self.net(id).virts.clone() {
            self.virt_free(virt);
        }
        for pa in self.net(id).attachments.clone() {
            self.detach_by_pa(pa);
        }
        let net = self.nets.get_mut(id).expect("stale net id");
        if net.state == State::New {
            self.net_do_free(id);
        } else {
            net.state = State::Delete;
        }
    }

    /// Unlinks and drops a net. Its virts and attachments must be gone
    /// already.
    pub(crate) fn net_do_free(&mut self, id: NetId) {
        let net = self.nets.remove(id).expect("stale net id");
        assert!(net.attachments.is_empty());
        assert!(net.virts.is_empty());
        if let Some(name) = &net.name {
            self.net_names.release(name);
        }
        let settings = self
            .settings
            .get_mut(net.settings)
            .expect("settings outlive their nets");
        settings.nets.retain(|linked| *linked != id);
    }
}
