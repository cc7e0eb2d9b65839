//! Physes: the physical hosts carrying the virtual networks.

use crate::graph::{NetId, PaId, PhysId};
use crate::state::State;
use crate::{Context, Error, ModelResult};
use netfab_types::IpAddress;

/// A physical host. The same phys objects exist in every host's model;
/// the host running this process claims its own with
/// [`Context::phys_claim_local`].
#[derive(Debug)]
pub struct Phys {
    pub id: PhysId,
    pub name: Option<String>,
    pub state: State,
    /// Kernel interface carrying tunnel traffic on this host.
    pub iface: Option<String>,
    /// Tunnel endpoint address of this host.
    pub ip: Option<IpAddress>,
    /// Whether this phys is the host running the process.
    pub is_local: bool,
    /// The locality recorded by the last commit; decommit keys off
    /// this, not the current flag.
    pub committed_as_local: bool,
    /// Attachments of this phys to nets.
    pub attachments: Vec<PaId>,
}

impl Context {
    /// Creates a phys.
    pub fn new_phys(&mut self) -> PhysId {
        self.physes.insert_with(|id| Phys {
            id,
            name: None,
            state: State::New,
            iface: None,
            ip: None,
            is_local: false,
            committed_as_local: false,
            attachments: Vec::new(),
        })
    }

    /// Assigns a unique name to a phys.
    pub fn phys_set_name(&mut self, id: PhysId, name: &str) -> ModelResult<()> {
        if self.phys_names.claim(name, id).is_err() {
            return Err(Error::duplicate(name));
        }
        let phys = self.physes.get_mut(id).expect("stale phys id");
        if let Some(old) = phys.name.replace(name.to_string()) {
            self.phys_names.release(&old);
        }
        Ok(())
    }

    /// The phys's name, if assigned.
    pub fn phys_name(&self, id: PhysId) -> Option<&str> {
        self.phys(id).name.as_deref()
    }

    /// Finds a phys by name.
    pub fn phys_by_name(&self, name: &str) -> Option<PhysId> {
        self.phys_names.get(name)
    }

    /// Sets the phys's kernel interface attribute.
    pub fn phys_set_iface(&mut self, id: PhysId, iface: &str) -> ModelResult<()> {
        let phys = self.physes.get_mut(id).expect("stale phys id");
        phys.iface = Some(iface.to_string());
        phys.state.renew();
        Ok(())
    }

    /// Clears the phys's kernel interface attribute.
    pub fn phys_clear_iface(&mut self, id: PhysId) -> ModelResult<()> {
        let phys = self.physes.get_mut(id).expect("stale phys id");
        phys.iface = None;
        phys.state.renew();
        Ok(())
    }

    /// Sets the phys's tunnel endpoint address.
    pub fn phys_set_ip(&mut self, id: PhysId, ip: IpAddress) -> ModelResult<()> {
        let phys = self.physes.get_mut(id).expect("stale phys id");
        phys.ip = Some(ip);
        phys.state.renew();
        Ok(())
    }

    /// Declares this phys to be the host running the process.
    pub fn phys_claim_local(&mut self, id: PhysId) -> ModelResult<()> {
        let phys = self.physes.get_mut(id).expect("stale phys id");
        if !phys.is_local {
            phys.state.renew();
            phys.is_local = true;
        }
        Ok(())
    }

    /// Revokes the local claim.
    pub fn phys_unclaim_local(&mut self, id: PhysId) -> ModelResult<()> {
        let phys = self.physes.get_mut(id).expect("stale phys id");
        if phys.is_local {
            phys.state.renew();
            phys.is_local = false;
        }
        Ok(())
    }

    /// Attaches the phys to `net`: the phys will carry this net's
    /// data plane.
    pub fn phys_attach(&mut self, id: PhysId, net: NetId) -> ModelResult<()> {
        let pa = self.find_or_create_attachment(id, net);
        self.attachments
            .get_mut(pa)
            .expect("attachment just looked up")
            .explicitly_attached = true;
        Ok(())
    }

    /// Detaches the phys from `net`. The attachment lingers while
    /// virts are still connected through it; validation reports them.
    pub fn phys_detach(&mut self, id: PhysId, net: NetId) {
        let pa = self
            .phys(id)
            .attachments
            .iter()
            .copied()
            .find(|pa| self.attachment(*pa).net == net);
        if let Some(pa) = pa {
            self.detach_by_pa(pa);
        }
    }

    /// Requests removal of a phys, disconnecting and detaching
    /// everything it carries.
    pub fn phys_free(&mut self, id: PhysId) {
        for pa in self.phys(id).attachments.clone() {
            for virt in self.attachment(pa).virts.clone() {
                self.virt_disconnect(virt);
            }
            self.detach_by_pa(pa);
        }
        let phys = self.physes.get_mut(id).expect("stale phys id");
        if phys.state == State::New {
            self.phys_do_free(id);
        } else {
            phys.state = State::Delete;
        }
    }

    /// Unlinks and drops a phys. Its attachments must be gone already.
    pub(crate) fn phys_do_free(&mut self, id: PhysId) {
        let phys = self.physes.remove(id).expect("stale phys id");
        assert!(phys.attachments.is_empty());
        if let Some(name) = &phys.name {
            self.phys_names.release(name);
        }
    }
}
