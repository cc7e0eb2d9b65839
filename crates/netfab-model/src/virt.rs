//! Virts: the virtual interfaces participating in a net.

use crate::graph::{NetId, PaId, PhysId, RemoteVirtId, VirtId};
use crate::state::State;
use crate::{Context, Error, ModelResult};
use netfab_tc::IfHandle;
use netfab_types::MacAddress;

/// A virtual machine's interface (typically a tap device, but any
/// kernel interface works). A virt belongs to one net and reaches it
/// through the attachment of some phys; reconnecting it through a
/// different phys models migration.
#[derive(Debug)]
pub struct Virt {
    pub id: VirtId,
    pub name: Option<String>,
    pub state: State,
    pub net: NetId,
    /// The attachment the virt is currently connected through.
    pub connected_through: Option<PaId>,
    /// The attachment the last commit realized the virt on.
    pub committed_to: Option<PaId>,
    /// MAC attribute, required by statically switched nets.
    pub mac: Option<MacAddress>,
    /// Interface of the current configuration.
    pub connected_if: Option<IfHandle>,
    /// Interface the last commit realized.
    pub committed_if: Option<IfHandle>,
    /// Remote views of this virt held by peer attachments.
    pub views: Vec<RemoteVirtId>,
}

impl Context {
    /// Creates a virt in `net`.
    pub fn new_virt(&mut self, net: NetId) -> VirtId {
        assert!(self.nets.contains(net), "stale net id");
        let id = self.virts.insert_with(|id| Virt {
            id,
            name: None,
            state: State::New,
            net,
            connected_through: None,
            committed_to: None,
            mac: None,
            connected_if: None,
            committed_if: None,
            views: Vec::new(),
        });
        self.nets
            .get_mut(net)
            .expect("stale net id")
            .virts
            .push(id);
        id
    }

    /// Assigns a name to a virt, unique within its net.
    pub fn virt_set_name(&mut self, id: VirtId, name: &str) -> ModelResult<()> {
        let net = self.virt(id).net;
        let net = self.nets.get_mut(net).expect("nets outlive their virts");
        if net.virt_names.claim(name, id).is_err() {
            return Err(Error::duplicate(name));
        }
        let virt = self.virts.get_mut(id).expect("stale virt id");
        if let Some(old) = virt.name.replace(name.to_string()) {
            let net = self.nets.get_mut(virt.net).expect("nets outlive their virts");
            net.virt_names.release(&old);
        }
        Ok(())
    }

    /// The virt's name, if assigned.
    pub fn virt_name(&self, id: VirtId) -> Option<&str> {
        self.virt(id).name.as_deref()
    }

    /// Finds a virt by name within `net`.
    pub fn virt_by_name(&self, net: NetId, name: &str) -> Option<VirtId> {
        self.net(net).virt_names.get(name)
    }

    /// Sets the virt's MAC attribute.
    pub fn virt_set_mac(&mut self, id: VirtId, mac: MacAddress) -> ModelResult<()> {
        let virt = self.virts.get_mut(id).expect("stale virt id");
        virt.mac = Some(mac);
        virt.state.renew();
        Ok(())
    }

    /// Connects the virt to its net through `phys`, using the kernel
    /// interface `iface` on that host.
    ///
    /// An attachment for `(phys, net)` is created implicitly if the
    /// phys was never attached; validation flags it if it is still
    /// implicit at commit time.
    pub fn virt_connect(&mut self, id: VirtId, phys: PhysId, iface: &str) -> ModelResult<()> {
        let net = self.virt(id).net;
        let pa = self.find_or_create_attachment(phys, net);

        self.virt_disconnect(id);

        let virt = self.virts.get_mut(id).expect("stale virt id");
        virt.connected_if = Some(IfHandle::new(iface));
        virt.connected_through = Some(pa);
        virt.state.renew();
        self.attachments
            .get_mut(pa)
            .expect("attachment just looked up")
            .virts
            .push(id);
        Ok(())
    }

    /// Disconnects the virt from its attachment, if any.
    pub fn virt_disconnect(&mut self, id: VirtId) {
        let virt = self.virts.get_mut(id).expect("stale virt id");
        let Some(pa) = virt.connected_through.take() else {
            return;
        };
        virt.state.renew();
        self.attachments
            .get_mut(pa)
            .expect("attachments outlive their virts")
            .virts
            .retain(|linked| *linked != id);
    }

    /// Requests removal of a virt.
    pub fn virt_free(&mut self, id: VirtId) {
        let virt = self.virts.get_mut(id).expect("stale virt id");
        if virt.state == State::New {
            self.virt_do_free(id);
        } else {
            virt.state = State::Delete;
        }
    }

    /// Unlinks and drops a virt, garbage-collecting its attachment if
    /// the virt was the last thing keeping it alive.
    pub(crate) fn virt_do_free(&mut self, id: VirtId) {
        let virt = self.virts.remove(id).expect("stale virt id");
        assert!(virt.views.is_empty());
        if let Some(pa) = virt.connected_through {
            self.attachments
                .get_mut(pa)
                .expect("attachments outlive their virts")
                .virts
                .retain(|linked| *linked != id);
            self.free_pa_if_possible(pa);
        }
        let net = self.nets.get_mut(virt.net).expect("nets outlive their virts");
        net.virts.retain(|linked| *linked != id);
        if let Some(name) = &virt.name {
            net.virt_names.release(name);
        }
    }
}
