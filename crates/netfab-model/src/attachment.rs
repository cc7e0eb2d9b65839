//! Attachments: the junction of a phys and a net, and the remote views
//! materialized on it.

use crate::graph::{NetId, PaId, PhysId, RemotePaId, RemoteVirtId, VirtId};
use crate::state::State;
use crate::Context;

/// A point of connection of one phys to one net. At most one
/// attachment exists per (net, phys) pair.
///
/// An attachment either exists because the user attached the phys
/// (`explicitly_attached`), or implicitly because a virt was connected
/// through a phys nobody attached; the latter only serves bookkeeping
/// and is reported by validation if a commit is attempted with virts on
/// it.
#[derive(Debug)]
pub struct Attachment {
    pub id: PaId,
    pub state: State,
    pub net: NetId,
    pub phys: PhysId,
    pub explicitly_attached: bool,
    /// Virts connected through this attachment.
    pub virts: Vec<VirtId>,
    /// Views this (local) attachment holds of its peers.
    pub remote_pas: Vec<RemotePaId>,
    /// Views peers hold of this attachment.
    pub pa_views: Vec<RemotePaId>,
}

/// A local attachment's view of one peer attachment in the same net.
/// Owned by the local side; drives the driver's remote-pa hooks.
#[derive(Debug)]
pub struct RemotePa {
    pub id: RemotePaId,
    pub local: PaId,
    pub remote: PaId,
    /// Views of the virts connected on the remote side.
    pub remote_virts: Vec<RemoteVirtId>,
}

/// A view of one virt on a peer attachment, owned by the remote-pa
/// view it hangs off.
#[derive(Debug)]
pub struct RemoteVirt {
    pub id: RemoteVirtId,
    pub rpa: RemotePaId,
    pub virt: VirtId,
}

impl Context {
    /// Finds the attachment for `(phys, net)`, creating an implicit
    /// one when missing.
    pub(crate) fn find_or_create_attachment(&mut self, phys: PhysId, net: NetId) -> PaId {
        let existing = self
            .phys(phys)
            .attachments
            .iter()
            .copied()
            .find(|pa| self.attachment(*pa).net == net);
        if let Some(pa) = existing {
            return pa;
        }

        let pa = self.attachments.insert_with(|id| Attachment {
            id,
            state: State::New,
            net,
            phys,
            explicitly_attached: false,
            virts: Vec::new(),
            remote_pas: Vec::new(),
            pa_views: Vec::new(),
        });
        self.nets
            .get_mut(net)
            .expect("stale net id")
            .attachments
            .push(pa);
        self.physes
            .get_mut(phys)
            .expect("stale phys id")
            .attachments
            .push(pa);
        pa
    }

    /// Withdraws the explicit attachment and garbage-collects if
    /// nothing keeps the junction alive.
    pub(crate) fn detach_by_pa(&mut self, pa: PaId) {
        self.attachments
            .get_mut(pa)
            .expect("stale attachment id")
            .explicitly_attached = false;
        self.free_pa_if_possible(pa);
    }

    /// Frees an attachment that is neither explicitly attached nor
    /// carrying virts.
    ///
    /// An attachment still carrying virts waits for them to be removed
    /// (or for validation to flag them, if it is not explicitly
    /// attached).
    pub(crate) fn free_pa_if_possible(&mut self, pa: PaId) {
        let attachment = self.attachments.get_mut(pa).expect("stale attachment id");
        if !attachment.virts.is_empty() || attachment.explicitly_attached {
            return;
        }
        if attachment.state == State::New {
            self.pa_do_free(pa);
        } else {
            attachment.state = State::Delete;
        }
    }

    /// Unlinks and drops an attachment. Its virts and views must be
    /// gone already.
    pub(crate) fn pa_do_free(&mut self, pa: PaId) {
        let attachment = self.attachments.remove(pa).expect("stale attachment id");
        assert!(attachment.virts.is_empty());
        assert!(attachment.remote_pas.is_empty());
        assert!(attachment.pa_views.is_empty());
        assert!(!attachment.explicitly_attached);
        self.nets
            .get_mut(attachment.net)
            .expect("nets outlive their attachments")
            .attachments
            .retain(|linked| *linked != pa);
        self.physes
            .get_mut(attachment.phys)
            .expect("physes outlive their attachments")
            .attachments
            .retain(|linked| *linked != pa);
    }
}
