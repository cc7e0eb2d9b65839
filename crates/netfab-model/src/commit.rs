//! The commit engine: differential reconciliation of the model against
//! the kernel.
//!
//! One commit runs, in fixed order: user startup hooks, validation,
//! the decommit pass (tearing down everything renewed or deleted,
//! deepest objects first), the recommit pass (rebuilding outermost
//! first: attachment, virts, remote views), and the state
//! acknowledgment. Between two commits with no model changes, a commit
//! performs no driver calls at all.

use crate::attachment::{RemotePa, RemoteVirt};
use crate::graph::{PaId, RemotePaId, RemoteVirtId, SettingsId, VirtId};
use crate::ops::{DataPlane, NetOps, PaView, RemotePaView, RemoteVirtView, VirtView};
use crate::problem::{Problem, ProblemCode, ProblemRef, ProblemSink};
use crate::settings::StartupEvent;
use crate::state::State;
use crate::{Context, Error, ModelResult};
use netfab_tc::{TcError, TcResult};
use tracing::{debug, warn};

impl Context {
    /// Commits the model: brings the kernel's TC state in sync with
    /// the object graph, applying only the delta against the previous
    /// commit. Problems are delivered through `cb`.
    ///
    /// # Errors
    ///
    /// [`Error::Validate`] when validation reported problems (the data
    /// plane is untouched), [`Error::Commit`] when a driver failed
    /// while programming the kernel.
    pub fn commit(&mut self, mut cb: impl FnMut(&Problem)) -> ModelResult<()> {
        self.trigger_startup_hooks();

        let mut sink = ProblemSink::new(&mut cb);
        self.run_validation(&mut sink);
        if sink.count() > 0 {
            return Err(Error::Validate {
                problems: sink.count(),
            });
        }

        self.decommit_pass(&mut sink);
        self.recommit_pass(&mut sink);
        self.ack_pass();

        match sink.count() {
            0 => Ok(()),
            problems => Err(Error::Commit { problems }),
        }
    }

    // ---- views ---------------------------------------------------

    pub(crate) fn pa_view(&self, pa: PaId) -> PaView {
        let a = self.attachment(pa);
        let net = self.net(a.net);
        let phys = self.phys(a.phys);
        let settings = self.settings(net.settings);
        PaView {
            pa,
            net: a.net,
            phys: a.phys,
            net_name: net.name.clone(),
            phys_name: phys.name.clone(),
            vnet_id: net.vnet_id,
            nettype: settings.nettype.clone(),
            switch_type: settings.switch_type,
            phys_iface: phys.iface.clone(),
            phys_ip: phys.ip,
            local: phys.is_local,
        }
    }

    /// `committed` selects the interface snapshot: the one the last
    /// commit realized (for teardown) or the live one.
    pub(crate) fn virt_view(&self, virt: VirtId, pa: PaId, committed: bool) -> VirtView {
        let v = self.virt(virt);
        VirtView {
            virt,
            pa: self.pa_view(pa),
            mac: v.mac,
            iface: if committed {
                v.committed_if.clone()
            } else {
                v.connected_if.clone()
            },
        }
    }

    pub(crate) fn remote_pa_view(&self, rpa: RemotePaId) -> RemotePaView {
        let r = self.remote_pas.get(rpa).expect("stale remote-pa id");
        RemotePaView {
            rpa,
            local: self.pa_view(r.local),
            remote: self.pa_view(r.remote),
        }
    }

    pub(crate) fn remote_virt_view(&self, rv: RemoteVirtId) -> RemoteVirtView {
        let r = self.remote_virts.get(rv).expect("stale remote-virt id");
        RemoteVirtView {
            rv: r.id,
            rpa: self.remote_pa_view(r.rpa),
            virt: r.virt,
            mac: self.virt(r.virt).mac,
        }
    }

    // ---- dispatch ------------------------------------------------

    /// Runs one driver hook with kernel access. Field borrows are
    /// split here: the driver, the link API and the name generator
    /// live in disjoint fields of the context.
    fn with_ops<R>(
        &mut self,
        settings: SettingsId,
        f: impl FnOnce(&mut dyn NetOps, &mut DataPlane<'_>) -> R,
    ) -> R {
        let ops = self
            .drivers
            .get_mut(&settings)
            .expect("driver registered for settings");
        let mut dp = DataPlane {
            link: &mut self.link,
            names: &mut self.ifnames,
            decommit_enabled: self.decommit_enabled,
        };
        f(ops.as_mut(), &mut dp)
    }

    fn ops_settings(&self, pa: PaId) -> SettingsId {
        self.net(self.attachment(pa).net).settings
    }

    /// Surfaces a failed hook: the commit continues (nothing is
    /// half-applied per object), the problem count makes the commit
    /// return [`Error::Commit`].
    fn report_hook_failure(
        &self,
        sink: &mut ProblemSink<'_>,
        hook: &'static str,
        subject: ProblemRef,
        err: netfab_tc::TcError,
    ) {
        warn!(%err, hook, "driver hook failed");
        sink.report(
            ProblemCode::CommitFailure,
            vec![ProblemRef::Attr(hook), subject],
        );
    }

    fn dispatch(
        &mut self,
        sink: &mut ProblemSink<'_>,
        settings: SettingsId,
        hook: &'static str,
        subject: ProblemRef,
        f: impl FnOnce(&mut dyn NetOps, &mut DataPlane<'_>) -> TcResult<()>,
    ) {
        debug!(hook, %subject, "netops");
        if let Err(err) = self.with_ops(settings, f) {
            if matches!(err, TcError::IdExhausted) {
                let _ = self.escalate_nomem();
            }
            self.report_hook_failure(sink, hook, subject, err);
        }
    }

    // ---- startup hooks -------------------------------------------

    /// Invokes every settings' startup hook for each local (net, phys)
    /// pair, once per commit. Hooks are expected to be idempotent.
    fn trigger_startup_hooks(&mut self) {
        let mut pending = Vec::new();
        for phys in self.physes.ids() {
            if !self.phys(phys).is_local {
                continue;
            }
            for pa in self.phys(phys).attachments.clone() {
                let net = self.attachment(pa).net;
                let settings = self.net(net).settings;
                if !self.user_hooks.contains_key(&settings) {
                    continue;
                }
                pending.push((
                    settings,
                    StartupEvent {
                        net,
                        net_name: self.net(net).name.clone(),
                        vnet_id: self.net(net).vnet_id,
                        phys,
                        phys_iface: self.phys(phys).iface.clone(),
                    },
                ));
            }
        }
        for (settings, event) in pending {
            if let Some(hooks) = self.user_hooks.get_mut(&settings) {
                hooks.startup(&event);
            }
        }
    }

    // ---- decommit ------------------------------------------------

    /// Tears down every object whose state demands it, deepest first:
    /// remote views, virts, attachments; then the bookkeeping-only
    /// nets, physes and settings. `Delete` objects are freed,
    /// `Renew` objects come out as `New`, queued for recommit.
    fn decommit_pass(&mut self, sink: &mut ProblemSink<'_>) {
        for net in self.nets.ids() {
            for virt in self.net(net).virts.clone() {
                let uncommit = self
                    .virts
                    .get_mut(virt)
                    .expect("virt linked to net")
                    .state
                    .ack_uncommit();
                if uncommit {
                    self.decommit_virt(virt, sink);
                    if self.virt(virt).state == State::Delete {
                        self.virt_do_free(virt);
                    }
                }
            }
            for pa in self.net(net).attachments.clone() {
                let uncommit = self
                    .attachments
                    .get_mut(pa)
                    .expect("attachment linked to net")
                    .state
                    .ack_uncommit();
                if uncommit {
                    self.decommit_pa(pa, sink);
                    if self.attachment(pa).state == State::Delete {
                        self.pa_do_free(pa);
                    }
                }
            }
            let net_obj = self.nets.get_mut(net).expect("net id snapshot");
            if net_obj.state.ack_uncommit() && net_obj.state == State::Delete {
                self.net_do_free(net);
            }
        }

        for phys in self.physes.ids() {
            let phys_obj = self.physes.get_mut(phys).expect("phys id snapshot");
            if phys_obj.state.ack_uncommit() && phys_obj.state == State::Delete {
                self.phys_do_free(phys);
            }
        }

        for settings in self.settings.ids() {
            let settings_obj = self.settings.get_mut(settings).expect("settings id snapshot");
            if settings_obj.state.ack_uncommit() && settings_obj.state == State::Delete {
                self.settings_do_free(settings);
            }
        }
    }

    fn decommit_virt(&mut self, virt: VirtId, sink: &mut ProblemSink<'_>) {
        let settings = {
            let v = self.virt(virt);
            self.net(v.net).settings
        };

        if let Some(pa) = self.virt(virt).committed_to {
            let view = self.virt_view(virt, pa, true);
            let subject = self.virt_ref(virt);
            self.dispatch(sink, settings, "remove_virt", subject, |ops, dp| {
                ops.remove_virt(dp, &view)
            });
            let v = self.virts.get_mut(virt).expect("stale virt id");
            v.committed_to = None;
            v.committed_if = None;
        }

        for rv in self.virt(virt).views.clone() {
            self.decommit_remote_virt(rv, sink);
        }
    }

    fn decommit_remote_virt(&mut self, rv: RemoteVirtId, sink: &mut ProblemSink<'_>) {
        let view = self.remote_virt_view(rv);
        let settings = self.ops_settings(view.rpa.local.pa);
        let subject = self.virt_ref(view.virt);
        self.dispatch(sink, settings, "remove_remote_virt", subject, |ops, dp| {
            ops.remove_remote_virt(dp, &view)
        });

        let r = self.remote_virts.remove(rv).expect("stale remote-virt id");
        if let Some(rpa) = self.remote_pas.get_mut(r.rpa) {
            rpa.remote_virts.retain(|linked| *linked != rv);
        }
        if let Some(virt) = self.virts.get_mut(r.virt) {
            virt.views.retain(|linked| *linked != rv);
        }
    }

    fn decommit_remote_pa(&mut self, rpa: RemotePaId, sink: &mut ProblemSink<'_>) {
        // Remote virts go first; their routing hangs off this view.
        for rv in self
            .remote_pas
            .get(rpa)
            .expect("stale remote-pa id")
            .remote_virts
            .clone()
        {
            self.decommit_remote_virt(rv, sink);
        }

        let view = self.remote_pa_view(rpa);
        let settings = self.ops_settings(view.local.pa);
        let subject = self.phys_ref(view.remote.phys);
        self.dispatch(sink, settings, "remove_remote_pa", subject, |ops, dp| {
            ops.remove_remote_pa(dp, &view)
        });

        let r = self.remote_pas.remove(rpa).expect("stale remote-pa id");
        if let Some(local) = self.attachments.get_mut(r.local) {
            local.remote_pas.retain(|linked| *linked != rpa);
        }
        if let Some(remote) = self.attachments.get_mut(r.remote) {
            remote.pa_views.retain(|linked| *linked != rpa);
        }
    }

    fn decommit_pa(&mut self, pa: PaId, sink: &mut ProblemSink<'_>) {
        for rpa in self.attachment(pa).pa_views.clone() {
            self.decommit_remote_pa(rpa, sink);
        }
        for rpa in self.attachment(pa).remote_pas.clone() {
            self.decommit_remote_pa(rpa, sink);
        }

        // Destroy follows create: only an attachment committed while
        // its phys was local ever ran create_pa.
        if self.phys(self.attachment(pa).phys).committed_as_local {
            let view = self.pa_view(pa);
            let settings = self.ops_settings(pa);
            let subject = self.net_ref(view.net);
            self.dispatch(sink, settings, "destroy_pa", subject, |ops, dp| {
                ops.destroy_pa(dp, &view)
            });
        }
    }

    // ---- recommit ------------------------------------------------

    /// Rebuilds everything the decommit pass left in `New`: local
    /// attachments first, then their virts, then remote views.
    fn recommit_pass(&mut self, sink: &mut ProblemSink<'_>) {
        for phys in self.physes.ids() {
            let is_local = self.phys(phys).is_local;
            self.physes
                .get_mut(phys)
                .expect("phys id snapshot")
                .committed_as_local = is_local;
            if !is_local {
                continue;
            }
            for pa in self.phys(phys).attachments.clone() {
                self.commit_pa(pa, sink);
            }
        }
    }

    fn find_remote_pa(&self, local: PaId, remote: PaId) -> Option<RemotePaId> {
        self.attachment(local)
            .remote_pas
            .iter()
            .copied()
            .find(|rpa| self.remote_pas.get(*rpa).expect("linked view").remote == remote)
    }

    fn find_remote_virt(&self, rpa: RemotePaId, virt: VirtId) -> Option<RemoteVirtId> {
        self.remote_pas
            .get(rpa)
            .expect("stale remote-pa id")
            .remote_virts
            .iter()
            .copied()
            .find(|rv| self.remote_virts.get(*rv).expect("linked view").virt == virt)
    }

    fn commit_pa(&mut self, pa: PaId, sink: &mut ProblemSink<'_>) {
        let settings = self.ops_settings(pa);

        if self.attachment(pa).state == State::New {
            let view = self.pa_view(pa);
            let subject = self.net_ref(view.net);
            self.dispatch(sink, settings, "create_pa", subject, |ops, dp| {
                ops.create_pa(dp, &view)
            });
        }

        for virt in self.attachment(pa).virts.clone() {
            if self.virt(virt).state != State::New {
                continue;
            }
            {
                let v = self.virts.get_mut(virt).expect("virt linked to attachment");
                v.committed_to = Some(pa);
                v.committed_if = v.connected_if.clone();
            }
            let view = self.virt_view(virt, pa, true);
            let subject = self.virt_ref(virt);
            self.dispatch(sink, settings, "add_virt", subject, |ops, dp| {
                ops.add_virt(dp, &view)
            });
        }

        // Materialize views of every peer attachment this one does not
        // know yet, and of the virts on them.
        let net = self.attachment(pa).net;
        for remote in self.net(net).attachments.clone() {
            if remote == pa || self.find_remote_pa(pa, remote).is_some() {
                continue;
            }
            let rpa = self.remote_pas.insert_with(|id| RemotePa {
                id,
                local: pa,
                remote,
                remote_virts: Vec::new(),
            });
            self.attachments
                .get_mut(pa)
                .expect("stale attachment id")
                .remote_pas
                .push(rpa);
            self.attachments
                .get_mut(remote)
                .expect("peer attachment in same net")
                .pa_views
                .push(rpa);

            let view = self.remote_pa_view(rpa);
            let subject = self.phys_ref(view.remote.phys);
            self.dispatch(sink, settings, "add_remote_pa", subject, |ops, dp| {
                ops.add_remote_pa(dp, &view)
            });
        }

        for rpa in self.attachment(pa).remote_pas.clone() {
            let remote = self.remote_pas.get(rpa).expect("linked view").remote;
            for virt in self.attachment(remote).virts.clone() {
                if self.find_remote_virt(rpa, virt).is_some() {
                    continue;
                }
                let rv = self.remote_virts.insert_with(|id| RemoteVirt {
                    id,
                    rpa,
                    virt,
                });
                self.remote_pas
                    .get_mut(rpa)
                    .expect("stale remote-pa id")
                    .remote_virts
                    .push(rv);
                self.virts
                    .get_mut(virt)
                    .expect("virt linked to peer attachment")
                    .views
                    .push(rv);

                let view = self.remote_virt_view(rv);
                let subject = self.virt_ref(virt);
                self.dispatch(sink, settings, "add_remote_virt", subject, |ops, dp| {
                    ops.add_remote_virt(dp, &view)
                });
            }
        }
    }

    // ---- ack -----------------------------------------------------

    /// Settles every surviving object into `Ok`.
    fn ack_pass(&mut self) {
        for settings in self.settings.ids() {
            self.settings
                .get_mut(settings)
                .expect("settings id snapshot")
                .state
                .ack();
        }
        for phys in self.physes.ids() {
            self.physes.get_mut(phys).expect("phys id snapshot").state.ack();
        }
        for net in self.nets.ids() {
            self.nets.get_mut(net).expect("net id snapshot").state.ack();
            for pa in self.net(net).attachments.clone() {
                self.attachments
                    .get_mut(pa)
                    .expect("attachment linked to net")
                    .state
                    .ack();
            }
            for virt in self.net(net).virts.clone() {
                self.virts
                    .get_mut(virt)
                    .expect("virt linked to net")
                    .state
                    .ack();
            }
        }
    }
}
