//! Pre-commit validation: state propagation and cross-object checks.

use crate::graph::{NetId, PaId, PhysId, VirtId};
use crate::problem::{Problem, ProblemCode, ProblemRef, ProblemSink};
use crate::settings::SwitchType;
use crate::{Context, Error, ModelResult};

impl Context {
    /// Validates the model without touching the data plane, delivering
    /// each problem through `cb`.
    ///
    /// # Errors
    ///
    /// [`Error::Validate`] when any problem was reported.
    pub fn validate(&mut self, mut cb: impl FnMut(&Problem)) -> ModelResult<()> {
        let mut sink = ProblemSink::new(&mut cb);
        self.run_validation(&mut sink);
        match sink.count() {
            0 => Ok(()),
            problems => Err(Error::Validate { problems }),
        }
    }

    pub(crate) fn net_ref(&self, id: NetId) -> ProblemRef {
        ProblemRef::Net {
            id,
            name: self.net(id).name.clone(),
        }
    }

    pub(crate) fn phys_ref(&self, id: PhysId) -> ProblemRef {
        ProblemRef::Phys {
            id,
            name: self.phys(id).name.clone(),
        }
    }

    pub(crate) fn virt_ref(&self, id: VirtId) -> ProblemRef {
        ProblemRef::Virt {
            id,
            name: self.virt(id).name.clone(),
        }
    }

    /// Runs propagation and all validation passes, reporting into
    /// `sink`. Shared by [`Context::validate`] and
    /// [`Context::commit`].
    pub(crate) fn run_validation(&mut self, sink: &mut ProblemSink<'_>) {
        self.propagate_states();

        for net1 in self.nets.ids() {
            if self.net(net1).state.deleted() {
                continue;
            }
            self.validate_virts_net(net1, sink);
            for net2 in self.nets.ids() {
                if net1 != net2 && !self.net(net2).state.deleted() {
                    self.cross_validate_nets(net1, net2, sink);
                }
            }
        }

        for phys in self.physes.ids() {
            if self.phys(phys).state.deleted() {
                continue;
            }
            for pa in self.phys(phys).attachments.clone() {
                if !self.attachment(pa).explicitly_attached {
                    self.report_unattached_virts(pa, sink);
                } else {
                    let net = self.attachment(pa).net;
                    if self.phys(phys).is_local && self.phys(phys).iface.is_none() {
                        sink.report(
                            ProblemCode::PhysNoAttr,
                            vec![
                                ProblemRef::Attr("iface"),
                                self.phys_ref(phys),
                                self.net_ref(net),
                            ],
                        );
                    }
                    if self.attachment(pa).state.pending() {
                        let view = self.pa_view(pa);
                        let settings = self.net(net).settings;
                        let ops = self
                            .drivers
                            .get_mut(&settings)
                            .expect("driver registered for settings");
                        ops.validate_pa(&view, sink);
                    }
                    self.validate_virts_pa(pa, sink);
                }
            }
            for other in self.physes.ids() {
                if phys == other || self.phys(other).state.deleted() {
                    continue;
                }
                if let (Some(ip), Some(other_ip)) = (self.phys(phys).ip, self.phys(other).ip) {
                    if ip == other_ip {
                        sink.report(
                            ProblemCode::PhysDupAttr,
                            vec![
                                ProblemRef::Attr("ip"),
                                self.phys_ref(phys),
                                self.phys_ref(other),
                            ],
                        );
                    }
                }
            }
        }
    }

    /// Propagates RENEW across the graph's dependency edges: a renewed
    /// phys forces its attachments, a renewed net forces its
    /// attachments, a renewed attachment forces the virts connected
    /// through it.
    fn propagate_states(&mut self) {
        for phys in self.physes.ids() {
            let from = self.phys(phys).state;
            for pa in self.phys(phys).attachments.clone() {
                self.attachments
                    .get_mut(pa)
                    .expect("attachment linked to phys")
                    .state
                    .propagate_from(from);
            }
        }
        for net in self.nets.ids() {
            let from = self.net(net).state;
            for pa in self.net(net).attachments.clone() {
                self.attachments
                    .get_mut(pa)
                    .expect("attachment linked to net")
                    .state
                    .propagate_from(from);
            }
        }
        for net in self.nets.ids() {
            for virt in self.net(net).virts.clone() {
                // Whether the virt moved or its attachment changed, it
                // must be rebuilt either way.
                if let Some(pa) = self.virt(virt).connected_through {
                    let from = self.attachment(pa).state;
                    self.virts
                        .get_mut(virt)
                        .expect("virt linked to net")
                        .state
                        .propagate_from(from);
                }
            }
        }
    }

    /// Flags duplicate MAC attributes within one net.
    fn validate_virts_net(&mut self, net: NetId, sink: &mut ProblemSink<'_>) {
        let virts = self.net(net).virts.clone();
        for &v1 in &virts {
            let Some(mac1) = self.virt(v1).mac else {
                continue;
            };
            if !self.virt(v1).state.pending() {
                continue;
            }
            for &v2 in &virts {
                if v1 == v2 || !self.virt(v2).state.pending() {
                    continue;
                }
                if self.virt(v2).mac == Some(mac1) {
                    sink.report(
                        ProblemCode::VirtDupAttr,
                        vec![
                            ProblemRef::Attr("mac"),
                            self.virt_ref(v1),
                            self.virt_ref(v2),
                            self.net_ref(net),
                        ],
                    );
                }
            }
        }
    }

    /// Flags conflicts between two nets: shared (type, id) and
    /// incompatible VXLAN switching on a shared port.
    fn cross_validate_nets(&mut self, net1: NetId, net2: NetId, sink: &mut ProblemSink<'_>) {
        let s1 = self.net(net1).settings;
        let s2 = self.net(net2).settings;
        let vnet_id1 = self.net(net1).vnet_id;

        if self.settings(s1).nettype.class() == self.settings(s2).nettype.class()
            && vnet_id1 == self.net(net2).vnet_id
        {
            sink.report(
                ProblemCode::NetDupId,
                vec![
                    self.net_ref(net1),
                    self.net_ref(net2),
                    ProblemRef::NetId(vnet_id1),
                ],
            );
        }

        // The port clash only matters where both nets actually get
        // realized, i.e. both have a local attachment.
        let locally_attached = |ctx: &Context, net: NetId| {
            ctx.net(net)
                .attachments
                .iter()
                .any(|pa| ctx.phys(ctx.attachment(*pa).phys).is_local)
        };
        if !locally_attached(self, net1) || !locally_attached(self, net2) {
            return;
        }

        let port1 = self.settings(s1).nettype.vxlan_port();
        let port2 = self.settings(s2).nettype.vxlan_port();
        if let (Some(port1), Some(port2)) = (port1, port2) {
            if self.settings(s1).switch_type == SwitchType::StaticE2E
                && self.settings(s2).switch_type != SwitchType::StaticE2E
                && port1 == port2
            {
                sink.report(
                    ProblemCode::NetBadNettype,
                    vec![self.net_ref(net1), self.net_ref(net2)],
                );
            }
        }
    }

    /// Reports every pending virt connected through an attachment that
    /// exists only implicitly.
    fn report_unattached_virts(&mut self, pa: PaId, sink: &mut ProblemSink<'_>) {
        let (net, phys) = {
            let a = self.attachment(pa);
            (a.net, a.phys)
        };
        for virt in self.attachment(pa).virts.clone() {
            if !self.virt(virt).state.pending() {
                continue;
            }
            sink.report(
                ProblemCode::PhysNotAttached,
                vec![self.virt_ref(virt), self.net_ref(net), self.phys_ref(phys)],
            );
        }
    }

    /// Resolves pending virts' interfaces on local explicit
    /// attachments and runs the driver's virt validation.
    fn validate_virts_pa(&mut self, pa: PaId, sink: &mut ProblemSink<'_>) {
        let local = {
            let a = self.attachment(pa);
            self.phys(a.phys).is_local && a.explicitly_attached
        };
        for virt in self.attachment(pa).virts.clone() {
            if !self.virt(virt).state.pending() {
                continue;
            }
            if local {
                let resolved = {
                    let handle = self
                        .virts
                        .get_mut(virt)
                        .expect("virt linked to attachment")
                        .connected_if
                        .as_mut()
                        .expect("connected virts carry an interface");
                    handle.resolve().map_err(|_| handle.name().to_string())
                };
                if let Err(name) = resolved {
                    sink.report(
                        ProblemCode::VirtNoIf,
                        vec![ProblemRef::If(name), self.virt_ref(virt)],
                    );
                }
            }
            let view = self.virt_view(virt, pa, false);
            let settings = self.net(view.pa.net).settings;
            let ops = self
                .drivers
                .get_mut(&settings)
                .expect("driver registered for settings");
            ops.validate_virt(&view, sink);
        }
    }
}
