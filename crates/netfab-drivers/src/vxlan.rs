//! The VXLAN network types.
//!
//! Three disciplines share the encapsulation but differ in how remote
//! endpoints are found:
//!
//! - **mcast**: one learning tunnel per attachment, flooding unknown
//!   destinations to a multicast group.
//! - **e2e**: a learning tunnel per peer host, all bridged together.
//! - **static**: a single metadata-mode tunnel shared by every
//!   statically switched net on the host; switching is programmed
//!   entirely from the model's MAC attributes as flower rules, with
//!   broadcast fan-out chains replicating multicast frames.

use crate::lbridge::{bridge_add_virt, bridge_remove_virt, BridgePort, LBridge};
use netfab_model::{
    Context, DataPlane, NetOps, NetType, PaId, PaView, PhysId, ProblemCode, ProblemRef,
    ProblemSink, RemotePaId, RemotePaView, RemoteVirtId, RemoteVirtView, SettingsId, SwitchType,
    VirtId, VirtView,
};
use netfab_tc::tc::{CLSACT_EGRESS_PARENT, CLSACT_INGRESS_PARENT};
use netfab_tc::{
    ActionDesc, ActionSpec, Broadcast, BroadcastHandle, CleanupRegistry, IfHandle, LinkApi,
    MatchValue, RuleHandle, RuleTarget, Ruleset, TcError, TcResult, VxlanConfig,
};
use netfab_types::{IpAddress, MacAddress, Vni};
use std::collections::HashMap;
use tracing::debug;

fn require_ip(ip: Option<IpAddress>) -> TcResult<IpAddress> {
    ip.ok_or_else(|| TcError::no_if("<tunnel endpoint unset>"))
}

fn require_mac(mac: Option<MacAddress>) -> TcResult<MacAddress> {
    mac.ok_or_else(|| TcError::no_if("<mac unset>"))
}

fn vni_in_range(pa: &PaView, problems: &mut ProblemSink<'_>) {
    if Vni::new(pa.vnet_id).is_err() {
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

fn ip_attr_present(pa: &PaView, problems: &mut ProblemSink<'_>) {
    if pa.local && pa.phys_ip.is_none() {
        problems.report(
            ProblemCode::PhysNoAttr,
            vec![
                ProblemRef::Attr("ip"),
                ProblemRef::Phys {
                    id: pa.phys,
                    name: pa.phys_name.clone(),
                },
                ProblemRef::Net {
                    id: pa.net,
                    name: pa.net_name.clone(),
                },
            ],
        );
    }
}

// ---------------------------------------------------------------
// mcast
// ---------------------------------------------------------------

#[derive(Debug)]
struct McastPa {
    tunnel: IfHandle,
    bridge: LBridge,
}

/// Learning switch over a multicast VXLAN tunnel.
struct McastOps {
    mcast_ip: IpAddress,
    port: u16,
    pas: HashMap<PaId, McastPa>,
    ports: HashMap<VirtId, BridgePort>,
}

impl NetOps for McastOps {
    fn kind(&self) -> &'static str {
        "vxlan/mcast"
    }

    fn validate_pa(&mut self, pa: &PaView, problems: &mut ProblemSink<'_>) {
        vni_in_range(pa, problems);
        ip_attr_present(pa, problems);
    }

    fn create_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let underlay = pa
            .phys_iface
            .as_deref()
            .ok_or_else(|| TcError::no_if("<unset>"))?;
        let underlay = dp.link.ifindex(underlay)?;

        let name = dp.names.next_name();
        let mut tunnel = dp.link.create_vxlan(
            &name,
            &VxlanConfig {
                vni: pa.vnet_id,
                local: pa.phys_ip,
                group: Some(self.mcast_ip),
                dst_port: self.port,
                learning: true,
                underlay: Some(underlay),
                collect_metadata: false,
            },
        )?;

        let mut bridge = LBridge::create(dp)?;
        bridge.enslave(dp, &mut tunnel)?;
        self.pas.insert(pa.pa, McastPa { tunnel, bridge });
        Ok(())
    }

    fn destroy_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let Some(mut artifacts) = self.pas.remove(&pa.pa) else {
            return Ok(());
        };
        artifacts.bridge.release(dp, &mut artifacts.tunnel)?;
        if dp.decommit_enabled {
            dp.link.delete_link(artifacts.tunnel.resolve()?)?;
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

/// Creates settings for a multicast-discovered VXLAN network.
pub fn new_vxlan_mcast(ctx: &mut Context, mcast_ip: IpAddress, port: u16) -> SettingsId {
    ctx.new_settings(
        NetType::VxlanMcast { mcast_ip, port },
        SwitchType::Learning,
        Box::new(McastOps {
            mcast_ip,
            port,
            pas: HashMap::new(),
            ports: HashMap::new(),
        }),
    )
}

// ---------------------------------------------------------------
// e2e
// ---------------------------------------------------------------

#[derive(Debug)]
struct E2ePa {
    bridge: LBridge,
}

/// Learning switch with a unicast tunnel per peer host.
struct E2eOps {
    port: u16,
    pas: HashMap<PaId, E2ePa>,
    tunnels: HashMap<RemotePaId, IfHandle>,
    ports: HashMap<VirtId, BridgePort>,
}

impl NetOps for E2eOps {
    fn kind(&self) -> &'static str {
        "vxlan/e2e"
    }

    fn validate_pa(&mut self, pa: &PaView, problems: &mut ProblemSink<'_>) {
        vni_in_range(pa, problems);
        ip_attr_present(pa, problems);
    }

    fn create_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let bridge = LBridge::create(dp)?;
        self.pas.insert(pa.pa, E2ePa { bridge });
        Ok(())
    }

    fn destroy_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        let Some(artifacts) = self.pas.remove(&pa.pa) else {
            return Ok(());
        };
        artifacts.bridge.free(dp)
    }

    fn add_remote_pa(&mut self, dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        let local_ip = require_ip(rpa.local.phys_ip)?;
        let remote_ip = require_ip(rpa.remote.phys_ip)?;

        let name = dp.names.next_name();
        let mut tunnel = dp.link.create_vxlan(
            &name,
            &VxlanConfig {
                vni: rpa.local.vnet_id,
                local: Some(local_ip),
                group: Some(remote_ip),
                dst_port: self.port,
                learning: true,
                underlay: None,
                collect_metadata: false,
            },
        )?;

        let artifacts = self
            .pas
            .get_mut(&rpa.local.pa)
            .ok_or_else(|| TcError::no_if("<no attachment anchor>"))?;
        artifacts.bridge.enslave(dp, &mut tunnel)?;
        self.tunnels.insert(rpa.rpa, tunnel);
        Ok(())
    }

    fn remove_remote_pa(&mut self, dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        let Some(mut tunnel) = self.tunnels.remove(&rpa.rpa) else {
            return Ok(());
        };
        if let Some(artifacts) = self.pas.get_mut(&rpa.local.pa) {
            artifacts.bridge.release(dp, &mut tunnel)?;
        }
        if dp.decommit_enabled {
            dp.link.delete_link(tunnel.resolve()?)?;
        }
        Ok(())
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

/// Creates settings for an end-to-end tunneled, learning VXLAN
/// network.
pub fn new_vxlan_e2e(ctx: &mut Context, port: u16) -> SettingsId {
    ctx.new_settings(
        NetType::VxlanE2E { port },
        SwitchType::LearningE2E,
        Box::new(E2eOps {
            port,
            pas: HashMap::new(),
            tunnels: HashMap::new(),
            ports: HashMap::new(),
        }),
    )
}

// ---------------------------------------------------------------
// static
// ---------------------------------------------------------------

/// Egress slot order on a virt interface: multicast replication is
/// checked first, then exact switching, then the default drop.
const EGRESS_BCAST_PRIO: u16 = 0;
const EGRESS_SWITCH_PRIO: u16 = 1;
const EGRESS_DEFAULT_PRIO: u16 = 2;

/// Ingress slots on the shared tunnel.
const INGRESS_SWITCH_PRIO: u16 = 0;
const INGRESS_BCAST_PRIO: u16 = 1;

/// Chain carrying the broadcast fan-out filters on a virt's egress.
const BCAST_CHAIN: u32 = 1;

/// Cleanup channel for shared tunnels.
const CLEANUP_TUNNELS: usize = 0;

struct SharedTunnel {
    iface: IfHandle,
    ifindex: u32,
    /// Switching of decapsulated frames toward local virts, keyed by
    /// (vni, destination MAC).
    ingress: Ruleset,
    users: usize,
}

struct StaticVirt {
    pa: PaId,
    phys: PhysId,
    vni: u32,
    mac: MacAddress,
    ifindex: u32,
    egress: Ruleset,
    bcast: Broadcast,
    /// The (vni, mac) -> this virt rule on the tunnel ingress.
    ingress_rule: Option<RuleHandle>,
}

struct RemotePeer {
    vni: u32,
    local_ip: IpAddress,
    remote_ip: IpAddress,
}

struct RemoteEndpoint {
    vni: u32,
    mac: MacAddress,
    local_ip: IpAddress,
    remote_ip: IpAddress,
}

/// Statically switched VXLAN: no learning anywhere, every forwarding
/// decision comes from the model.
struct StaticOps {
    port: u16,
    tunnels: HashMap<PhysId, SharedTunnel>,
    locals: HashMap<VirtId, StaticVirt>,
    peers: HashMap<RemotePaId, RemotePeer>,
    remotes: HashMap<RemoteVirtId, RemoteEndpoint>,
    /// Ingress broadcast rule per attachment (one per net on the
    /// shared tunnel), rebuilt when local membership changes.
    ingress_bcast: HashMap<PaId, RuleHandle>,
    /// Switching rules about a local virt, living in *other* local
    /// virts' egress rulesets.
    rules_about_local: HashMap<VirtId, Vec<(VirtId, RuleHandle)>>,
    /// Switching rules about a remote endpoint in local egress
    /// rulesets.
    rules_about_remote: HashMap<RemoteVirtId, Vec<(VirtId, RuleHandle)>>,
    /// Broadcast members mirroring to a local virt, per hosting virt.
    bcast_about_local: HashMap<VirtId, Vec<(VirtId, BroadcastHandle)>>,
    /// Broadcast members tunneling to a peer host, per hosting virt.
    bcast_about_peer: HashMap<RemotePaId, Vec<(VirtId, BroadcastHandle)>>,
    cleanup: CleanupRegistry<LinkApi>,
}

impl StaticOps {
    fn new(port: u16) -> Self {
        StaticOps {
            port,
            tunnels: HashMap::new(),
            locals: HashMap::new(),
            peers: HashMap::new(),
            remotes: HashMap::new(),
            ingress_bcast: HashMap::new(),
            rules_about_local: HashMap::new(),
            rules_about_remote: HashMap::new(),
            bcast_about_local: HashMap::new(),
            bcast_about_peer: HashMap::new(),
            cleanup: CleanupRegistry::new(1),
        }
    }

    /// Gets or creates the shared metadata tunnel on `phys`.
    fn ensure_tunnel(&mut self, dp: &mut DataPlane<'_>, phys: PhysId) -> TcResult<u32> {
        if let Some(tunnel) = self.tunnels.get(&phys) {
            return Ok(tunnel.ifindex);
        }
        let name = dp.names.next_name();
        let mut iface = dp.link.create_vxlan(
            &name,
            &VxlanConfig {
                vni: 0,
                local: None,
                group: None,
                dst_port: self.port,
                learning: false,
                underlay: None,
                collect_metadata: true,
            },
        )?;
        let ifindex = iface.resolve()?;
        dp.link.set_up(ifindex)?;
        dp.link.ensure_clsact(ifindex)?;

        let mut ingress = Ruleset::new(ifindex, CLSACT_INGRESS_PARENT, 0, 0x100, 0x10);
        ingress.define_prio(
            INGRESS_SWITCH_PRIO,
            [RuleTarget::EncKeyId, RuleTarget::DstMac],
            [MatchValue::EXACT, MatchValue::EXACT],
        )?;
        ingress.define_prio(
            INGRESS_BCAST_PRIO,
            [RuleTarget::EncKeyId, RuleTarget::DstMac],
            [
                MatchValue::EXACT,
                MatchValue::from_mac(MacAddress::MULTICAST_MASK),
            ],
        )?;

        debug!(tunnel = %iface, "shared static tunnel created");
        self.tunnels.insert(
            phys,
            SharedTunnel {
                iface,
                ifindex,
                ingress,
                users: 0,
            },
        );
        Ok(ifindex)
    }

    /// Rebuilds the tunnel-ingress broadcast rule for one attachment:
    /// multicast frames of its vni replicate to every local virt of
    /// the net.
    fn refresh_ingress_bcast(&mut self, dp: &mut DataPlane<'_>, pa: PaId, phys: PhysId, vni: u32) -> TcResult<()> {
        let members: Vec<u32> = self
            .locals
            .values()
            .filter(|local| local.pa == pa)
            .map(|local| local.ifindex)
            .collect();

        let tunnel = self
            .tunnels
            .get_mut(&phys)
            .ok_or_else(|| TcError::no_if("<no shared tunnel>"))?;
        if let Some(rule) = self.ingress_bcast.remove(&pa) {
            tunnel.ingress.remove_rule(dp.link, &rule)?;
        }
        if members.is_empty() {
            return Ok(());
        }
        let rule = tunnel.ingress.add_rule(
            dp.link,
            INGRESS_BCAST_PRIO,
            [
                MatchValue::from_u32(vni),
                MatchValue::from_mac(MacAddress::MULTICAST_MASK),
            ],
            0,
            ActionDesc::new(members.len(), move |actions| {
                for ifindex in &members {
                    actions.push(ActionSpec::Mirror { ifindex: *ifindex });
                }
            }),
        )?;
        self.ingress_bcast.insert(pa, rule);
        Ok(())
    }

    fn tunnel_encap(&self, endpoint: &RemoteEndpoint) -> Vec<ActionSpec> {
        vec![
            ActionSpec::TunnelKeySet {
                id: endpoint.vni,
                src: Some(endpoint.local_ip),
                dst: endpoint.remote_ip,
                dst_port: self.port,
            },
        ]
    }
}

impl NetOps for StaticOps {
    fn kind(&self) -> &'static str {
        "vxlan/static"
    }

    fn validate_pa(&mut self, pa: &PaView, problems: &mut ProblemSink<'_>) {
        vni_in_range(pa, problems);
        ip_attr_present(pa, problems);
    }

    fn validate_virt(&mut self, virt: &VirtView, problems: &mut ProblemSink<'_>) {
        // Without a MAC there is nothing to switch on.
        if virt.mac.is_none() {
            problems.report(
                ProblemCode::VirtNoAttr,
                vec![
                    ProblemRef::Attr("mac"),
                    ProblemRef::Virt {
                        id: virt.virt,
                        name: None,
                    },
                ],
            );
        }
    }

    fn create_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        self.ensure_tunnel(dp, pa.phys)?;
        let tunnel = self.tunnels.get_mut(&pa.phys).expect("just ensured");
        tunnel.users += 1;
        Ok(())
    }

    fn destroy_pa(&mut self, dp: &mut DataPlane<'_>, pa: &PaView) -> TcResult<()> {
        if let Some(rule) = self.ingress_bcast.remove(&pa.pa) {
            if dp.decommit_enabled {
                if let Some(tunnel) = self.tunnels.get_mut(&pa.phys) {
                    tunnel.ingress.remove_rule(dp.link, &rule)?;
                }
            }
        }

        let Some(tunnel) = self.tunnels.get_mut(&pa.phys) else {
            return Ok(());
        };
        tunnel.users -= 1;
        if tunnel.users == 0 {
            // The tunnel is shared between every net of these
            // settings; release it through the deferred registry so a
            // teardown path reaching it twice runs it once.
            let mut shared = self.tunnels.remove(&pa.phys).expect("present above");
            let decommit = dp.decommit_enabled;
            let entry = self.cleanup.register(move |link: &mut LinkApi| {
                if decommit {
                    let _ = shared.iface.resolve().and_then(|idx| link.delete_link(idx));
                }
            });
            self.cleanup.subscribe(CLEANUP_TUNNELS, entry);
            self.cleanup.flush(CLEANUP_TUNNELS, dp.link);
        }
        Ok(())
    }

    fn add_virt(&mut self, dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        let mac = require_mac(virt.mac)?;
        let mut iface = virt
            .iface
            .clone()
            .ok_or_else(|| TcError::no_if("<disconnected>"))?;
        let ifindex = iface.resolve()?;
        let vni = virt.pa.vnet_id;
        let phys = virt.pa.phys;
        let tunnel_ifindex = self.ensure_tunnel(dp, phys)?;

        dp.link.ensure_clsact(ifindex)?;
        let mut egress = Ruleset::new(ifindex, CLSACT_EGRESS_PARENT, 0, 0x100, 0x10);
        egress.define_prio(
            EGRESS_BCAST_PRIO,
            [RuleTarget::DstMac, RuleTarget::None],
            [
                MatchValue::from_mac(MacAddress::MULTICAST_MASK),
                MatchValue::ZERO,
            ],
        )?;
        egress.define_prio(
            EGRESS_SWITCH_PRIO,
            [RuleTarget::DstMac, RuleTarget::None],
            [MatchValue::EXACT, MatchValue::ZERO],
        )?;
        egress.define_prio(
            EGRESS_DEFAULT_PRIO,
            [RuleTarget::None, RuleTarget::None],
            [MatchValue::ZERO, MatchValue::ZERO],
        )?;

        // Multicast goes to the fan-out chain; anything the model does
        // not know is dropped.
        egress.add_rule(
            dp.link,
            EGRESS_BCAST_PRIO,
            [
                MatchValue::from_mac(MacAddress::MULTICAST_MASK),
                MatchValue::ZERO,
            ],
            0,
            ActionDesc::fixed(vec![ActionSpec::Goto { chain: BCAST_CHAIN }]),
        )?;
        egress.add_rule(
            dp.link,
            EGRESS_DEFAULT_PRIO,
            [MatchValue::ZERO, MatchValue::ZERO],
            0,
            ActionDesc::fixed(vec![ActionSpec::Drop]),
        )?;

        // Switching toward everything the net already knows.
        let local_targets: Vec<(VirtId, MacAddress, u32)> = self
            .locals
            .iter()
            .filter(|(_, other)| other.vni == vni && other.phys == phys)
            .map(|(id, other)| (*id, other.mac, other.ifindex))
            .collect();
        for (_, other_mac, other_ifindex) in &local_targets {
            egress.add_rule(
                dp.link,
                EGRESS_SWITCH_PRIO,
                [MatchValue::from_mac(*other_mac), MatchValue::ZERO],
                0,
                ActionDesc::fixed(vec![ActionSpec::Redirect {
                    ifindex: *other_ifindex,
                }]),
            )?;
        }
        let remote_targets: Vec<(RemoteVirtId, MacAddress, Vec<ActionSpec>)> = self
            .remotes
            .iter()
            .filter(|(_, endpoint)| endpoint.vni == vni)
            .map(|(rv, endpoint)| {
                let mut actions = self.tunnel_encap(endpoint);
                actions.push(ActionSpec::Redirect {
                    ifindex: tunnel_ifindex,
                });
                (*rv, endpoint.mac, actions)
            })
            .collect();
        for (rv, remote_mac, actions) in remote_targets {
            let rule = egress.add_rule(
                dp.link,
                EGRESS_SWITCH_PRIO,
                [MatchValue::from_mac(remote_mac), MatchValue::ZERO],
                0,
                ActionDesc::fixed(actions),
            )?;
            self.rules_about_remote
                .entry(rv)
                .or_default()
                .push((virt.virt, rule));
        }

        // Fan-out chain: replicate to local peers and tunnel to every
        // peer host of the net.
        let mut bcast = Broadcast::new(ifindex, CLSACT_EGRESS_PARENT, BCAST_CHAIN, 1);
        for (other_id, _, other_ifindex) in &local_targets {
            let member = bcast.add(
                dp.link,
                ActionDesc::fixed(vec![ActionSpec::Mirror {
                    ifindex: *other_ifindex,
                }]),
            )?;
            // Keyed by the virt being mirrored *to*, so its teardown
            // can find the membership in this virt's chain.
            self.bcast_about_local
                .entry(*other_id)
                .or_default()
                .push((virt.virt, member));
        }
        let peer_fanout: Vec<(RemotePaId, Vec<ActionSpec>)> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.vni == vni)
            .map(|(rpa, peer)| {
                (
                    *rpa,
                    vec![
                        ActionSpec::TunnelKeySet {
                            id: peer.vni,
                            src: Some(peer.local_ip),
                            dst: peer.remote_ip,
                            dst_port: self.port,
                        },
                        ActionSpec::Mirror {
                            ifindex: tunnel_ifindex,
                        },
                    ],
                )
            })
            .collect();
        for (rpa, actions) in peer_fanout {
            let member = bcast.add(dp.link, ActionDesc::fixed(actions))?;
            self.bcast_about_peer
                .entry(rpa)
                .or_default()
                .push((virt.virt, member));
        }

        // Teach every existing local virt of the net about this one.
        for (other, _, _) in &local_targets {
            let other = *other;
            let other_state = self.locals.get_mut(&other).expect("snapshot of locals");
            let rule = other_state.egress.add_rule(
                dp.link,
                EGRESS_SWITCH_PRIO,
                [MatchValue::from_mac(mac), MatchValue::ZERO],
                0,
                ActionDesc::fixed(vec![ActionSpec::Redirect { ifindex }]),
            )?;
            self.rules_about_local
                .entry(virt.virt)
                .or_default()
                .push((other, rule));
            let member = other_state.bcast.add(
                dp.link,
                ActionDesc::fixed(vec![ActionSpec::Mirror { ifindex }]),
            )?;
            self.bcast_about_local
                .entry(virt.virt)
                .or_default()
                .push((other, member));
        }

        // Tunnel ingress: decapsulated frames for this MAC and vni go
        // straight to the virt.
        let tunnel = self
            .tunnels
            .get_mut(&phys)
            .expect("ensured above");
        let ingress_rule = tunnel.ingress.add_rule(
            dp.link,
            INGRESS_SWITCH_PRIO,
            [MatchValue::from_u32(vni), MatchValue::from_mac(mac)],
            0,
            ActionDesc::fixed(vec![ActionSpec::Redirect { ifindex }]),
        )?;

        self.locals.insert(
            virt.virt,
            StaticVirt {
                pa: virt.pa.pa,
                phys,
                vni,
                mac,
                ifindex,
                egress,
                bcast,
                ingress_rule: Some(ingress_rule),
            },
        );
        self.refresh_ingress_bcast(dp, virt.pa.pa, phys, vni)
    }

    fn remove_virt(&mut self, dp: &mut DataPlane<'_>, virt: &VirtView) -> TcResult<()> {
        let Some(mut state) = self.locals.remove(&virt.virt) else {
            return Ok(());
        };

        if dp.decommit_enabled {
            // Rules other virts hold about this one.
            for (host, rule) in self.rules_about_local.remove(&virt.virt).unwrap_or_default() {
                if let Some(host_state) = self.locals.get_mut(&host) {
                    host_state.egress.remove_rule(dp.link, &rule)?;
                }
            }
            for (host, member) in self.bcast_about_local.remove(&virt.virt).unwrap_or_default() {
                if let Some(host_state) = self.locals.get_mut(&host) {
                    host_state.bcast.remove(dp.link, member)?;
                }
            }
            // This virt's ingress switching rule on the tunnel.
            if let Some(rule) = state.ingress_rule.take() {
                if let Some(tunnel) = self.tunnels.get_mut(&state.phys) {
                    tunnel.ingress.remove_rule(dp.link, &rule)?;
                }
            }
            state.egress.free(dp.link)?;
            state.bcast.free(dp.link)?;
            self.refresh_ingress_bcast(dp, state.pa, state.phys, state.vni)?;
        } else {
            self.rules_about_local.remove(&virt.virt);
            self.bcast_about_local.remove(&virt.virt);
        }
        Ok(())
    }

    fn add_remote_pa(&mut self, dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        let peer = RemotePeer {
            vni: rpa.local.vnet_id,
            local_ip: require_ip(rpa.local.phys_ip)?,
            remote_ip: require_ip(rpa.remote.phys_ip)?,
        };
        let tunnel_ifindex = self.ensure_tunnel(dp, rpa.local.phys)?;

        // Every local virt of the net starts flooding to the peer.
        let members: Vec<VirtId> = self
            .locals
            .iter()
            .filter(|(_, local)| local.vni == peer.vni && local.phys == rpa.local.phys)
            .map(|(id, _)| *id)
            .collect();
        for host in members {
            let actions = vec![
                ActionSpec::TunnelKeySet {
                    id: peer.vni,
                    src: Some(peer.local_ip),
                    dst: peer.remote_ip,
                    dst_port: self.port,
                },
                ActionSpec::Mirror {
                    ifindex: tunnel_ifindex,
                },
            ];
            let host_state = self.locals.get_mut(&host).expect("snapshot of locals");
            let member = host_state.bcast.add(dp.link, ActionDesc::fixed(actions))?;
            self.bcast_about_peer
                .entry(rpa.rpa)
                .or_default()
                .push((host, member));
        }

        self.peers.insert(rpa.rpa, peer);
        Ok(())
    }

    fn remove_remote_pa(&mut self, dp: &mut DataPlane<'_>, rpa: &RemotePaView) -> TcResult<()> {
        self.peers.remove(&rpa.rpa);
        let members = self.bcast_about_peer.remove(&rpa.rpa).unwrap_or_default();
        if !dp.decommit_enabled {
            return Ok(());
        }
        for (host, member) in members {
            if let Some(host_state) = self.locals.get_mut(&host) {
                host_state.bcast.remove(dp.link, member)?;
            }
        }
        Ok(())
    }

    fn add_remote_virt(&mut self, dp: &mut DataPlane<'_>, rv: &RemoteVirtView) -> TcResult<()> {
        let endpoint = RemoteEndpoint {
            vni: rv.rpa.local.vnet_id,
            mac: require_mac(rv.mac)?,
            local_ip: require_ip(rv.rpa.local.phys_ip)?,
            remote_ip: require_ip(rv.rpa.remote.phys_ip)?,
        };
        let tunnel_ifindex = self.ensure_tunnel(dp, rv.rpa.local.phys)?;

        let mut actions = self.tunnel_encap(&endpoint);
        actions.push(ActionSpec::Redirect {
            ifindex: tunnel_ifindex,
        });

        let members: Vec<VirtId> = self
            .locals
            .iter()
            .filter(|(_, local)| local.vni == endpoint.vni && local.phys == rv.rpa.local.phys)
            .map(|(id, _)| *id)
            .collect();
        for host in members {
            let host_state = self.locals.get_mut(&host).expect("snapshot of locals");
            let rule = host_state.egress.add_rule(
                dp.link,
                EGRESS_SWITCH_PRIO,
                [MatchValue::from_mac(endpoint.mac), MatchValue::ZERO],
                0,
                ActionDesc::fixed(actions.clone()),
            )?;
            self.rules_about_remote
                .entry(rv.rv)
                .or_default()
                .push((host, rule));
        }

        self.remotes.insert(rv.rv, endpoint);
        Ok(())
    }

    fn remove_remote_virt(&mut self, dp: &mut DataPlane<'_>, rv: &RemoteVirtView) -> TcResult<()> {
        self.remotes.remove(&rv.rv);
        let rules = self.rules_about_remote.remove(&rv.rv).unwrap_or_default();
        if !dp.decommit_enabled {
            return Ok(());
        }
        for (host, rule) in rules {
            if let Some(host_state) = self.locals.get_mut(&host) {
                host_state.egress.remove_rule(dp.link, &rule)?;
            }
        }
        Ok(())
    }
}

/// Creates settings for a statically switched VXLAN network.
pub fn new_vxlan_static(ctx: &mut Context, port: u16) -> SettingsId {
    ctx.new_settings(
        NetType::VxlanStatic { port },
        SwitchType::StaticE2E,
        Box::new(StaticOps::new(port)),
    )
}
