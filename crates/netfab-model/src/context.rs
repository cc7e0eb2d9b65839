//! The context: root of the declarative model.

use crate::attachment::{Attachment, RemotePa, RemoteVirt};
use crate::graph::{
    NetId, PaId, PhysId, RemotePaId, RemoteVirtId, SettingsId, Store, VirtId,
};
use crate::names::NameTable;
use crate::net::Net;
use crate::ops::NetOps;
use crate::phys::Phys;
use crate::problem::Problem;
use crate::settings::{Settings, UserHooks};
use crate::virt::Virt;
use crate::{Error, ModelResult};
use netfab_tc::LinkApi;
use std::collections::BTreeMap;
use tracing::{error, info};

/// Generates names for kernel interfaces created by the drivers.
///
/// Names are `<prefix>-<counter>`, with the prefix clamped so the
/// result always fits the kernel's 15-character limit.
#[derive(Debug)]
pub struct IfNamer {
    prefix: String,
    counter: u32,
}

impl IfNamer {
    fn new(prefix: &str) -> Self {
        let mut prefix = prefix.to_string();
        // IFNAMSIZ is 16 including the terminator; leave room for
        // "-" and a u32 counter.
        prefix.truncate(4);
        IfNamer { prefix, counter: 0 }
    }

    /// Hands out the next free interface name.
    pub fn next_name(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.prefix, self.counter)
    }
}

/// A top-level object encompassing one whole network topology: the
/// virtual networks, the physical hosts carrying them, and the virts
/// connected to them.
///
/// The same model is constructed on every participating host; the only
/// per-host difference is which phys gets
/// [`claim_local`](Context::phys_claim_local). Mutations only touch
/// memory; [`commit`](Context::commit) reconciles the kernel with the
/// model.
pub struct Context {
    pub(crate) name: String,
    pub(crate) link: LinkApi,
    pub(crate) ifnames: IfNamer,
    /// Cleared while tearing down memory only; drivers skip kernel
    /// removals when unset.
    pub(crate) decommit_enabled: bool,
    pub(crate) nomem_hook: Option<Box<dyn FnMut()>>,

    pub(crate) settings: Store<SettingsId, Settings>,
    pub(crate) nets: Store<NetId, Net>,
    pub(crate) physes: Store<PhysId, Phys>,
    pub(crate) attachments: Store<PaId, Attachment>,
    pub(crate) virts: Store<VirtId, Virt>,
    pub(crate) remote_pas: Store<RemotePaId, RemotePa>,
    pub(crate) remote_virts: Store<RemoteVirtId, RemoteVirt>,

    pub(crate) settings_names: NameTable<SettingsId>,
    pub(crate) net_names: NameTable<NetId>,
    pub(crate) phys_names: NameTable<PhysId>,

    pub(crate) drivers: BTreeMap<SettingsId, Box<dyn NetOps>>,
    pub(crate) user_hooks: BTreeMap<SettingsId, Box<dyn UserHooks>>,
}

impl Context {
    /// Creates a new context named `name` and opens its netlink
    /// socket. The name prefixes every interface the context creates.
    pub fn new(name: &str) -> ModelResult<Self> {
        let link = LinkApi::new().map_err(Error::Netlink)?;
        info!(name, "context created");
        Ok(Context {
            name: name.to_string(),
            link,
            ifnames: IfNamer::new(name),
            decommit_enabled: true,
            nomem_hook: None,
            settings: Store::new(),
            nets: Store::new(),
            physes: Store::new(),
            attachments: Store::new(),
            virts: Store::new(),
            remote_pas: Store::new(),
            remote_virts: Store::new(),
            settings_names: NameTable::new(),
            net_names: NameTable::new(),
            phys_names: NameTable::new(),
            drivers: BTreeMap::new(),
            user_hooks: BTreeMap::new(),
        })
    }

    /// The context's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs a hook invoked whenever an operation is about to fail
    /// with [`Error::NoMem`].
    pub fn set_nomem_hook(&mut self, hook: impl FnMut() + 'static) {
        self.nomem_hook = Some(Box::new(hook));
    }

    /// Installs a nomem hook that panics. Recommended unless the
    /// caller has a real recovery strategy.
    pub fn abort_on_nomem(&mut self) {
        self.set_nomem_hook(|| panic!("netfab: cannot allocate memory"));
    }

    /// Escalates an out-of-memory condition through the hook, then
    /// returns the error for the caller to surface.
    pub(crate) fn escalate_nomem(&mut self) -> Error {
        if let Some(hook) = &mut self.nomem_hook {
            hook();
        }
        Error::NoMem
    }

    /// Tears down the whole model, removing realized state from the
    /// kernel. Problems encountered on the way are delivered through
    /// `cb`.
    pub fn cleanup(mut self, cb: impl FnMut(&Problem)) -> ModelResult<()> {
        for phys in self.physes.ids() {
            self.phys_free(phys);
        }
        for settings in self.settings.ids() {
            self.settings_free(settings);
        }
        self.commit(cb)
    }

    /// Drops the model from memory without touching kernel state.
    ///
    /// Use this before exiting when the realized network should stay
    /// up. Unexpected problems are logged and escalated, since nothing
    /// can handle them meaningfully here.
    pub fn free(mut self) {
        self.decommit_enabled = false;
        let mut problems = 0usize;
        let result = self.cleanup(|problem| {
            problems += 1;
            error!(%problem, "problem while freeing context");
        });
        if let Err(err) = result {
            panic!("freeing context failed: {err}");
        }
        debug_assert_eq!(problems, 0);
    }

    // Panicking accessors: a stale id is a caller bug, exactly like an
    // out-of-range index.

    /// Immutable access to a settings object.
    pub fn settings(&self, id: SettingsId) -> &Settings {
        self.settings.get(id).expect("stale settings id")
    }

    /// Immutable access to a net.
    pub fn net(&self, id: NetId) -> &Net {
        self.nets.get(id).expect("stale net id")
    }

    /// Immutable access to a phys.
    pub fn phys(&self, id: PhysId) -> &Phys {
        self.physes.get(id).expect("stale phys id")
    }

    /// Immutable access to an attachment.
    pub fn attachment(&self, id: PaId) -> &Attachment {
        self.attachments.get(id).expect("stale attachment id")
    }

    /// Immutable access to a virt.
    pub fn virt(&self, id: VirtId) -> &Virt {
        self.virts.get(id).expect("stale virt id")
    }

    /// Returns true while `id` still names a live attachment. Useful
    /// after commits, which garbage-collect attachments.
    pub fn attachment_alive(&self, id: PaId) -> bool {
        self.attachments.contains(id)
    }

    /// Returns true while `id` still names a live virt.
    pub fn virt_alive(&self, id: VirtId) -> bool {
        self.virts.contains(id)
    }

    /// Returns true while `id` still names a live net.
    pub fn net_alive(&self, id: NetId) -> bool {
        self.nets.contains(id)
    }

    /// Returns true while `id` still names a live phys.
    pub fn phys_alive(&self, id: PhysId) -> bool {
        self.physes.contains(id)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("settings", &self.settings.len())
            .field("nets", &self.nets.len())
            .field("physes", &self.physes.len())
            .field("attachments", &self.attachments.len())
            .field("virts", &self.virts.len())
            .finish()
    }
}
