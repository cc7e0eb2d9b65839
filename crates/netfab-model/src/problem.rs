//! Structured validation diagnostics.
//!
//! Validation and commit do not stop at the first inconsistency; they
//! collect every problem found and deliver each through the callback
//! passed to [`crate::Context::validate`] / [`crate::Context::commit`].
//! A problem pairs a numeric code with typed references to the objects
//! involved, and renders itself by expanding the code's format
//! template.

use crate::graph::{NetId, PhysId, VirtId};
use std::fmt;

/// Classified validation and commit problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemCode {
    /// A virt is connected through a phys that is not attached to the
    /// virt's network.
    PhysNotAttached,
    /// A local virt's interface does not resolve.
    VirtNoIf,
    /// Two virts in one network share an attribute value.
    VirtDupAttr,
    /// Two networks of the same type share a network id.
    NetDupId,
    /// Two networks with incompatible switching share a tunnel port.
    NetBadNettype,
    /// A local phys is missing a required attribute.
    PhysNoAttr,
    /// Two physes share an attribute value.
    PhysDupAttr,
    /// A virt is missing an attribute its network type requires.
    VirtNoAttr,
    /// A net's tenant-visible id does not fit its network type.
    NetBadId,
    /// A nettype driver failed while programming the data plane.
    CommitFailure,
}

impl ProblemCode {
    /// The format template; each `%o` consumes one reference.
    pub fn template(&self) -> &'static str {
        match self {
            ProblemCode::PhysNotAttached => {
                "virt %o cannot connect to network %o through %o: the host is not attached"
            }
            ProblemCode::VirtNoIf => "interface %o for virt %o does not exist",
            ProblemCode::VirtDupAttr => {
                "duplicate attribute %o on virts %o and %o in network %o"
            }
            ProblemCode::NetDupId => "networks %o and %o share the same type and network id %o",
            ProblemCode::NetBadNettype => {
                "networks %o and %o have incompatible types on a shared port"
            }
            ProblemCode::PhysNoAttr => {
                "attribute %o missing on local phys %o attached to network %o"
            }
            ProblemCode::PhysDupAttr => "duplicate attribute %o on physes %o and %o",
            ProblemCode::VirtNoAttr => "attribute %o missing on virt %o",
            ProblemCode::NetBadId => "network id %o is out of range for network %o",
            ProblemCode::CommitFailure => "data-plane operation %o failed for %o",
        }
    }
}

/// A typed reference to an object involved in a problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemRef {
    /// A kernel interface name.
    If(String),
    /// A network, with its name snapshot if it had one.
    Net { id: NetId, name: Option<String> },
    /// A virt, with its name snapshot if it had one.
    Virt { id: VirtId, name: Option<String> },
    /// A phys, with its name snapshot if it had one.
    Phys { id: PhysId, name: Option<String> },
    /// An attribute name ("mac", "ip", "iface") or operation name.
    Attr(&'static str),
    /// A tenant-visible network id.
    NetId(u32),
}

impl fmt::Display for ProblemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemRef::If(name) => write!(f, "{}", name),
            ProblemRef::Net { id, name } => match name {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "{}", id),
            },
            ProblemRef::Virt { id, name } => match name {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "{}", id),
            },
            ProblemRef::Phys { id, name } => match name {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "{}", id),
            },
            ProblemRef::Attr(attr) => write!(f, "{}", attr),
            ProblemRef::NetId(id) => write!(f, "{}", id),
        }
    }
}

/// One reported problem: a code and the objects involved, in template
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    code: ProblemCode,
    refs: Vec<ProblemRef>,
}

impl Problem {
    pub(crate) fn new(code: ProblemCode, refs: Vec<ProblemRef>) -> Self {
        Problem { code, refs }
    }

    /// The problem's code.
    pub fn code(&self) -> ProblemCode {
        self.code
    }

    /// The objects involved, in template order.
    pub fn refs(&self) -> &[ProblemRef] {
        &self.refs
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut refs = self.refs.iter();
        let mut rest = self.code.template();
        while let Some(pos) = rest.find("%o") {
            f.write_str(&rest[..pos])?;
            match refs.next() {
                Some(subject) => write!(f, "{}", subject)?,
                None => f.write_str("?")?,
            }
            rest = &rest[pos + 2..];
        }
        f.write_str(rest)
    }
}

/// Collects problems during one validation or commit pass.
///
/// Wraps the user's callback and counts deliveries; the pass succeeds
/// only if the count stays zero.
pub struct ProblemSink<'a> {
    callback: &'a mut dyn FnMut(&Problem),
    count: usize,
}

impl<'a> ProblemSink<'a> {
    pub(crate) fn new(callback: &'a mut dyn FnMut(&Problem)) -> Self {
        ProblemSink { callback, count: 0 }
    }

    /// Reports one problem.
    pub fn report(&mut self, code: ProblemCode, refs: Vec<ProblemRef>) {
        let problem = Problem::new(code, refs);
        (self.callback)(&problem);
        self.count += 1;
    }

    /// Number of problems reported so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityId;

    #[test]
    fn test_display_named_refs() {
        let problem = Problem::new(
            ProblemCode::VirtDupAttr,
            vec![
                ProblemRef::Attr("mac"),
                ProblemRef::Virt {
                    id: VirtId::from_raw(1),
                    name: Some("web".to_string()),
                },
                ProblemRef::Virt {
                    id: VirtId::from_raw(2),
                    name: None,
                },
                ProblemRef::Net {
                    id: NetId::from_raw(1),
                    name: Some("tenant0".to_string()),
                },
            ],
        );
        assert_eq!(
            problem.to_string(),
            "duplicate attribute mac on virts web and virt #2 in network tenant0"
        );
    }

    #[test]
    fn test_sink_counts() {
        let mut seen = Vec::new();
        let mut callback = |problem: &Problem| seen.push(problem.code());
        let mut sink = ProblemSink::new(&mut callback);
        sink.report(ProblemCode::NetDupId, vec![]);
        sink.report(ProblemCode::PhysDupAttr, vec![]);
        assert_eq!(sink.count(), 2);
        drop(sink);
        assert_eq!(seen, vec![ProblemCode::NetDupId, ProblemCode::PhysDupAttr]);
    }
}
