//! Interface handles: a name plus its lazily resolved ifindex.

use crate::{TcError, TcResult};
use std::fmt;

/// A kernel network interface, identified by name.
///
/// The ifindex is resolved on demand and cached; a handle whose
/// interface does not exist yet is representable and only fails at
/// [`IfHandle::resolve`] time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfHandle {
    name: String,
    ifindex: Option<u32>,
}

impl IfHandle {
    /// Creates an unresolved handle for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        IfHandle {
            name: name.into(),
            ifindex: None,
        }
    }

    /// Creates a handle that is already resolved.
    pub fn resolved(name: impl Into<String>, ifindex: u32) -> Self {
        IfHandle {
            name: name.into(),
            ifindex: Some(ifindex),
        }
    }

    /// The interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cached ifindex, if resolved.
    pub fn ifindex(&self) -> Option<u32> {
        self.ifindex
    }

    /// Returns true once the handle carries an ifindex.
    pub fn is_resolved(&self) -> bool {
        self.ifindex.is_some()
    }

    /// Resolves the name to an ifindex, caching the result.
    ///
    /// # Errors
    ///
    /// Returns [`TcError::NoIf`] if no interface with this name exists.
    pub fn resolve(&mut self) -> TcResult<u32> {
        if let Some(idx) = self.ifindex {
            return Ok(idx);
        }
        let idx = nix::net::if_::if_nametoindex(self.name.as_str())
            .map_err(|_| TcError::no_if(&self.name))?;
        self.ifindex = Some(idx);
        Ok(idx)
    }

    /// Forgets the cached ifindex.
    ///
    /// Used when the underlying link is deleted and the name may be
    /// reused by an unrelated interface later.
    pub fn reset(&mut self) {
        self.ifindex = None;
    }
}

impl fmt::Display for IfHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ifindex {
            Some(idx) => write!(f, "{}#{}", self.name, idx),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved() {
        let handle = IfHandle::new("tap0");
        assert_eq!(handle.name(), "tap0");
        assert!(!handle.is_resolved());
        assert_eq!(handle.to_string(), "tap0");
    }

    #[test]
    fn test_resolved() {
        let handle = IfHandle::resolved("eth0", 2);
        assert_eq!(handle.ifindex(), Some(2));
        assert_eq!(handle.to_string(), "eth0#2");
    }

    #[test]
    fn test_resolve_loopback() {
        // The loopback device exists in every network namespace.
        let mut handle = IfHandle::new("lo");
        let idx = handle.resolve().unwrap();
        assert!(idx > 0);
        assert!(handle.is_resolved());
    }

    #[test]
    fn test_resolve_missing() {
        let mut handle = IfHandle::new("netfab-does-not-exist0");
        assert!(matches!(handle.resolve(), Err(TcError::NoIf { .. })));
    }

    #[test]
    fn test_reset() {
        let mut handle = IfHandle::resolved("eth0", 2);
        handle.reset();
        assert!(!handle.is_resolved());
    }
}
