//! Error types for link and traffic-control operations.

use std::io;
use thiserror::Error;

/// Result type alias for data-plane operations.
pub type TcResult<T> = Result<T, TcError>;

/// Errors that can occur while talking to the kernel or while
/// maintaining classifier bookkeeping.
#[derive(Debug, Error)]
pub enum TcError {
    /// A netlink socket operation failed at the OS level.
    #[error("netlink {operation} failed: {source}")]
    Socket {
        /// The operation that failed (e.g., "send", "recv", "bind").
        operation: &'static str,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The kernel rejected a netlink request.
    #[error("kernel rejected {operation}: errno {errno}")]
    Rejected {
        /// Human-readable description of the request.
        operation: String,
        /// Negative errno carried by the NLMSG_ERROR ack.
        errno: i32,
    },

    /// A netlink reply could not be decoded.
    #[error("malformed netlink reply for {operation}")]
    Malformed {
        /// The request the reply belonged to.
        operation: String,
    },

    /// An interface name did not resolve to an ifindex.
    #[error("no such interface: {name}")]
    NoIf {
        /// The interface name.
        name: String,
    },

    /// A rule with the same masked key and subpriority already exists.
    #[error("duplicate rule in priority slot")]
    Duplicate,

    /// A rule's targets or masks differ from the slot's declaration.
    #[error("rule targets/masks do not match the priority slot")]
    TargetMismatch,

    /// A priority slot was defined twice, or referenced before definition.
    #[error("priority slot {prio} {problem}")]
    BadPrio {
        /// The priority in question.
        prio: u16,
        /// "already defined" or "not defined".
        problem: &'static str,
    },

    /// An id allocator ran out of its 32-bit space.
    #[error("id space exhausted")]
    IdExhausted,
}

impl TcError {
    /// Creates a socket-level error.
    pub fn socket(operation: &'static str, source: io::Error) -> Self {
        TcError::Socket { operation, source }
    }

    /// Creates a kernel-rejection error.
    pub fn rejected(operation: impl Into<String>, errno: i32) -> Self {
        TcError::Rejected {
            operation: operation.into(),
            errno,
        }
    }

    /// Creates a missing-interface error.
    pub fn no_if(name: impl Into<String>) -> Self {
        TcError::NoIf { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = TcError::no_if("vx-7");
        assert_eq!(err.to_string(), "no such interface: vx-7");

        let err = TcError::rejected("add flower filter on eth0", -17);
        assert!(err.to_string().contains("errno -17"));
    }
}
