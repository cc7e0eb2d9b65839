//! Error codes returned by the model's public entry points.

use thiserror::Error;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, Error>;

/// Errors surfaced by graph mutations, validation and commit.
#[derive(Debug, Error)]
pub enum Error {
    /// An allocation-like resource (id space, capacity) was exhausted.
    #[error("out of memory")]
    NoMem,

    /// A unique name or attribute collided with an existing one.
    #[error("duplicate name: {name}")]
    Duplicate {
        /// The offending name.
        name: String,
    },

    /// An interface name did not resolve.
    #[error("no such interface: {name}")]
    NoIf {
        /// The interface name.
        name: String,
    },

    /// A netlink operation failed outside of commit.
    #[error("netlink failure")]
    Netlink(#[source] netfab_tc::TcError),

    /// Validation reported problems; the data plane was not touched.
    #[error("validation failed with {problems} problem(s)")]
    Validate {
        /// Number of problems delivered through the callback.
        problems: usize,
    },

    /// Problems arose after validation, during data-plane programming.
    #[error("commit failed with {problems} problem(s)")]
    Commit {
        /// Number of problems delivered through the callback.
        problems: usize,
    },
}

impl Error {
    /// Creates a duplicate-name error.
    pub fn duplicate(name: impl Into<String>) -> Self {
        Error::Duplicate { name: name.into() }
    }

    /// Creates a missing-interface error.
    pub fn no_if(name: impl Into<String>) -> Self {
        Error::NoIf { name: name.into() }
    }
}

impl From<netfab_tc::TcError> for Error {
    fn from(err: netfab_tc::TcError) -> Self {
        match err {
            netfab_tc::TcError::NoIf { name } => Error::NoIf { name },
            netfab_tc::TcError::IdExhausted => Error::NoMem,
            other => Error::Netlink(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::duplicate("left").to_string(), "duplicate name: left");
        assert_eq!(
            Error::Validate { problems: 2 }.to_string(),
            "validation failed with 2 problem(s)"
        );
    }

    #[test]
    fn test_tc_error_mapping() {
        let err: Error = netfab_tc::TcError::no_if("tap9").into();
        assert!(matches!(err, Error::NoIf { .. }));

        let err: Error = netfab_tc::TcError::IdExhausted.into();
        assert!(matches!(err, Error::NoMem));
    }
}
