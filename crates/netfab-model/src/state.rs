//! Per-object lifecycle states and their transitions.
//!
//! Every graph object carries a [`State`] that records how its
//! in-memory definition relates to the configuration last realized in
//! the kernel. The commit engine is a pure function of these states:
//!
//! ```text
//! New ──────────────► Ok ◄──────────┐
//!  │                   │            │ (recommit)
//!  │                   ▼            │
//!  │                 Renew ─────────┘
//!  │                   │
//!  └──────────────► Delete
//! ```
//!
//! `Delete` is terminal; an object slated for deletion is never
//! promoted back.

/// Lifecycle state of a graph object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created in memory, never committed.
    New,
    /// Committed and unchanged since.
    Ok,
    /// Committed, but must be torn down and rebuilt.
    Renew,
    /// Removal requested; awaits the decommit sweep.
    Delete,
}

impl State {
    /// Marks a committed object as needing reconstruction.
    ///
    /// A `New` object has nothing to tear down, so this only moves
    /// `Ok` to `Renew`.
    ///
    /// # Panics
    ///
    /// Panics on a `Delete` object; mutating an object after freeing it
    /// is a caller bug.
    pub fn renew(&mut self) {
        assert!(*self != State::Delete, "mutating a deleted object");
        if *self == State::Ok {
            *self = State::Renew;
        }
    }

    /// Propagates a renewal across a dependency edge: if the owner is
    /// being renewed and this object is settled, it must be renewed
    /// too.
    pub fn propagate_from(&mut self, from: State) {
        if from == State::Renew && *self == State::Ok {
            *self = State::Renew;
        }
    }

    /// Settles the state after a successful (re)commit.
    pub fn ack(&mut self) {
        if *self == State::New || *self == State::Renew {
            *self = State::Ok;
        }
    }

    /// Consumes the decommit obligation.
    ///
    /// Returns true when the object's kernel state must be torn down.
    /// A `Renew` object additionally becomes `New`, queueing it for
    /// the recommit pass of the same commit.
    pub fn ack_uncommit(&mut self) -> bool {
        match *self {
            State::Delete => true,
            State::Renew => {
                *self = State::New;
                true
            }
            _ => false,
        }
    }

    /// Whether validation applies: only objects that the next commit
    /// will actually (re)create are validated.
    pub fn pending(&self) -> bool {
        matches!(self, State::New | State::Renew)
    }

    /// Whether the object is going away on the next commit.
    pub fn deleted(&self) -> bool {
        *self == State::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew() {
        let mut state = State::New;
        state.renew();
        assert_eq!(state, State::New);

        let mut state = State::Ok;
        state.renew();
        assert_eq!(state, State::Renew);

        state.renew();
        assert_eq!(state, State::Renew);
    }

    #[test]
    #[should_panic(expected = "deleted object")]
    fn test_renew_deleted_panics() {
        let mut state = State::Delete;
        state.renew();
    }

    #[test]
    fn test_propagate() {
        let mut state = State::Ok;
        state.propagate_from(State::Renew);
        assert_eq!(state, State::Renew);

        let mut state = State::New;
        state.propagate_from(State::Renew);
        assert_eq!(state, State::New);

        let mut state = State::Ok;
        state.propagate_from(State::Ok);
        assert_eq!(state, State::Ok);
    }

    #[test]
    fn test_ack() {
        let mut state = State::New;
        state.ack();
        assert_eq!(state, State::Ok);

        let mut state = State::Renew;
        state.ack();
        assert_eq!(state, State::Ok);

        let mut state = State::Delete;
        state.ack();
        assert_eq!(state, State::Delete);
    }

    #[test]
    fn test_ack_uncommit() {
        let mut state = State::Ok;
        assert!(!state.ack_uncommit());
        assert_eq!(state, State::Ok);

        let mut state = State::New;
        assert!(!state.ack_uncommit());

        let mut state = State::Renew;
        assert!(state.ack_uncommit());
        assert_eq!(state, State::New);

        let mut state = State::Delete;
        assert!(state.ack_uncommit());
        assert_eq!(state, State::Delete);
    }
}
