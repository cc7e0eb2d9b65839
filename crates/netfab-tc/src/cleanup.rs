//! Deferred-release registry for resources shared between owners.
//!
//! A registered entry carries a release closure and may be subscribed
//! to several channels. Flushing any channel unlinks the entry from all
//! of them and runs the closure exactly once. The vxlan drivers use
//! this for tunnel interfaces shared by several attachments: whichever
//! teardown path runs first releases the tunnel, the other finds the
//! entry gone.

use std::collections::HashMap;

/// Handle identifying one registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(u32);

struct Entry<C> {
    channels: Vec<usize>,
    release: Box<dyn FnOnce(&mut C)>,
}

/// Registry of pending release closures, organized into channels.
///
/// `C` is the context handed to closures at flush time (for the
/// drivers, the kernel link API).
pub struct CleanupRegistry<C> {
    next: u32,
    entries: HashMap<CleanupId, Entry<C>>,
    channels: Vec<Vec<CleanupId>>,
}

impl<C> CleanupRegistry<C> {
    /// Creates a registry with `channel_count` channels.
    pub fn new(channel_count: usize) -> Self {
        CleanupRegistry {
            next: 1,
            entries: HashMap::new(),
            channels: vec![Vec::new(); channel_count],
        }
    }

    /// Registers a release closure, initially subscribed nowhere.
    pub fn register(&mut self, release: impl FnOnce(&mut C) + 'static) -> CleanupId {
        let id = CleanupId(self.next);
        self.next += 1;
        self.entries.insert(
            id,
            Entry {
                channels: Vec::new(),
                release: Box::new(release),
            },
        );
        id
    }

    /// Subscribes an entry to a channel.
    ///
    /// # Panics
    ///
    /// Panics on an unknown id or an out-of-range channel; both are
    /// caller bugs.
    pub fn subscribe(&mut self, channel: usize, id: CleanupId) {
        let entry = self.entries.get_mut(&id).expect("unknown cleanup entry");
        assert!(channel < self.channels.len(), "no such cleanup channel");
        if !entry.channels.contains(&channel) {
            entry.channels.push(channel);
            self.channels[channel].push(id);
        }
    }

    /// Runs and removes every entry subscribed to `channel`.
    ///
    /// Entries are unlinked from all their channels before their
    /// closure runs, so each runs at most once no matter how many
    /// channels it was on.
    pub fn flush(&mut self, channel: usize, ctx: &mut C) {
        let pending = std::mem::take(&mut self.channels[channel]);
        for id in pending {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            for other in entry.channels {
                self.channels[other].retain(|linked| *linked != id);
            }
            (entry.release)(ctx);
        }
    }

    /// Drops an entry without running its closure.
    pub fn cancel(&mut self, id: CleanupId) {
        if let Some(entry) = self.entries.remove(&id) {
            for channel in entry.channels {
                self.channels[channel].retain(|linked| *linked != id);
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_flush_runs_subscribed() {
        let ran = Rc::new(RefCell::new(Vec::new()));
        let mut registry: CleanupRegistry<()> = CleanupRegistry::new(2);

        for label in ["a", "b"] {
            let ran = Rc::clone(&ran);
            let id = registry.register(move |_| ran.borrow_mut().push(label));
            registry.subscribe(0, id);
        }

        registry.flush(1, &mut ());
        assert!(ran.borrow().is_empty());

        registry.flush(0, &mut ());
        assert_eq!(*ran.borrow(), vec!["a", "b"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_multi_channel_runs_once() {
        let count = Rc::new(RefCell::new(0));
        let mut registry: CleanupRegistry<()> = CleanupRegistry::new(2);

        let counter = Rc::clone(&count);
        let id = registry.register(move |_| *counter.borrow_mut() += 1);
        registry.subscribe(0, id);
        registry.subscribe(1, id);

        registry.flush(0, &mut ());
        registry.flush(1, &mut ());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_cancel() {
        let count = Rc::new(RefCell::new(0));
        let mut registry: CleanupRegistry<()> = CleanupRegistry::new(1);

        let counter = Rc::clone(&count);
        let id = registry.register(move |_| *counter.borrow_mut() += 1);
        registry.subscribe(0, id);
        registry.cancel(id);

        registry.flush(0, &mut ());
        assert_eq!(*count.borrow(), 0);
    }
}
