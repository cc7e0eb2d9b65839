//! Broadcast fan-out: action lists longer than one filter can hold.
//!
//! The kernel caps a filter's action list at `TCA_ACT_MAX_PRIO` (32)
//! entries, so a broadcast object spreads its actions over a chain of
//! match-all filters. The last slot of every filter is reserved for a
//! continue action that sends the packet on to the next filter in the
//! chain.

use crate::tc::{ActionDesc, ActionSpec, FilterLocation, FlowerSpec, TcSink};
use crate::TcResult;
use tracing::debug;

/// Kernel limit on actions per filter (TCA_ACT_MAX_PRIO).
pub const MAX_FILTER_ACTIONS: usize = 32;

/// Capacity left for real actions once the continue slot is reserved.
const FILTER_CAPACITY: usize = MAX_FILTER_ACTIONS - 1;

/// Handle identifying one action list member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastHandle(u32);

struct BcastFilter {
    prio: u16,
    used: usize,
    /// Whether the installed filter currently ends with a continue.
    chained: bool,
    actions: Vec<(u32, ActionDesc)>,
}

/// An arbitrarily long list of actions applied to every packet reaching
/// one interface hook, realized as a chain of match-all filters.
pub struct Broadcast {
    ifindex: u32,
    parent: u32,
    chain: u32,
    free_prio: u16,
    next_id: u32,
    filters: Vec<BcastFilter>,
}

impl Broadcast {
    /// Creates an empty broadcast chain starting at `first_prio`.
    pub fn new(ifindex: u32, parent: u32, chain: u32, first_prio: u16) -> Self {
        Broadcast {
            ifindex,
            parent,
            chain,
            free_prio: first_prio,
            next_id: 1,
            filters: Vec::new(),
        }
    }

    fn location(&self, prio: u16) -> FilterLocation {
        FilterLocation {
            ifindex: self.ifindex,
            parent: self.parent,
            chain: self.chain,
            prio,
            // One match-all filter per priority; a fixed handle is
            // unambiguous.
            handle: 1,
        }
    }

    fn install(&self, sink: &mut dyn TcSink, index: usize) -> TcResult<()> {
        let filter = &self.filters[index];
        let mut actions: Vec<ActionSpec> = Vec::new();
        for (_, desc) in &filter.actions {
            desc.emit(&mut actions);
        }
        if filter.chained {
            actions.push(ActionSpec::Continue);
        }
        sink.install(&FlowerSpec {
            loc: self.location(filter.prio),
            key: None,
            actions,
        })
    }

    /// Reinstalls filters whose continue slot no longer matches their
    /// position in the chain.
    fn fix_chaining(&mut self, sink: &mut dyn TcSink) -> TcResult<()> {
        let last = self.filters.len().saturating_sub(1);
        for index in 0..self.filters.len() {
            let chained = index != last;
            if self.filters[index].chained != chained {
                self.filters[index].chained = chained;
                self.install(sink, index)?;
            }
        }
        Ok(())
    }

    /// Appends an action list member.
    ///
    /// Picks the lowest-priority filter with room for `desc.size`
    /// actions, allocating a fresh filter at the end of the chain when
    /// none has.
    pub fn add(&mut self, sink: &mut dyn TcSink, desc: ActionDesc) -> TcResult<BroadcastHandle> {
        let id = self.next_id;
        self.next_id += 1;

        let size = desc.size;
        let index = match self
            .filters
            .iter()
            .position(|f| f.used + size <= FILTER_CAPACITY)
        {
            Some(index) => index,
            None => {
                let prio = self.free_prio;
                self.free_prio += 1;
                debug!(prio, "allocating broadcast filter");
                self.filters.push(BcastFilter {
                    prio,
                    used: 0,
                    chained: false,
                    actions: Vec::new(),
                });
                self.filters.len() - 1
            }
        };

        self.filters[index].used += size;
        self.filters[index].actions.push((id, desc));
        self.install(sink, index)?;
        self.fix_chaining(sink)?;
        Ok(BroadcastHandle(id))
    }

    /// Removes an action list member, reclaiming its filter if it was
    /// the last one there.
    pub fn remove(&mut self, sink: &mut dyn TcSink, handle: BroadcastHandle) -> TcResult<()> {
        let index = self
            .filters
            .iter()
            .position(|f| f.actions.iter().any(|(id, _)| *id == handle.0));
        let Some(index) = index else {
            return Ok(());
        };

        let filter = &mut self.filters[index];
        let slot = filter
            .actions
            .iter()
            .position(|(id, _)| *id == handle.0)
            .expect("present by the search above");
        let (_, desc) = filter.actions.remove(slot);
        filter.used -= desc.size;

        if filter.actions.is_empty() {
            let prio = filter.prio;
            self.filters.remove(index);
            sink.remove(&self.location(prio), "matchall")?;
        } else {
            self.install(sink, index)?;
        }
        self.fix_chaining(sink)
    }

    /// Tears the whole chain down.
    pub fn free(&mut self, sink: &mut dyn TcSink) -> TcResult<()> {
        for filter in std::mem::take(&mut self.filters) {
            sink.remove(&self.location(filter.prio), "matchall")?;
        }
        Ok(())
    }

    /// Number of filters currently backing the chain.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tc::{RecordingSink, CLSACT_EGRESS_PARENT};

    fn mirror(ifindex: u32) -> ActionDesc {
        ActionDesc::fixed(vec![ActionSpec::Mirror { ifindex }])
    }

    #[test]
    fn test_single_filter() {
        let mut sink = RecordingSink::new();
        let mut bc = Broadcast::new(7, CLSACT_EGRESS_PARENT, 0, 0x200);
        for i in 0..FILTER_CAPACITY as u32 {
            bc.add(&mut sink, mirror(i + 1)).unwrap();
        }
        assert_eq!(bc.filter_count(), 1);
        let live = sink.live();
        assert_eq!(live.len(), 1);
        // A lone filter has no continue action.
        assert_eq!(live[0].actions.len(), FILTER_CAPACITY);
    }

    #[test]
    fn test_overflow_allocates_second_filter() {
        let mut sink = RecordingSink::new();
        let mut bc = Broadcast::new(7, CLSACT_EGRESS_PARENT, 0, 0x200);
        let mut handles = Vec::new();
        for i in 0..(FILTER_CAPACITY as u32 + 9) {
            handles.push(bc.add(&mut sink, mirror(i + 1)).unwrap());
        }
        assert_eq!(bc.filter_count(), 2);

        let live = sink.live();
        assert_eq!(live.len(), 2);
        let first = live.iter().find(|s| s.loc.prio == 0x200).unwrap();
        let second = live.iter().find(|s| s.loc.prio == 0x201).unwrap();
        // The first filter chains to the second; the second terminates.
        assert_eq!(first.actions.len(), FILTER_CAPACITY + 1);
        assert_eq!(first.actions.last(), Some(&ActionSpec::Continue));
        assert_eq!(second.actions.len(), 9);
        assert_ne!(second.actions.last(), Some(&ActionSpec::Continue));
    }

    #[test]
    fn test_remove_reclaims_empty_filter() {
        let mut sink = RecordingSink::new();
        let mut bc = Broadcast::new(7, CLSACT_EGRESS_PARENT, 0, 0x200);
        let mut handles = Vec::new();
        for i in 0..(FILTER_CAPACITY as u32 + 1) {
            handles.push(bc.add(&mut sink, mirror(i + 1)).unwrap());
        }
        assert_eq!(bc.filter_count(), 2);

        // Drop the single action of the overflow filter.
        bc.remove(&mut sink, handles[FILTER_CAPACITY]).unwrap();
        assert_eq!(bc.filter_count(), 1);
        let live = sink.live();
        assert_eq!(live.len(), 1);
        // The survivor no longer chains anywhere.
        assert_ne!(live[0].actions.last(), Some(&ActionSpec::Continue));
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut sink = RecordingSink::new();
        let mut bc = Broadcast::new(7, CLSACT_EGRESS_PARENT, 0, 0x200);
        let mut handles = Vec::new();
        for i in 0..FILTER_CAPACITY as u32 {
            handles.push(bc.add(&mut sink, mirror(i + 1)).unwrap());
        }
        bc.remove(&mut sink, handles[3]).unwrap();
        bc.add(&mut sink, mirror(99)).unwrap();
        // The freed slot absorbed the new action; no second filter.
        assert_eq!(bc.filter_count(), 1);
    }

    #[test]
    fn test_wide_action_descriptors() {
        let mut sink = RecordingSink::new();
        let mut bc = Broadcast::new(7, CLSACT_EGRESS_PARENT, 0, 0x200);
        // Each member needs two action slots (tunnel_key set + redirect).
        let wide = || {
            ActionDesc::fixed(vec![
                ActionSpec::TunnelKeySet {
                    id: 1,
                    src: None,
                    dst: "10.0.0.2".parse::<netfab_types::IpAddress>().unwrap(),
                    dst_port: 4789,
                },
                ActionSpec::Redirect { ifindex: 9 },
            ])
        };
        for _ in 0..16 {
            bc.add(&mut sink, wide()).unwrap();
        }
        // 16 members x 2 actions = 32 > 31: spills into a second filter.
        assert_eq!(bc.filter_count(), 2);
    }

    #[test]
    fn test_free() {
        let mut sink = RecordingSink::new();
        let mut bc = Broadcast::new(7, CLSACT_EGRESS_PARENT, 0, 0x200);
        for i in 0..40u32 {
            bc.add(&mut sink, mirror(i + 1)).unwrap();
        }
        bc.free(&mut sink).unwrap();
        assert_eq!(bc.filter_count(), 0);
        assert!(sink.live().is_empty());
    }
}
