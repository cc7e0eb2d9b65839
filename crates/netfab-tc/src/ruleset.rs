//! Priority-slotted classifier chains.
//!
//! A ruleset owns a contiguous range of TC priorities on one interface
//! hook. Within the range, priority slots are declared with a fixed set
//! of match targets and masks; rules in a slot differ only in their
//! masked key and subpriority. All rules sharing a masked key are
//! aggregated into a single flower filter, which keeps the number of
//! kernel filters proportional to the number of distinct keys, not
//! rules.
//!
//! Valid slot contents:
//!
//! ```text
//! 1.0: dst_ip ~ 192.168.0.0/16
//! 1.0: dst_ip ~ 127.0.0.0/16      (same mask, different key)
//! 1.1: dst_ip ~ 192.168.0.0/16    (same key, different subprio)
//! ```
//!
//! Rejected: a differing mask within a slot, or an exact duplicate of
//! `(masked key, subprio)`.

use crate::idalloc::IdAllocator;
use crate::tc::{
    ActionDesc, ActionSpec, FilterLocation, FlowerKey, FlowerSpec, MatchValue, RuleTarget, TcSink,
    MAX_MATCHES,
};
use crate::{TcError, TcResult};
use std::collections::{BTreeMap, HashMap};

/// Handle identifying one rule inside a [`Ruleset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHandle {
    prio: u16,
    key: [MatchValue; MAX_MATCHES],
    subprio: u32,
}

impl RuleHandle {
    /// The slot this rule lives in.
    pub fn prio(&self) -> u16 {
        self.prio
    }

    /// The masked key of the rule.
    pub fn key(&self) -> &[MatchValue; MAX_MATCHES] {
        &self.key
    }
}

struct FlowerEntry {
    /// Filter handle allocated from the slot's id space.
    handle: u32,
    /// Sources combined into this filter, ordered by subpriority.
    sources: BTreeMap<u32, ActionDesc>,
}

struct PrioSlot {
    targets: [RuleTarget; MAX_MATCHES],
    masks: [MatchValue; MAX_MATCHES],
    handles: IdAllocator,
    flowers: HashMap<[MatchValue; MAX_MATCHES], FlowerEntry>,
}

/// A set of rules organized by priority and subpriority, materialized
/// as a chain of flower filters.
pub struct Ruleset {
    ifindex: u32,
    parent: u32,
    chain: u32,
    prio_start: u16,
    prio_count: u16,
    slots: BTreeMap<u16, PrioSlot>,
}

impl Ruleset {
    /// Creates a ruleset over `prio_count` priorities starting at
    /// `prio_start` on the given interface hook.
    pub fn new(ifindex: u32, parent: u32, chain: u32, prio_start: u16, prio_count: u16) -> Self {
        Ruleset {
            ifindex,
            parent,
            chain,
            prio_start,
            prio_count,
            slots: BTreeMap::new(),
        }
    }

    fn location(&self, prio: u16, handle: u32) -> FilterLocation {
        FilterLocation {
            ifindex: self.ifindex,
            parent: self.parent,
            chain: self.chain,
            prio: self.prio_start + prio,
            handle,
        }
    }

    /// Declares a priority slot matching `targets` under `masks`.
    ///
    /// Declaring the same slot twice with identical targets and masks is
    /// a no-op; differing declarations are rejected with
    /// [`TcError::TargetMismatch`]. Fields that do not support masking
    /// must use [`MatchValue::EXACT`].
    pub fn define_prio(
        &mut self,
        prio: u16,
        targets: [RuleTarget; MAX_MATCHES],
        masks: [MatchValue; MAX_MATCHES],
    ) -> TcResult<()> {
        if prio >= self.prio_count {
            return Err(TcError::BadPrio {
                prio,
                problem: "out of range",
            });
        }
        for i in 0..MAX_MATCHES {
            if targets[i] == RuleTarget::None {
                continue;
            }
            if !targets[i].supports_masking() && masks[i] != MatchValue::EXACT {
                return Err(TcError::TargetMismatch);
            }
        }
        if let Some(slot) = self.slots.get(&prio) {
            if slot.targets != targets || slot.masks != masks {
                return Err(TcError::TargetMismatch);
            }
            return Ok(());
        }
        self.slots.insert(
            prio,
            PrioSlot {
                targets,
                masks,
                handles: IdAllocator::new(1, u32::MAX),
                flowers: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Returns true if `prio` has been declared.
    pub fn has_prio(&self, prio: u16) -> bool {
        self.slots.contains_key(&prio)
    }

    fn install_entry(
        &self,
        sink: &mut dyn TcSink,
        prio: u16,
        key: &[MatchValue; MAX_MATCHES],
        entry: &FlowerEntry,
    ) -> TcResult<()> {
        let slot = &self.slots[&prio];
        let mut actions: Vec<ActionSpec> = Vec::new();
        for desc in entry.sources.values() {
            desc.emit(&mut actions);
        }
        sink.install(&FlowerSpec {
            loc: self.location(prio, entry.handle),
            key: Some(FlowerKey {
                targets: slot.targets,
                masks: slot.masks,
                values: *key,
            }),
            actions,
        })
    }

    /// Adds a rule to slot `prio`.
    ///
    /// The key is masked with the slot's masks before aggregation. The
    /// rule's actions join the flower filter for the masked key, ordered
    /// by `subprio`.
    ///
    /// # Errors
    ///
    /// [`TcError::BadPrio`] for an undeclared slot and
    /// [`TcError::Duplicate`] when `(masked key, subprio)` is already
    /// present.
    pub fn add_rule(
        &mut self,
        sink: &mut dyn TcSink,
        prio: u16,
        values: [MatchValue; MAX_MATCHES],
        subprio: u32,
        action: ActionDesc,
    ) -> TcResult<RuleHandle> {
        let slot = self.slots.get_mut(&prio).ok_or(TcError::BadPrio {
            prio,
            problem: "not defined",
        })?;

        let mut key = [MatchValue::ZERO; MAX_MATCHES];
        for i in 0..MAX_MATCHES {
            key[i] = values[i].masked(&slot.masks[i]);
        }

        if let Some(entry) = slot.flowers.get_mut(&key) {
            if entry.sources.contains_key(&subprio) {
                return Err(TcError::Duplicate);
            }
            entry.sources.insert(subprio, action);
        } else {
            let handle = slot.handles.allocate()?;
            let mut sources = BTreeMap::new();
            sources.insert(subprio, action);
            slot.flowers.insert(key, FlowerEntry { handle, sources });
        }

        let entry = &self.slots[&prio].flowers[&key];
        self.install_entry(sink, prio, &key, entry)?;
        Ok(RuleHandle { prio, key, subprio })
    }

    /// Removes a rule. When the last rule of a flower aggregate goes,
    /// the kernel filter is removed and its handle returned to the
    /// slot's allocator.
    pub fn remove_rule(&mut self, sink: &mut dyn TcSink, rule: &RuleHandle) -> TcResult<()> {
        let emptied = {
            let slot = self.slots.get_mut(&rule.prio).ok_or(TcError::BadPrio {
                prio: rule.prio,
                problem: "not defined",
            })?;
            let entry = slot.flowers.get_mut(&rule.key).ok_or(TcError::BadPrio {
                prio: rule.prio,
                problem: "not defined",
            })?;
            entry.sources.remove(&rule.subprio);
            if entry.sources.is_empty() {
                let handle = entry.handle;
                slot.flowers.remove(&rule.key);
                slot.handles.release(handle);
                Some(handle)
            } else {
                None
            }
        };

        match emptied {
            Some(handle) => sink.remove(&self.location(rule.prio, handle), "flower"),
            None => {
                let entry = &self.slots[&rule.prio].flowers[&rule.key];
                self.install_entry(sink, rule.prio, &rule.key, entry)
            }
        }
    }

    /// Removes a slot and every filter in it.
    pub fn remove_prio(&mut self, sink: &mut dyn TcSink, prio: u16) -> TcResult<()> {
        let slot = self.slots.remove(&prio).ok_or(TcError::BadPrio {
            prio,
            problem: "not defined",
        })?;
        for entry in slot.flowers.values() {
            sink.remove(&self.location(prio, entry.handle), "flower")?;
        }
        Ok(())
    }

    /// Tears down every filter the ruleset installed.
    pub fn free(&mut self, sink: &mut dyn TcSink) -> TcResult<()> {
        let prios: Vec<u16> = self.slots.keys().copied().collect();
        for prio in prios {
            self.remove_prio(sink, prio)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tc::{RecordingSink, SinkOp};
    use netfab_types::MacAddress;

    fn mac(s: &str) -> MatchValue {
        MatchValue::from_mac(s.parse::<MacAddress>().unwrap())
    }

    fn dst_mac_slot(rs: &mut Ruleset) {
        rs.define_prio(
            0,
            [RuleTarget::DstMac, RuleTarget::None],
            [MatchValue::EXACT, MatchValue::ZERO],
        )
        .unwrap();
    }

    fn redirect(ifindex: u32) -> ActionDesc {
        ActionDesc::fixed(vec![ActionSpec::Redirect { ifindex }])
    }

    #[test]
    fn test_rules_aggregate_by_key() {
        let mut sink = RecordingSink::new();
        let mut rs = Ruleset::new(10, crate::tc::CLSACT_EGRESS_PARENT, 0, 0x100, 8);
        dst_mac_slot(&mut rs);

        rs.add_rule(&mut sink, 0, [mac("02:00:00:00:00:01"), MatchValue::ZERO], 0, redirect(4))
            .unwrap();
        rs.add_rule(&mut sink, 0, [mac("02:00:00:00:00:01"), MatchValue::ZERO], 1, redirect(5))
            .unwrap();

        // Same masked key: one filter, reinstalled with both actions.
        let live = sink.live();
        assert_eq!(live.len(), 1);
        assert_eq!(
            live[0].actions,
            vec![
                ActionSpec::Redirect { ifindex: 4 },
                ActionSpec::Redirect { ifindex: 5 }
            ]
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut sink = RecordingSink::new();
        let mut rs = Ruleset::new(10, crate::tc::CLSACT_EGRESS_PARENT, 0, 0x100, 8);
        dst_mac_slot(&mut rs);

        let key = [mac("02:00:00:00:00:01"), MatchValue::ZERO];
        rs.add_rule(&mut sink, 0, key, 0, redirect(4)).unwrap();
        let err = rs.add_rule(&mut sink, 0, key, 0, redirect(5)).unwrap_err();
        assert!(matches!(err, TcError::Duplicate));
    }

    #[test]
    fn test_distinct_keys_get_distinct_handles() {
        let mut sink = RecordingSink::new();
        let mut rs = Ruleset::new(10, crate::tc::CLSACT_EGRESS_PARENT, 0, 0x100, 8);
        dst_mac_slot(&mut rs);

        let a = rs
            .add_rule(&mut sink, 0, [mac("02:00:00:00:00:01"), MatchValue::ZERO], 0, redirect(4))
            .unwrap();
        let b = rs
            .add_rule(&mut sink, 0, [mac("02:00:00:00:00:02"), MatchValue::ZERO], 0, redirect(5))
            .unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(sink.live().len(), 2);
        let handles: Vec<u32> = sink.live().iter().map(|s| s.loc.handle).collect();
        assert_ne!(handles[0], handles[1]);
    }

    #[test]
    fn test_slot_redeclaration() {
        let mut rs = Ruleset::new(10, crate::tc::CLSACT_EGRESS_PARENT, 0, 0x100, 8);
        dst_mac_slot(&mut rs);
        // Identical declaration is fine.
        dst_mac_slot(&mut rs);
        // A differing mask set is not.
        let err = rs
            .define_prio(
                0,
                [RuleTarget::DstMac, RuleTarget::None],
                [MatchValue::ZERO, MatchValue::ZERO],
            )
            .unwrap_err();
        assert!(matches!(err, TcError::TargetMismatch));
    }

    #[test]
    fn test_remove_releases_filter() {
        let mut sink = RecordingSink::new();
        let mut rs = Ruleset::new(10, crate::tc::CLSACT_EGRESS_PARENT, 0, 0x100, 8);
        dst_mac_slot(&mut rs);

        let rule = rs
            .add_rule(&mut sink, 0, [mac("02:00:00:00:00:01"), MatchValue::ZERO], 0, redirect(4))
            .unwrap();
        rs.remove_rule(&mut sink, &rule).unwrap();
        assert!(sink.live().is_empty());
        assert!(matches!(sink.ops.last(), Some(SinkOp::Remove(_))));
    }

    #[test]
    fn test_mask_applied_before_aggregation() {
        let mut sink = RecordingSink::new();
        let mut rs = Ruleset::new(10, crate::tc::CLSACT_EGRESS_PARENT, 0, 0x100, 8);
        rs.define_prio(
            1,
            [RuleTarget::DstMac, RuleTarget::None],
            [
                MatchValue::from_mac(MacAddress::MULTICAST_MASK),
                MatchValue::ZERO,
            ],
        )
        .unwrap();

        // Two multicast addresses collapse onto the same masked key.
        rs.add_rule(&mut sink, 1, [mac("01:00:5e:00:00:01"), MatchValue::ZERO], 0, redirect(4))
            .unwrap();
        let err = rs
            .add_rule(&mut sink, 1, [mac("01:00:5e:00:00:02"), MatchValue::ZERO], 0, redirect(5))
            .unwrap_err();
        assert!(matches!(err, TcError::Duplicate));
        assert_eq!(sink.live().len(), 1);
    }
}
