//! Distance-vector routing engine.
//!
//! Destinations beyond `MAX_HOPS` are folded into the `∞` sentinel
//! (`cost: None`) both internally and on the wire, where `∞` is encoded as
//! [`INF_WIRE`] so it can travel inside a plain `HashMap<NodeId, u32>` DV
//! payload. The table never holds an entry keyed by its own id:
//! `cost(self->self) = 0` is implicit and is never advertised, settled by
//! construction rather than by a runtime check.

use std::collections::HashMap;

use crate::message::NodeId;

/// Hop-count ceiling; costs above this are treated as unreachable.
pub const MAX_HOPS: u32 = 16;

/// Wire encoding of "unreachable" in a DV vector.
pub const INF_WIRE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    pub cost: Option<u32>,
    pub next_hop: NodeId,
    pub last_update: u64,
    pub changed_recently: bool,
}

#[derive(Debug)]
pub struct RoutingTable {
    self_id: NodeId,
    entries: HashMap<NodeId, RouteEntry>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId) -> Self {
        RoutingTable {
            self_id,
            entries: HashMap::new(),
        }
    }

    pub fn entry(&self, dst: NodeId) -> Option<&RouteEntry> {
        self.entries.get(&dst)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &RouteEntry)> {
        self.entries.iter().map(|(&id, e)| (id, e))
    }

    /// Next-hop lookup. Returns `None` unless the route is finite *and* its
    /// next hop is still a current neighbor.
    pub fn route(&self, dst: NodeId, is_neighbor: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        if dst == self.self_id {
            return Some(self.self_id);
        }
        let entry = self.entries.get(&dst)?;
        entry.cost?;
        is_neighbor(entry.next_hop).then_some(entry.next_hop)
    }

    /// Invoked on Hello receipt: install or refresh a direct 1-hop route.
    pub fn ensure_direct(&mut self, neighbor: NodeId, now: u64) {
        match self.entries.get_mut(&neighbor) {
            Some(e) if e.cost.is_some_and(|c| c <= 1) => {
                e.last_update = now;
            }
            _ => {
                self.entries.insert(
                    neighbor,
                    RouteEntry {
                        cost: Some(1),
                        next_hop: neighbor,
                        last_update: now,
                        changed_recently: true,
                    },
                );
            }
        }
    }

    /// Bellman-Ford relaxation step on a received (already split-horizon
    /// exported) DV vector. Returns `true` if any entry changed.
    pub fn relax(&mut self, from: NodeId, vector: &HashMap<NodeId, u32>, now: u64) -> bool {
        let mut changed = false;
        for (&dest, &wire_cost) in vector {
            if dest == self.self_id {
                continue;
            }
            let candidate = if wire_cost == INF_WIRE {
                None
            } else {
                let bumped = wire_cost.saturating_add(1);
                (bumped <= MAX_HOPS).then_some(bumped)
            };

            let should_replace = match self.entries.get(&dest) {
                None => true,
                Some(existing) => {
                    let strictly_better = match (candidate, existing.cost) {
                        (Some(c1), Some(c2)) => c1 < c2,
                        (Some(_), None) => true,
                        _ => false,
                    };
                    let update_from_current_next_hop =
                        existing.next_hop == from && candidate != existing.cost;
                    strictly_better || update_from_current_next_hop
                }
            };

            if should_replace {
                self.entries.insert(
                    dest,
                    RouteEntry {
                        cost: candidate,
                        next_hop: from,
                        last_update: now,
                        changed_recently: true,
                    },
                );
                changed = true;
            }
        }
        changed
    }

    /// Poison every route whose next hop was `neighbor` (called after
    /// `NeighborTable::age_out` removes it). Poisoned entries are kept
    /// around (not removed) for `gc_stale_infinite` to reap one period
    /// later, so the `∞` has time to propagate outward.
    pub fn poison_neighbor(&mut self, neighbor: NodeId, now: u64) {
        for entry in self.entries.values_mut() {
            if entry.next_hop == neighbor && entry.cost.is_some() {
                entry.cost = None;
                entry.last_update = now;
                entry.changed_recently = true;
            }
        }
    }

    /// Garbage-collect `∞` entries older than `min_age`, so a poisoned
    /// route isn't kept forever after it has had a chance to propagate:
    /// it persists for one advertisement period before being eligible
    /// for collection.
    pub fn gc_stale_infinite(&mut self, now: u64, min_age: u64) {
        self.entries
            .retain(|_, e| e.cost.is_some() || now.saturating_sub(e.last_update) <= min_age);
    }

    /// Split-horizon / poisoned-reverse export for a specific neighbor:
    /// entries whose installed next hop is that neighbor are advertised as
    /// `∞` to suppress two-node loops. Unreachable
    /// destinations are still included as `∞` so withdrawals propagate.
    pub fn export_to(&self, neighbor: NodeId) -> HashMap<NodeId, u32> {
        self.entries
            .iter()
            .map(|(&dest, entry)| {
                let wire_cost = if entry.next_hop == neighbor {
                    INF_WIRE
                } else {
                    entry.cost.unwrap_or(INF_WIRE)
                };
                (dest, wire_cost)
            })
            .collect()
    }

    /// Clear every `changed_recently` flag (called once per reporting
    /// period by the orchestrator, after snapshotting for the sink).
    pub fn clear_changed_flags(&mut self) {
        for entry in self.entries.values_mut() {
            entry.changed_recently = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_direct_installs_a_one_hop_route() {
        let mut rt = RoutingTable::new(0);
        rt.ensure_direct(1, 10);
        let e = rt.entry(1).unwrap();
        assert_eq!(e.cost, Some(1));
        assert_eq!(e.next_hop, 1);
    }

    #[test]
    fn relax_installs_strictly_better_route() {
        let mut rt = RoutingTable::new(0);
        let mut v = HashMap::new();
        v.insert(2u32, 1); // advertiser is at cost 1 from neighbor 1 to dest 2
        assert!(rt.relax(1, &v, 10));
        let e = rt.entry(2).unwrap();
        assert_eq!(e.cost, Some(2));
        assert_eq!(e.next_hop, 1);
    }

    #[test]
    fn relax_skips_self_destination() {
        let mut rt = RoutingTable::new(0);
        let mut v = HashMap::new();
        v.insert(0u32, 3);
        assert!(!rt.relax(1, &v, 10));
        assert!(rt.entry(0).is_none());
    }

    #[test]
    fn relax_beyond_max_hops_becomes_infinite() {
        let mut rt = RoutingTable::new(0);
        let mut v = HashMap::new();
        v.insert(9u32, MAX_HOPS); // candidate = MAX_HOPS + 1, over the ceiling
        assert!(rt.relax(1, &v, 10));
        assert_eq!(rt.entry(9).unwrap().cost, None);
    }

    #[test]
    fn relax_hysteresis_keeps_existing_entry_on_tie() {
        let mut rt = RoutingTable::new(0);
        let mut v1 = HashMap::new();
        v1.insert(2u32, 1);
        rt.relax(1, &v1, 10);

        let mut v2 = HashMap::new();
        v2.insert(2u32, 1); // neighbor 3 offers the same resulting cost (2)
        let changed = rt.relax(3, &v2, 20);
        assert!(!changed);
        assert_eq!(rt.entry(2).unwrap().next_hop, 1);
    }

    #[test]
    fn relax_accepts_an_increase_from_the_current_next_hop() {
        let mut rt = RoutingTable::new(0);
        let mut v1 = HashMap::new();
        v1.insert(2u32, 1);
        rt.relax(1, &v1, 10);

        let mut v2 = HashMap::new();
        v2.insert(2u32, 5); // same advertiser now reports a worse cost
        let changed = rt.relax(1, &v2, 20);
        assert!(changed);
        assert_eq!(rt.entry(2).unwrap().cost, Some(6));
    }

    #[test]
    fn poison_neighbor_sets_infinite_cost_for_routes_through_it() {
        let mut rt = RoutingTable::new(0);
        rt.ensure_direct(1, 0);
        let mut v = HashMap::new();
        v.insert(2u32, 1);
        rt.relax(1, &v, 5);

        rt.poison_neighbor(1, 100);
        assert_eq!(rt.entry(1).unwrap().cost, None);
        assert_eq!(rt.entry(2).unwrap().cost, None);
    }

    #[test]
    fn gc_removes_infinite_entries_older_than_min_age() {
        let mut rt = RoutingTable::new(0);
        rt.ensure_direct(1, 0);
        rt.poison_neighbor(1, 0);
        rt.gc_stale_infinite(100, 50);
        assert!(rt.entry(1).is_none());
    }

    #[test]
    fn export_applies_split_horizon_poisoned_reverse() {
        let mut rt = RoutingTable::new(0);
        rt.ensure_direct(1, 0);
        let exported = rt.export_to(1);
        assert_eq!(exported.get(&1), Some(&INF_WIRE));
    }

    #[test]
    fn route_requires_next_hop_to_still_be_a_neighbor() {
        let mut rt = RoutingTable::new(0);
        rt.ensure_direct(1, 0);
        assert_eq!(rt.route(1, |_| true), Some(1));
        assert_eq!(rt.route(1, |_| false), None);
        assert_eq!(rt.route(0, |_| false), Some(0));
    }
}
