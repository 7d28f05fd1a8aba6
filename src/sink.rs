//! Observation sink interface.
//!
//! The core never waits on the sink and never throttles what it sends;
//! implementations (the external visualizer, a stat reporter) are expected
//! to return promptly — the renderer is free to aggregate, throttle, or
//! discard on its own side. Calls happen synchronously at points that are
//! already suspension-safe (inside receive dispatch, inside aging), never
//! from within a `Future::poll` that must stay non-blocking on its own
//! account.

use std::collections::HashMap;

use crate::geometry::Position;
use crate::message::NodeId;

/// One routing table row as reported to a snapshot consumer: `(dest,
/// cost_or_none, next_hop)`. `None` cost means the `∞` sentinel.
pub type RoutingRow = (NodeId, Option<u32>, Option<NodeId>);

pub trait ObservationSink {
    /// A DataMsg was delivered (or, per the resolved Open Question, merely
    /// relayed end-to-end along `path`); called once per delivery.
    fn on_path(&self, path: &[NodeId], time: u64);

    /// A neighbor entry was created (`added = true`) or aged out
    /// (`added = false`) at `node_id`.
    fn on_neighbor_change(&self, node_id: NodeId, neighbor_id: NodeId, added: bool);

    /// A full-state snapshot, emitted by the orchestrator at reporting
    /// boundaries for the external visualizer.
    fn on_snapshot(
        &self,
        time: u64,
        positions: &HashMap<NodeId, Position>,
        neighbor_sets: &HashMap<NodeId, Vec<NodeId>>,
        routing_tables: &HashMap<NodeId, Vec<RoutingRow>>,
    );
}

/// A sink that discards everything. Used when no observer is wired up
/// (e.g. a bare metrics-only run).
pub struct NullSink;

impl ObservationSink for NullSink {
    fn on_path(&self, _path: &[NodeId], _time: u64) {}
    fn on_neighbor_change(&self, _node_id: NodeId, _neighbor_id: NodeId, _added: bool) {}
    fn on_snapshot(
        &self,
        _time: u64,
        _positions: &HashMap<NodeId, Position>,
        _neighbor_sets: &HashMap<NodeId, Vec<NodeId>>,
        _routing_tables: &HashMap<NodeId, Vec<RoutingRow>>,
    ) {
    }
}
