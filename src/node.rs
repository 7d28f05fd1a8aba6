//! Drone node: per-node state and the six cooperative tasks (§4.5).
//!
//! Every task below is spawned once per node and loops until the executor
//! stops polling past `sim_time_s`. Because the scheduler only ever runs one
//! task at a time, state shared between a node's own tasks lives behind
//! plain `RefCell`/`Cell`, not a mutex; the one discipline that must hold is
//! that no borrow is ever kept alive across an `.await` point, since a
//! sibling task could run during that suspension and re-borrow the same
//! cell. Every handler below takes values out of its `RefCell`s before
//! awaiting anything.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use rand::Rng;
use rand::rngs::StdRng;

use crate::channel::WirelessChannel;
use crate::geometry::{Position, World};
use crate::message::{
    DataPayload, DvPayload, Envelope, HelloPayload, MessageKind, NodeId, SessionAckPayload,
    SessionId, SessionReqPayload,
};
use crate::metrics::Metrics;
use crate::neighbor::NeighborTable;
use crate::routing::RoutingTable;
use crate::runtime::{Queue, Spawner, VirtualClock};
use crate::sink::ObservationSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    None,
    PendingAck,
    Established,
}

struct SessionState {
    status: SessionStatus,
    session_id: SessionId,
}

struct Waypoint {
    target: Position,
    speed_mps: f64,
    pause_until: Option<u64>,
}

/// Task periods and MAC-adjacent constants a node needs, already converted
/// to microsecond ticks where the clock operates in ticks (§6).
#[derive(Debug, Clone, Copy)]
pub struct NodeTiming {
    pub hello_period_us: u64,
    pub dv_period_us: u64,
    pub app_send_period_us: u64,
    pub neighbor_timeout_us: u64,
    pub mobility_step_us: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct NodeParams {
    pub id: NodeId,
    pub num_nodes: usize,
    pub world: World,
    pub speed_mps: (f64, f64),
    pub waypoint_pause_us: (u64, u64),
    pub timing: NodeTiming,
    /// Initial TTL for originated SessionReq/SessionAck/Data, `>= diameter`
    /// (§4.2 "initial value >= network diameter (e.g., N)").
    pub ttl_init: u32,
    pub log_dv_changes: bool,
}

/// Shared per-node state plus the handles needed to talk to the rest of the
/// simulation. Held behind an `Rc` so all six tasks (and the orchestrator,
/// for snapshotting) can reach it without any single task owning it.
pub struct NodeCore {
    params: NodeParams,
    position: Rc<Cell<Position>>,
    waypoint: RefCell<Waypoint>,
    rt: RefCell<RoutingTable>,
    neighbors: RefCell<NeighborTable>,
    hello_seq: Cell<u32>,
    app_cursor: Cell<u32>,
    sessions: RefCell<HashMap<NodeId, SessionState>>,
    accepted_sessions: RefCell<HashSet<(NodeId, SessionId)>>,
    // Separate dedup sets per message kind: a SessionAck carries the same
    // (src, session_id) pair as its originating SessionReq (§4.2), so a
    // single shared set would see the Req's insert and then treat the Ack
    // for the same pair as already-seen, dropping it instead of relaying it
    // back toward src.
    seen_session_req: RefCell<HashSet<(NodeId, SessionId)>>,
    seen_session_ack: RefCell<HashSet<(NodeId, SessionId)>>,
    session_id_counter: Rc<Cell<u64>>,
    rx: Queue<Envelope>,
    rng: Rc<RefCell<StdRng>>,
    clock: VirtualClock,
    channel: WirelessChannel,
    metrics: Rc<RefCell<Metrics>>,
    sink: Rc<dyn ObservationSink>,
}

impl NodeCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: NodeParams,
        position: Rc<Cell<Position>>,
        rx: Queue<Envelope>,
        session_id_counter: Rc<Cell<u64>>,
        rng: Rc<RefCell<StdRng>>,
        clock: VirtualClock,
        channel: WirelessChannel,
        metrics: Rc<RefCell<Metrics>>,
        sink: Rc<dyn ObservationSink>,
    ) -> Rc<Self> {
        let waypoint = {
            let mut rng_mut = rng.borrow_mut();
            random_waypoint(&mut rng_mut, params.world, params.speed_mps)
        };
        let mut rt = RoutingTable::new(params.id);
        // §4.6: "initialize each node's RT with a self-entry." The table
        // never stores one by construction (§3, §4.4); this call is a
        // documented no-op kept so the build sequence matches the spec's
        // literal wording without RoutingTable special-casing its own id.
        let _ = rt.entry(params.id);

        Rc::new(NodeCore {
            params,
            position,
            waypoint: RefCell::new(waypoint),
            rt: RefCell::new(rt),
            neighbors: RefCell::new(NeighborTable::new()),
            hello_seq: Cell::new(0),
            app_cursor: Cell::new((params.id + 1) % params.num_nodes.max(1) as u32),
            sessions: RefCell::new(HashMap::new()),
            accepted_sessions: RefCell::new(HashSet::new()),
            seen_session_req: RefCell::new(HashSet::new()),
            seen_session_ack: RefCell::new(HashSet::new()),
            session_id_counter,
            rx,
            rng,
            clock,
            channel,
            metrics,
            sink,
        })
    }

    pub fn id(&self) -> NodeId {
        self.params.id
    }

    pub fn position(&self) -> Position {
        self.position.get()
    }

    /// Routing table rows for a snapshot consumer (§4.7).
    pub fn routing_rows(&self) -> Vec<(NodeId, Option<u32>, Option<NodeId>)> {
        self.rt
            .borrow()
            .iter()
            .map(|(dst, e)| (dst, e.cost, e.cost.map(|_| e.next_hop)))
            .collect()
    }

    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.neighbors.borrow().ids()
    }

    pub fn clear_changed_flags(&self) {
        self.rt.borrow_mut().clear_changed_flags();
    }

    /// Force-relocate a node outside of its own mobility task. Only
    /// compiled for tests, to stage scenarios like "a neighbor moves out of
    /// range" without waiting out the waypoint RNG.
    #[cfg(test)]
    pub fn set_position_for_test(&self, position: Position) {
        self.position.set(position);
    }

    fn next_session_id(&self) -> SessionId {
        let id = self.session_id_counter.get();
        self.session_id_counter.set(id + 1);
        id
    }

    fn is_neighbor(&self, id: NodeId) -> bool {
        self.neighbors.borrow().contains(id)
    }

    fn envelope(&self, kind: MessageKind) -> Envelope {
        Envelope {
            sender_id: self.params.id,
            send_time: self.clock.now(),
            kind,
        }
    }

    /// Round-robin destination cycling (§4.5 App task, as resolved in
    /// `SPEC_FULL.md`: deterministic, not random). Skips self and any
    /// destination with a session already in flight or established.
    fn next_app_destination(&self) -> Option<NodeId> {
        let num_nodes = self.params.num_nodes as u32;
        if num_nodes <= 1 {
            return None;
        }
        let mut cursor = self.app_cursor.get();
        let mut result = None;
        for _ in 0..num_nodes {
            let candidate = cursor % num_nodes;
            cursor = (cursor + 1) % num_nodes;
            if candidate == self.params.id {
                continue;
            }
            let is_free = self
                .sessions
                .borrow()
                .get(&candidate)
                .map(|s| s.status == SessionStatus::None)
                .unwrap_or(true);
            if is_free {
                result = Some(candidate);
                break;
            }
        }
        self.app_cursor.set(cursor);
        result
    }
}

fn random_waypoint(rng: &mut StdRng, world: World, speed_mps: (f64, f64)) -> Waypoint {
    let (v_min, v_max) = speed_mps;
    Waypoint {
        target: Position::new(
            rng.gen_range(0.0..=world.width),
            rng.gen_range(0.0..=world.height),
        ),
        speed_mps: if v_min < v_max {
            rng.gen_range(v_min..v_max)
        } else {
            v_min
        },
        pause_until: None,
    }
}

/// Spawn all six protocol tasks for `core` onto `spawner` (§4.5).
pub fn spawn_node_tasks(core: Rc<NodeCore>, spawner: &Spawner) {
    spawner.spawn(mobility_task(core.clone()));
    spawner.spawn(hello_task(core.clone(), spawner.clone()));
    spawner.spawn(dv_task(core.clone(), spawner.clone()));
    spawner.spawn(app_task(core.clone(), spawner.clone()));
    spawner.spawn(receive_task(core.clone(), spawner.clone()));
    spawner.spawn(aging_task(core));
}

async fn mobility_task(core: Rc<NodeCore>) {
    let step_us = core.params.timing.mobility_step_us;
    let step_s = step_us as f64 / 1_000_000.0;
    loop {
        core.clock.sleep(step_us).await;
        let now = core.clock.now();

        let mut wp = core.waypoint.borrow_mut();
        if let Some(pause_until) = wp.pause_until {
            if now < pause_until {
                continue;
            }
            let (v_min, v_max) = core.params.speed_mps;
            let mut rng = core.rng.borrow_mut();
            wp.target = Position::new(
                rng.gen_range(0.0..=core.params.world.width),
                rng.gen_range(0.0..=core.params.world.height),
            );
            wp.speed_mps = if v_min < v_max {
                rng.gen_range(v_min..v_max)
            } else {
                v_min
            };
            wp.pause_until = None;
        }

        let current = core.position.get();
        let dx = wp.target.x - current.x;
        let dy = wp.target.y - current.y;
        let remaining = (dx * dx + dy * dy).sqrt();
        let move_dist = wp.speed_mps * step_s;

        let next = if remaining <= move_dist || remaining == 0.0 {
            let (p_min, p_max) = core.params.waypoint_pause_us;
            let pause = if p_min < p_max {
                core.rng.borrow_mut().gen_range(p_min..p_max)
            } else {
                p_min
            };
            wp.pause_until = Some(now + pause);
            wp.target
        } else {
            let ratio = move_dist / remaining;
            Position::new(current.x + dx * ratio, current.y + dy * ratio)
        };
        core.position.set(next.clamp_to(core.params.world));
    }
}

async fn hello_task(core: Rc<NodeCore>, spawner: Spawner) {
    loop {
        core.clock.sleep(core.params.timing.hello_period_us).await;
        let seq = core.hello_seq.get();
        core.hello_seq.set(seq + 1);
        let msg = core.envelope(MessageKind::Hello(HelloPayload {
            position: core.position.get(),
            seq,
        }));
        let (channel, id) = (core.channel.clone(), core.params.id);
        channel.broadcast(id, msg, &spawner).await;
    }
}

async fn dv_task(core: Rc<NodeCore>, spawner: Spawner) {
    loop {
        core.clock.sleep(core.params.timing.dv_period_us).await;
        // One-period-late garbage collection of poisoned routes, timed off
        // the same period the poison is meant to survive one of (§4.4).
        core.rt
            .borrow_mut()
            .gc_stale_infinite(core.clock.now(), core.params.timing.dv_period_us);

        let neighbors = core.neighbors.borrow().ids();
        for neighbor in neighbors {
            let vector = core.rt.borrow().export_to(neighbor);
            let msg = core.envelope(MessageKind::Dv(DvPayload { vector }));
            let (channel, id) = (core.channel.clone(), core.params.id);
            channel.broadcast(id, msg, &spawner).await;
        }
    }
}

async fn app_task(core: Rc<NodeCore>, spawner: Spawner) {
    loop {
        core.clock.sleep(core.params.timing.app_send_period_us).await;

        let Some(dst) = core.next_app_destination() else {
            continue;
        };
        let session_id = core.next_session_id();
        core.sessions.borrow_mut().insert(
            dst,
            SessionState {
                status: SessionStatus::PendingAck,
                session_id,
            },
        );

        let msg = core.envelope(MessageKind::SessionReq(SessionReqPayload {
            src: core.params.id,
            dst,
            session_id,
            ttl: core.params.ttl_init,
        }));
        {
            let (channel, id) = (core.channel.clone(), core.params.id);
            channel.broadcast(id, msg, &spawner).await;
        }

        // §3: "sessions expire if no ack arrives within an app period".
        let timeout_core = core.clone();
        let timeout_period = core.params.timing.app_send_period_us;
        spawner.spawn(async move {
            timeout_core.clock.sleep(timeout_period).await;
            let mut sessions = timeout_core.sessions.borrow_mut();
            if let Some(s) = sessions.get_mut(&dst) {
                if s.session_id == session_id && s.status == SessionStatus::PendingAck {
                    s.status = SessionStatus::None;
                }
            }
        });
    }
}

async fn receive_task(core: Rc<NodeCore>, spawner: Spawner) {
    loop {
        let envelope = core.rx.recv().await;
        let now = core.clock.now();
        let sender = envelope.sender_id;

        match envelope.kind {
            MessageKind::Hello(hello) => {
                let is_new = core
                    .neighbors
                    .borrow_mut()
                    .refresh(sender, hello.position, hello.seq, now);
                core.rt.borrow_mut().ensure_direct(sender, now);
                if is_new {
                    core.sink.on_neighbor_change(core.params.id, sender, true);
                }
            }

            MessageKind::Dv(dv) => {
                let changed = core.rt.borrow_mut().relax(sender, &dv.vector, now);
                if changed && core.params.log_dv_changes {
                    log::debug!(
                        "node {} relaxed DV from {} at t={}",
                        core.params.id,
                        sender,
                        now
                    );
                }
            }

            MessageKind::SessionReq(req) => {
                if req.dst == core.params.id {
                    let key = (req.src, req.session_id);
                    let already_accepted = core.accepted_sessions.borrow().contains(&key);
                    let route = core.rt.borrow().route(req.src, |n| core.is_neighbor(n));
                    if !already_accepted && route.is_some() {
                        core.accepted_sessions.borrow_mut().insert(key);
                        let ack = core.envelope(MessageKind::SessionAck(SessionAckPayload {
                            src: req.src,
                            dst: req.dst,
                            session_id: req.session_id,
                            ttl: core.params.ttl_init,
                        }));
                        let (channel, id) = (core.channel.clone(), core.params.id);
                        channel.broadcast(id, ack, &spawner).await;
                    }
                } else {
                    let key = (req.src, req.session_id);
                    let already_seen = !core.seen_session_req.borrow_mut().insert(key);
                    let ttl = req.ttl.saturating_sub(1);
                    if already_seen || ttl == 0 {
                        continue;
                    }
                    let has_route = core.rt.borrow().route(req.dst, |n| core.is_neighbor(n)).is_some();
                    if has_route {
                        let fwd = core.envelope(MessageKind::SessionReq(SessionReqPayload {
                            ttl,
                            ..req
                        }));
                        let (channel, id) = (core.channel.clone(), core.params.id);
                        channel.broadcast(id, fwd, &spawner).await;
                    }
                }
            }

            MessageKind::SessionAck(ack) => {
                if ack.src == core.params.id {
                    let established = {
                        let mut sessions = core.sessions.borrow_mut();
                        match sessions.get_mut(&ack.dst) {
                            Some(s) if s.session_id == ack.session_id && s.status == SessionStatus::PendingAck => {
                                s.status = SessionStatus::Established;
                                true
                            }
                            _ => false,
                        }
                    };
                    if established {
                        core.metrics.borrow_mut().record_attempt();
                        let data = core.envelope(MessageKind::Data(DataPayload {
                            src: core.params.id,
                            dst: ack.dst,
                            session_id: ack.session_id,
                            ttl: core.params.ttl_init,
                            path: vec![core.params.id],
                            origin_time: now,
                        }));
                        let (channel, id) = (core.channel.clone(), core.params.id);
                        channel.broadcast(id, data, &spawner).await;
                    }
                } else {
                    let key = (ack.src, ack.session_id);
                    let already_seen = !core.seen_session_ack.borrow_mut().insert(key);
                    let ttl = ack.ttl.saturating_sub(1);
                    if already_seen || ttl == 0 {
                        continue;
                    }
                    let has_route = core.rt.borrow().route(ack.src, |n| core.is_neighbor(n)).is_some();
                    if has_route {
                        let fwd = core.envelope(MessageKind::SessionAck(SessionAckPayload {
                            ttl,
                            ..ack
                        }));
                        let (channel, id) = (core.channel.clone(), core.params.id);
                        channel.broadcast(id, fwd, &spawner).await;
                    }
                }
            }

            MessageKind::Data(data) => {
                if data.dst == core.params.id {
                    let hops = data.path.len();
                    let latency_us = now.saturating_sub(data.origin_time);
                    core.metrics.borrow_mut().record_delivery(latency_us, hops);
                    core.sink.on_path(&data.path, now);
                } else {
                    if data.path.contains(&core.params.id) {
                        continue;
                    }
                    let ttl = data.ttl.saturating_sub(1);
                    let has_route = ttl > 0
                        && core.rt.borrow().route(data.dst, |n| core.is_neighbor(n)).is_some();
                    if has_route {
                        let mut path = data.path.clone();
                        path.push(core.params.id);
                        let fwd = core.envelope(MessageKind::Data(DataPayload {
                            ttl,
                            path,
                            ..data
                        }));
                        let (channel, id) = (core.channel.clone(), core.params.id);
                        channel.broadcast(id, fwd, &spawner).await;
                    }
                }
            }
        }
    }
}

async fn aging_task(core: Rc<NodeCore>) {
    let interval = (core.params.timing.neighbor_timeout_us / 2).max(1);
    loop {
        core.clock.sleep(interval).await;
        let now = core.clock.now();
        let removed = core
            .neighbors
            .borrow_mut()
            .age_out(now, core.params.timing.neighbor_timeout_us);
        if removed.is_empty() {
            continue;
        }
        let mut rt = core.rt.borrow_mut();
        for neighbor in removed {
            rt.poison_neighbor(neighbor, now);
            drop(rt);
            core.sink.on_neighbor_change(core.params.id, neighbor, false);
            rt = core.rt.borrow_mut();
        }
    }
}
