//! Shared wireless medium: CSMA/CA-style MAC over a range-limited broadcast
//! medium.
//!
//! `broadcast` only ever suspends during the carrier-sense/backoff/reserve
//! steps; per-receiver delivery is handed off to detached one-shot tasks
//! spawned on the shared executor; so the caller always resumes as soon as
//! the reservation is made.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::Rng;
use rand::rngs::StdRng;

use crate::geometry::{Position, distance};
use crate::message::{Envelope, NodeId};
use crate::runtime::{Queue, Spawner, VirtualClock};

/// Cap on carrier-sense retries before a frame is dropped.
pub const MAC_BACKOFF_RETRY_LIMIT: u32 = 8;

/// Stand-in propagation constant `C`: no dedicated config key exists for it,
/// so it is fixed near the speed of light, making propagation delay
/// negligible next to the jitter term.
pub const PROPAGATION_MPS: f64 = 3.0e8;

#[derive(Debug, Clone, Copy)]
pub struct MacConfig {
    pub min_backoff_us: u64,
    pub max_backoff_us: u64,
    pub tx_duration_us: u64,
    pub comm_range_m: f64,
}

impl MacConfig {
    /// Jitter ceiling derived as a small fraction of the tx duration, since
    /// there is no separate `mac_jitter` config key.
    fn jitter_max_us(&self) -> u64 {
        (self.tx_duration_us / 10).max(1)
    }
}

#[derive(Clone)]
pub struct NodeHandle {
    pub id: NodeId,
    pub position: Rc<Cell<Position>>,
    pub rx: Queue<Envelope>,
}

struct ChannelInner {
    busy_until: u64,
}

/// Process-wide medium resource, scoped to one simulation run. Holds an
/// `Rc`, not a singleton, so a host can run independent simulations side by
/// side without shared state leaking between them.
#[derive(Clone)]
pub struct WirelessChannel {
    inner: Rc<RefCell<ChannelInner>>,
    nodes: Rc<Vec<NodeHandle>>,
    config: MacConfig,
    clock: VirtualClock,
    rng: Rc<RefCell<StdRng>>,
}

impl WirelessChannel {
    pub fn new(
        nodes: Rc<Vec<NodeHandle>>,
        config: MacConfig,
        clock: VirtualClock,
        rng: Rc<RefCell<StdRng>>,
    ) -> Self {
        WirelessChannel {
            inner: Rc::new(RefCell::new(ChannelInner { busy_until: 0 })),
            nodes,
            config,
            clock,
            rng,
        }
    }

    /// Best-effort broadcast; never fails. Frames lost to backoff-cap
    /// exhaustion or to being out of range are simply not delivered.
    pub async fn broadcast(&self, sender_id: NodeId, msg: Envelope, spawner: &Spawner) {
        let Some(reserved_at) = self.carrier_sense_and_reserve(sender_id).await else {
            log::warn!("node {} dropped a frame: MAC backoff cap exhausted", sender_id);
            return;
        };

        let sender_position = match self.nodes.iter().find(|n| n.id == sender_id) {
            Some(n) => n.position.get(),
            None => return,
        };

        for receiver in self.nodes.iter() {
            if receiver.id == sender_id {
                continue;
            }
            let d = distance(sender_position, receiver.position.get());
            if d > self.config.comm_range_m {
                continue;
            }

            let jitter = self.rng.borrow_mut().gen_range(0..=self.config.jitter_max_us());
            let prop_us = ((d / PROPAGATION_MPS) * 1_000_000.0) as u64 + jitter;
            let delay = self.config.tx_duration_us + prop_us;

            let clock = self.clock.clone();
            let rx = receiver.rx.clone();
            let envelope = msg.clone();
            spawner.spawn(async move {
                clock.sleep(delay).await;
                rx.send(envelope);
            });
        }
        let _ = reserved_at;
    }

    /// Carrier sense, random backoff, re-check, reserve. Returns the virtual
    /// tick the reservation was made at, or `None` if the retry cap was
    /// exhausted.
    async fn carrier_sense_and_reserve(&self, _sender_id: NodeId) -> Option<u64> {
        for _ in 0..MAC_BACKOFF_RETRY_LIMIT {
            let busy_until = self.inner.borrow().busy_until;
            let now = self.clock.now();
            if now < busy_until {
                self.clock.sleep(busy_until - now).await;
            }

            let backoff = self
                .rng
                .borrow_mut()
                .gen_range(self.config.min_backoff_us..=self.config.max_backoff_us);
            self.clock.sleep(backoff).await;

            let now = self.clock.now();
            let busy_until = self.inner.borrow().busy_until;
            if now < busy_until {
                continue;
            }

            let mut inner = self.inner.borrow_mut();
            inner.busy_until = now + self.config.tx_duration_us;
            return Some(now);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HelloPayload, MessageKind};
    use crate::runtime::Executor;
    use rand::SeedableRng;

    fn handle(id: NodeId, x: f64, y: f64) -> NodeHandle {
        NodeHandle {
            id,
            position: Rc::new(Cell::new(Position::new(x, y))),
            rx: Queue::new(),
        }
    }

    fn mac_config() -> MacConfig {
        MacConfig {
            min_backoff_us: 1_000,
            max_backoff_us: 2_000,
            tx_duration_us: 5_000,
            comm_range_m: 150.0,
        }
    }

    #[test]
    fn in_range_receiver_gets_the_frame_out_of_range_does_not() {
        let clock = VirtualClock::new();
        let executor = Executor::new(clock.clone());
        let spawner = Spawner::new(executor.clone());
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(1)));

        let near = handle(1, 50.0, 0.0);
        let far = handle(2, 1000.0, 0.0);
        let nodes = Rc::new(vec![handle(0, 0.0, 0.0), near.clone(), far.clone()]);

        let channel = WirelessChannel::new(nodes, mac_config(), clock.clone(), rng);

        let msg = Envelope {
            sender_id: 0,
            send_time: 0,
            kind: MessageKind::Hello(HelloPayload {
                position: Position::new(0.0, 0.0),
                seq: 1,
            }),
        };

        {
            let channel = channel.clone();
            let spawner2 = spawner.clone();
            spawner.spawn(async move { channel.broadcast(0, msg, &spawner2).await });
        }

        executor.run_to(1_000_000);

        assert_eq!(near.rx.len(), 1);
        assert_eq!(far.rx.len(), 0);
    }

    #[test]
    fn two_simultaneous_broadcasts_never_overlap_reservations() {
        let clock = VirtualClock::new();
        let executor = Executor::new(clock.clone());
        let spawner = Spawner::new(executor.clone());
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(7)));

        let nodes = Rc::new(vec![handle(0, 0.0, 0.0), handle(1, 10.0, 0.0), handle(2, 20.0, 0.0)]);
        let channel = WirelessChannel::new(nodes, mac_config(), clock.clone(), rng);

        for sender in [0u32, 1u32] {
            let channel = channel.clone();
            let spawner2 = spawner.clone();
            spawner.spawn(async move {
                let msg = Envelope {
                    sender_id: sender,
                    send_time: 0,
                    kind: MessageKind::Hello(HelloPayload {
                        position: Position::new(0.0, 0.0),
                        seq: 0,
                    }),
                };
                channel.broadcast(sender, msg, &spawner2).await;
            });
        }

        executor.run_to(1_000_000);
        // Busy-until only ever grows; the test mainly guards against a
        // panic from overlapping mutable borrows of `ChannelInner`.
        assert!(channel.inner.borrow().busy_until > 0);
    }
}
