//! Message envelope and the five payload variants.

use std::collections::HashMap;

use crate::geometry::Position;

pub type NodeId = u32;
pub type SessionId = u64;

/// `{pos, seq}`. Seq increments per sender.
#[derive(Debug, Clone)]
pub struct HelloPayload {
    pub position: Position,
    pub seq: u32,
}

/// `{vector: map<dest_id, hop_cost>}`, already split-horizon/poisoned-reverse
/// exported for the specific neighbor it's addressed to.
#[derive(Debug, Clone)]
pub struct DvPayload {
    pub vector: HashMap<NodeId, u32>,
}

/// `{src, dst, session_id, ttl}`.
#[derive(Debug, Clone, Copy)]
pub struct SessionReqPayload {
    pub src: NodeId,
    pub dst: NodeId,
    pub session_id: SessionId,
    pub ttl: u32,
}

/// `{src, dst, session_id, ttl}`; flows dst -> src.
#[derive(Debug, Clone, Copy)]
pub struct SessionAckPayload {
    pub src: NodeId,
    pub dst: NodeId,
    pub session_id: SessionId,
    pub ttl: u32,
}

/// `{src, dst, session_id, payload, ttl, path, origin_time}`.
#[derive(Debug, Clone)]
pub struct DataPayload {
    pub src: NodeId,
    pub dst: NodeId,
    pub session_id: SessionId,
    pub ttl: u32,
    pub path: Vec<NodeId>,
    pub origin_time: u64,
}

#[derive(Debug, Clone)]
pub enum MessageKind {
    Hello(HelloPayload),
    Dv(DvPayload),
    SessionReq(SessionReqPayload),
    SessionAck(SessionAckPayload),
    Data(DataPayload),
}

/// `{kind, sender_id, send_time, payload}`. `send_time` is the virtual tick
/// the sender handed the frame to the channel (used to preserve per-sender
/// delivery ordering).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender_id: NodeId,
    pub send_time: u64,
    pub kind: MessageKind,
}
