//! src/gossip/wire.rs
//!
//! Binary encode/decode for the gossip UDP wire format: a fixed-layout
//! header followed by a type-specific body. All integers are little-endian.
//! Node IDs are packed into fixed 64-byte fields, NUL-padded, matching the
//! `char[64]` layout in the external interface.

use crate::domain::{NodeId, NodeState};
use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const NODE_ID_LEN: usize = 64;
const HEADER_LEN: usize = 1 + 1 + 2 + 4 + NODE_ID_LEN + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Ping = 0,
    PingReq = 1,
    Ack = 2,
    Sync = 3,
    Compound = 4,
}

impl MessageType {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => MessageType::Ping,
            1 => MessageType::PingReq,
            2 => MessageType::Ack,
            3 => MessageType::Sync,
            4 => MessageType::Compound,
            _ => return Err(Error::MalformedDatagram(format!("unknown message type {v}"))),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub version: u8,
    pub msg_type: u8,
    pub payload_len: u16,
    pub seq: u32,
    pub sender_id: NodeId,
    pub incarnation: u32,
}

#[derive(Clone, Debug)]
pub enum GossipMessage {
    Ping {
        header: Header,
        target_id: NodeId,
    },
    PingReq {
        header: Header,
        target_id: NodeId,
        source_id: NodeId,
    },
    Ack {
        header: Header,
        target_id: NodeId,
        payload: Vec<u8>,
    },
    Sync {
        header: Header,
        entries: Vec<SyncEntry>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncEntry {
    pub id: NodeId,
    pub address: SocketAddr,
    pub state: NodeState,
    pub incarnation: u32,
    pub is_leader: bool,
}

fn pack_node_id(id: &NodeId) -> [u8; NODE_ID_LEN] {
    let mut out = [0u8; NODE_ID_LEN];
    let bytes = id.as_str().as_bytes();
    let n = bytes.len().min(NODE_ID_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn unpack_node_id(buf: &[u8]) -> Result<NodeId> {
    if buf.len() != NODE_ID_LEN {
        return Err(Error::MalformedDatagram("short node id field".into()));
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(NODE_ID_LEN);
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::MalformedDatagram("node id is not valid utf-8".into()))?;
    Ok(NodeId::new(s))
}

fn encode_header(out: &mut Vec<u8>, h: &Header) {
    out.push(h.version);
    out.push(h.msg_type);
    out.extend_from_slice(&h.payload_len.to_le_bytes());
    out.extend_from_slice(&h.seq.to_le_bytes());
    out.extend_from_slice(&pack_node_id(&h.sender_id));
    out.extend_from_slice(&h.incarnation.to_le_bytes());
}

fn decode_header(buf: &[u8]) -> Result<Header> {
    if buf.len() < HEADER_LEN {
        return Err(Error::MalformedDatagram("datagram shorter than header".into()));
    }
    let version = buf[0];
    let msg_type = buf[1];
    let payload_len = u16::from_le_bytes([buf[2], buf[3]]);
    let seq = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let sender_id = unpack_node_id(&buf[8..8 + NODE_ID_LEN])?;
    let inc_off = 8 + NODE_ID_LEN;
    let incarnation = u32::from_le_bytes([
        buf[inc_off],
        buf[inc_off + 1],
        buf[inc_off + 2],
        buf[inc_off + 3],
    ]);
    Ok(Header {
        version,
        msg_type,
        payload_len,
        seq,
        sender_id,
        incarnation,
    })
}

fn encode_addr(out: &mut Vec<u8>, addr: &SocketAddr) {
    match addr.ip() {
        IpAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out.push(6);
            out.extend_from_slice(&v6.octets());
        }
    }
    out.extend_from_slice(&addr.port().to_le_bytes());
}

fn decode_addr(buf: &[u8], pos: &mut usize) -> Result<SocketAddr> {
    let tag = *buf.get(*pos).ok_or_else(|| Error::MalformedDatagram("truncated address".into()))?;
    *pos += 1;
    let ip = match tag {
        4 => {
            let b = buf
                .get(*pos..*pos + 4)
                .ok_or_else(|| Error::MalformedDatagram("truncated ipv4".into()))?;
            *pos += 4;
            IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        6 => {
            let b = buf
                .get(*pos..*pos + 16)
                .ok_or_else(|| Error::MalformedDatagram("truncated ipv6".into()))?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(b);
            *pos += 16;
            IpAddr::V6(Ipv6Addr::from(arr))
        }
        _ => return Err(Error::MalformedDatagram("unknown address family tag".into())),
    };
    let port_bytes = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| Error::MalformedDatagram("truncated port".into()))?;
    let port = u16::from_le_bytes([port_bytes[0], port_bytes[1]]);
    *pos += 2;
    Ok(SocketAddr::new(ip, port))
}

pub fn encode(msg: &GossipMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    match msg {
        GossipMessage::Ping { header, target_id } => {
            encode_header(&mut out, header);
            out.extend_from_slice(&pack_node_id(target_id));
        }
        GossipMessage::PingReq {
            header,
            target_id,
            source_id,
        } => {
            encode_header(&mut out, header);
            out.extend_from_slice(&pack_node_id(target_id));
            out.extend_from_slice(&pack_node_id(source_id));
        }
        GossipMessage::Ack {
            header,
            target_id,
            payload,
        } => {
            encode_header(&mut out, header);
            out.extend_from_slice(&pack_node_id(target_id));
            out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            out.extend_from_slice(payload);
        }
        GossipMessage::Sync { header, entries } => {
            encode_header(&mut out, header);
            out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for e in entries {
                out.extend_from_slice(&pack_node_id(&e.id));
                encode_addr(&mut out, &e.address);
                out.push(e.state.as_u8());
                out.extend_from_slice(&e.incarnation.to_le_bytes());
                out.push(e.is_leader as u8);
            }
        }
    }
    out
}

pub fn decode(buf: &[u8]) -> Result<GossipMessage> {
    let header = decode_header(buf)?;
    let body = &buf[HEADER_LEN..];
    match MessageType::from_u8(header.msg_type)? {
        MessageType::Ping => {
            let target_id = unpack_node_id(
                body.get(..NODE_ID_LEN)
                    .ok_or_else(|| Error::MalformedDatagram("short ping body".into()))?,
            )?;
            Ok(GossipMessage::Ping { header, target_id })
        }
        MessageType::PingReq => {
            if body.len() < NODE_ID_LEN * 2 {
                return Err(Error::MalformedDatagram("short ping-req body".into()));
            }
            let target_id = unpack_node_id(&body[..NODE_ID_LEN])?;
            let source_id = unpack_node_id(&body[NODE_ID_LEN..NODE_ID_LEN * 2])?;
            Ok(GossipMessage::PingReq {
                header,
                target_id,
                source_id,
            })
        }
        MessageType::Ack => {
            if body.len() < NODE_ID_LEN + 2 {
                return Err(Error::MalformedDatagram("short ack body".into()));
            }
            let target_id = unpack_node_id(&body[..NODE_ID_LEN])?;
            let plen = u16::from_le_bytes([body[NODE_ID_LEN], body[NODE_ID_LEN + 1]]) as usize;
            let payload_start = NODE_ID_LEN + 2;
            let payload = body
                .get(payload_start..payload_start + plen)
                .ok_or_else(|| Error::MalformedDatagram("truncated ack payload".into()))?
                .to_vec();
            Ok(GossipMessage::Ack {
                header,
                target_id,
                payload,
            })
        }
        MessageType::Sync | MessageType::Compound => {
            if body.len() < 4 {
                return Err(Error::MalformedDatagram("short sync body".into()));
            }
            let count = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
            let mut pos = 4;
            let mut entries = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                let id_buf = body
                    .get(pos..pos + NODE_ID_LEN)
                    .ok_or_else(|| Error::MalformedDatagram("truncated sync entry id".into()))?;
                let id = unpack_node_id(id_buf)?;
                pos += NODE_ID_LEN;
                let address = decode_addr(body, &mut pos)?;
                let state_byte = *body
                    .get(pos)
                    .ok_or_else(|| Error::MalformedDatagram("truncated sync entry state".into()))?;
                let state = NodeState::from_u8(state_byte)
                    .ok_or_else(|| Error::MalformedDatagram("unknown node state byte".into()))?;
                pos += 1;
                let inc_bytes = body
                    .get(pos..pos + 4)
                    .ok_or_else(|| Error::MalformedDatagram("truncated sync incarnation".into()))?;
                let incarnation =
                    u32::from_le_bytes([inc_bytes[0], inc_bytes[1], inc_bytes[2], inc_bytes[3]]);
                pos += 4;
                let is_leader = *body
                    .get(pos)
                    .ok_or_else(|| Error::MalformedDatagram("truncated sync leader flag".into()))?
                    != 0;
                pos += 1;
                entries.push(SyncEntry {
                    id,
                    address,
                    state,
                    incarnation,
                    is_leader,
                });
            }
            Ok(GossipMessage::Sync { header, entries })
        }
    }
}
