//! Typed views over the two cluster topology replies, layered on top of
//! [`Frame`](crate::Frame). `CLUSTER SLOTS` is a machine-parseable RESP
//! array; `CLUSTER NODES` is a single bulk string of newline-separated,
//! space-separated text records.

use bytes::Bytes;

use crate::{Error, Frame};

/// One server fronting a slot range, as reported by `CLUSTER SLOTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub ip: String,
    pub port: u16,
    pub id: String,
}

/// A contiguous hash-slot range and the servers that own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub range_start: i64,
    pub range_end: i64,
    pub servers: Vec<ServerEntry>,
}

/// One record of a `CLUSTER NODES` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub cluster_bus_port: u16,
    pub flags: String,
    pub master_id: String,
    pub ping_sent: u64,
    pub pong_received: u64,
    pub config_epoch: u64,
    pub link_state: String,
    pub slots: Vec<String>,
}

fn as_bulk_string(frame: &Frame) -> Result<&[u8], Error> {
    match frame {
        Frame::BulkString(b) => Ok(b),
        _ => Err(Error::MalformedTopology),
    }
}

fn as_integer(frame: &Frame) -> Result<i64, Error> {
    match frame {
        Frame::Integer(v) => Ok(*v),
        _ => Err(Error::MalformedTopology),
    }
}

fn port_from_i64(value: i64) -> Result<u16, Error> {
    u16::try_from(value).map_err(|_| Error::MalformedTopology)
}

/// Decodes a `CLUSTER SLOTS` reply into `[SlotEntry]`.
pub fn slots_from_frame(frame: &Frame) -> Result<Vec<SlotEntry>, Error> {
    let items = match frame {
        Frame::Array(items) => items,
        _ => return Err(Error::MalformedTopology),
    };

    items.iter().map(slot_entry_from_frame).collect()
}

fn slot_entry_from_frame(frame: &Frame) -> Result<SlotEntry, Error> {
    let items = match frame {
        Frame::Array(items) if items.len() >= 3 => items,
        _ => return Err(Error::MalformedTopology),
    };

    let range_start = as_integer(&items[0])?;
    let range_end = as_integer(&items[1])?;

    let servers = items[2..]
        .iter()
        .map(server_entry_from_frame)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SlotEntry {
        range_start,
        range_end,
        servers,
    })
}

fn server_entry_from_frame(frame: &Frame) -> Result<ServerEntry, Error> {
    let items = match frame {
        Frame::Array(items) if items.len() == 3 => items,
        _ => return Err(Error::MalformedTopology),
    };

    let ip = std::str::from_utf8(as_bulk_string(&items[0])?)?.to_string();
    let port = port_from_i64(as_integer(&items[1])?)?;
    let id = std::str::from_utf8(as_bulk_string(&items[2])?)?.to_string();

    Ok(ServerEntry { ip, port, id })
}

/// Encodes `[SlotEntry]` back into a `CLUSTER SLOTS` reply frame.
pub fn slots_to_frame(slots: &[SlotEntry]) -> Frame {
    Frame::Array(
        slots
            .iter()
            .map(|slot| {
                let mut items = Vec::with_capacity(2 + slot.servers.len());
                items.push(Frame::Integer(slot.range_start));
                items.push(Frame::Integer(slot.range_end));
                items.extend(slot.servers.iter().map(server_entry_to_frame));
                Frame::Array(items)
            })
            .collect(),
    )
}

fn server_entry_to_frame(server: &ServerEntry) -> Frame {
    Frame::Array(vec![
        Frame::BulkString(Bytes::copy_from_slice(server.ip.as_bytes())),
        Frame::Integer(server.port as i64),
        Frame::BulkString(Bytes::copy_from_slice(server.id.as_bytes())),
    ])
}

/// Decodes a `CLUSTER NODES` reply into `[NodeEntry]`.
pub fn nodes_from_frame(frame: &Frame) -> Result<Vec<NodeEntry>, Error> {
    let payload = std::str::from_utf8(as_bulk_string(frame)?)?;

    payload
        .split('\n')
        .filter(|record| !record.is_empty())
        .map(node_entry_from_record)
        .collect()
}

fn node_entry_from_record(record: &str) -> Result<NodeEntry, Error> {
    let columns: Vec<&str> = record.split(' ').collect();
    if columns.len() < 8 {
        return Err(Error::MalformedTopology);
    }

    let id = columns[0].to_string();

    let (addr, cport) = columns[1]
        .split_once('@')
        .ok_or(Error::MalformedTopology)?;
    let (ip, port) = addr.rsplit_once(':').ok_or(Error::MalformedTopology)?;

    let port = port.parse::<u16>().map_err(|_| Error::MalformedTopology)?;
    let cluster_bus_port = cport.parse::<u16>().map_err(|_| Error::MalformedTopology)?;

    let flags = columns[2].to_string();
    let master_id = columns[3].to_string();
    let ping_sent = columns[4].parse().map_err(|_| Error::MalformedTopology)?;
    let pong_received = columns[5].parse().map_err(|_| Error::MalformedTopology)?;
    let config_epoch = columns[6].parse().map_err(|_| Error::MalformedTopology)?;
    let link_state = columns[7].to_string();
    let slots = columns[8..].iter().map(|s| s.to_string()).collect();

    Ok(NodeEntry {
        id,
        ip: ip.to_string(),
        port,
        cluster_bus_port,
        flags,
        master_id,
        ping_sent,
        pong_received,
        config_epoch,
        link_state,
        slots,
    })
}

fn node_entry_to_record(node: &NodeEntry) -> String {
    let mut parts = vec![
        node.id.clone(),
        format!("{}:{}@{}", node.ip, node.port, node.cluster_bus_port),
        node.flags.clone(),
        node.master_id.clone(),
        node.ping_sent.to_string(),
        node.pong_received.to_string(),
        node.config_epoch.to_string(),
        node.link_state.clone(),
    ];
    parts.extend(node.slots.iter().cloned());
    parts.join(" ")
}

/// Encodes `[NodeEntry]` back into a `CLUSTER NODES` reply frame: records
/// joined by `\n`, wrapped in a single bulk string, with a trailing `\n`.
pub fn nodes_to_frame(nodes: &[NodeEntry]) -> Frame {
    let mut body = nodes
        .iter()
        .map(node_entry_to_record)
        .collect::<Vec<_>>()
        .join("\n");
    body.push('\n');

    Frame::BulkString(Bytes::from(body.into_bytes()))
}
