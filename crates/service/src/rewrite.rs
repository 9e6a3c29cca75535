//! R1/R2/R3: the three message-level substitutions that hide
//! cluster-private addresses from clients. Each rule is a pure function
//! of a parsed frame and the cached topology state; none of them mutate
//! the cache they read from.

use bytes::Bytes;
use codec::topology::{NodeEntry, SlotEntry, nodes_to_frame, slots_to_frame};
use codec::Frame;

use crate::address::{AddressMap, HostAddress};

/// The two topology snapshots captured once during discovery. Read-only
/// for the lifetime of the process; R1/R2 deep-copy an entry before
/// substituting its address so the shared cache is never corrupted by a
/// caller holding on to the wrong reference.
pub struct RewriteSet {
    pub slots_reply: Vec<SlotEntry>,
    pub nodes_reply: Vec<NodeEntry>,
}

/// R1/R2 — called on the client-facing pump before a frame is forwarded
/// upstream. Returns a synthetic reply when `frame` is a `CLUSTER SLOTS`
/// or `CLUSTER NODES` query; the query itself never reaches the cluster.
pub fn intercept(
    frame: &Frame,
    rewrite_set: &RewriteSet,
    address_map: &AddressMap,
    public_hostname: &str,
) -> Option<Frame> {
    if frame.is_command("CLUSTER", "SLOTS") {
        Some(rewrite_slots_reply(rewrite_set, address_map, public_hostname))
    } else if frame.is_command("CLUSTER", "NODES") {
        Some(rewrite_nodes_reply(rewrite_set, address_map, public_hostname))
    } else {
        None
    }
}

/// R3 — called on the upstream-facing pump. Returns a rewritten `MOVED`
/// error when `frame` matches that shape; otherwise `None`, leaving the
/// frame untouched.
pub fn rewrite(frame: &Frame, address_map: &AddressMap, public_hostname: &str) -> Option<Frame> {
    let text = match frame {
        Frame::Error(bytes) => std::str::from_utf8(bytes).ok()?,
        _ => return None,
    };

    let tokens: Vec<&str> = text.split(' ').collect();
    if tokens.len() != 3 || tokens[0] != "MOVED" {
        return None;
    }

    let remote: HostAddress = tokens[2].parse().ok()?;
    let local_port = match address_map.lookup_remote(&remote) {
        Some(port) => port,
        None => {
            log::warn!("MOVED redirect to unmapped address {remote}, passing through unchanged");
            return None;
        }
    };

    let rewritten = format!("MOVED {} {public_hostname}:{local_port}", tokens[1]);
    Some(Frame::Error(Bytes::from(rewritten.into_bytes())))
}

fn rewrite_slots_reply(
    rewrite_set: &RewriteSet,
    address_map: &AddressMap,
    public_hostname: &str,
) -> Frame {
    let rewritten: Vec<SlotEntry> = rewrite_set
        .slots_reply
        .iter()
        .map(|slot| {
            let mut slot = slot.clone();
            for server in slot.servers.iter_mut() {
                let remote = HostAddress::new(server.ip.clone(), server.port);
                match address_map.lookup_remote(&remote) {
                    Some(local_port) => {
                        server.ip = public_hostname.to_string();
                        server.port = local_port;
                    }
                    None => log::warn!(
                        "no local port mapping for slot server {remote}, passing through unmodified"
                    ),
                }
            }
            slot
        })
        .collect();

    slots_to_frame(&rewritten)
}

fn rewrite_nodes_reply(
    rewrite_set: &RewriteSet,
    address_map: &AddressMap,
    public_hostname: &str,
) -> Frame {
    let rewritten: Vec<NodeEntry> = rewrite_set
        .nodes_reply
        .iter()
        .map(|node| {
            let mut node = node.clone();
            let remote = HostAddress::new(node.ip.clone(), node.port);
            match address_map.lookup_remote(&remote) {
                Some(local_port) => {
                    node.ip = public_hostname.to_string();
                    node.port = local_port;
                }
                None => log::warn!(
                    "no local port mapping for node {remote}, passing through unmodified"
                ),
            }
            node
        })
        .collect();

    nodes_to_frame(&rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::topology::ServerEntry;

    fn sample_set() -> RewriteSet {
        RewriteSet {
            slots_reply: vec![SlotEntry {
                range_start: 0,
                range_end: 5460,
                servers: vec![
                    ServerEntry {
                        ip: "172.22.0.2".to_string(),
                        port: 7000,
                        id: "a".repeat(40),
                    },
                    ServerEntry {
                        ip: "172.22.0.2".to_string(),
                        port: 7005,
                        id: "b".repeat(40),
                    },
                ],
            }],
            nodes_reply: vec![NodeEntry {
                id: "nodeid".to_string(),
                ip: "172.22.0.2".to_string(),
                port: 7001,
                cluster_bus_port: 17001,
                flags: "master".to_string(),
                master_id: "-".to_string(),
                ping_sent: 0,
                pong_received: 0,
                config_epoch: 4,
                link_state: "connected".to_string(),
                slots: vec![],
            }],
        }
    }

    fn sample_map() -> AddressMap {
        let map = AddressMap::new();
        map.create(HostAddress::new("172.22.0.2", 7000), 8000);
        map.create(HostAddress::new("172.22.0.2", 7005), 8005);
        map.create(HostAddress::new("172.22.0.2", 7001), 8001);
        map.create(HostAddress::new("172.22.0.2", 7002), 8002);
        map
    }

    #[test]
    fn slots_query_is_intercepted_and_rewritten() {
        let set = sample_set();
        let map = sample_map();
        let query = Frame::command(&["CLUSTER", "SLOTS"]);

        let reply = intercept(&query, &set, &map, "proxy.example").unwrap();
        let slots = codec::topology::slots_from_frame(&reply).unwrap();
        assert_eq!(slots[0].servers[0].ip, "proxy.example");
        assert_eq!(slots[0].servers[0].port, 8000);
        assert_eq!(slots[0].servers[1].port, 8005);

        // cache must remain untouched by the rewrite
        assert_eq!(set.slots_reply[0].servers[0].ip, "172.22.0.2");
    }

    #[test]
    fn nodes_query_is_intercepted_and_rewritten() {
        let set = sample_set();
        let map = sample_map();
        let query = Frame::command(&["CLUSTER", "NODES"]);

        let reply = intercept(&query, &set, &map, "proxy.example").unwrap();
        let nodes = codec::topology::nodes_from_frame(&reply).unwrap();
        assert_eq!(nodes[0].ip, "proxy.example");
        assert_eq!(nodes[0].port, 8001);
        assert_eq!(nodes[0].cluster_bus_port, 17001);
    }

    #[test]
    fn non_matching_query_is_not_intercepted() {
        let set = sample_set();
        let map = sample_map();
        let query = Frame::command(&["SET", "foo"]);
        assert!(intercept(&query, &set, &map, "proxy.example").is_none());
    }

    #[test]
    fn moved_error_is_rewritten() {
        let map = sample_map();
        let error = Frame::Error(Bytes::from_static(b"MOVED 3999 172.22.0.2:7002"));
        let rewritten = rewrite(&error, &map, "proxy.example").unwrap();
        match rewritten {
            Frame::Error(bytes) => assert_eq!(&bytes[..], b"MOVED 3999 proxy.example:8002"),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn moved_error_to_unmapped_address_passes_through() {
        let map = sample_map();
        let error = Frame::Error(Bytes::from_static(b"MOVED 3999 10.0.0.9:7002"));
        assert!(rewrite(&error, &map, "proxy.example").is_none());
    }

    #[test]
    fn non_moved_error_is_not_rewritten() {
        let map = sample_map();
        let error = Frame::Error(Bytes::from_static(b"WRONGTYPE not a list"));
        assert!(rewrite(&error, &map, "proxy.example").is_none());
    }
}
