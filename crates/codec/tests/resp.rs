use anyhow::Result;
use bytes::{Bytes, BytesMut};
use cluster_proxy_codec::{
    Frame,
    topology::{ServerEntry, SlotEntry, nodes_from_frame, slots_from_frame},
    write_frame,
};

async fn decode(bytes: &[u8], capacity: usize) -> Result<Frame> {
    let mut scratch = BytesMut::with_capacity(capacity);
    let mut cursor = std::io::Cursor::new(bytes.to_vec());
    Ok(cluster_proxy_codec::read_frame(&mut cursor, &mut scratch).await?)
}

#[tokio::test]
async fn decodes_moved_error() -> Result<()> {
    let frame = decode(b"-MOVED 3999 172.22.0.2:7002\r\n", 128).await?;
    match frame {
        Frame::Error(text) => assert_eq!(&text[..], b"MOVED 3999 172.22.0.2:7002"),
        other => panic!("expected error frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn decodes_slots_query_command() -> Result<()> {
    let frame = decode(b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nslots\r\n", 128).await?;
    assert!(frame.is_command("CLUSTER", "SLOTS"));
    Ok(())
}

#[tokio::test]
async fn slots_reply_decodes_into_slot_entries() -> Result<()> {
    let frame = decode(
        concat!(
            "*1\r\n",
            "*5\r\n",
            ":0\r\n",
            ":5460\r\n",
            "*3\r\n$10\r\n172.22.0.2\r\n:7000\r\n$40\r\n0000000000000000000000000000000000000000\r\n",
            "*3\r\n$10\r\n172.22.0.2\r\n:7005\r\n$40\r\n1111111111111111111111111111111111111111\r\n",
            "*3\r\n$10\r\n172.22.0.2\r\n:7006\r\n$40\r\n2222222222222222222222222222222222222222\r\n",
        )
        .as_bytes(),
        128,
    )
    .await?;

    let slots = slots_from_frame(&frame)?;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].range_start, 0);
    assert_eq!(slots[0].range_end, 5460);
    assert_eq!(slots[0].servers.len(), 3);
    assert_eq!(
        slots[0].servers[0],
        ServerEntry {
            ip: "172.22.0.2".to_string(),
            port: 7000,
            id: "0".repeat(40),
        }
    );
    Ok(())
}

#[tokio::test]
async fn nodes_reply_decodes_into_node_entries() -> Result<()> {
    let record = "07c37dfeb235213a872192d90877d0cd55635b91 172.22.0.2:7001@17001 master - 0 1426238317239 4 connected 5461-10922\n";
    let mut body = Vec::new();
    write_frame(
        &mut body,
        &Frame::BulkString(Bytes::from(record.as_bytes().to_vec())),
    )
    .await?;

    let frame = decode(&body, 512).await?;
    let nodes = nodes_from_frame(&frame)?;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].ip, "172.22.0.2");
    assert_eq!(nodes[0].port, 7001);
    assert_eq!(nodes[0].cluster_bus_port, 17001);
    assert_eq!(nodes[0].slots, vec!["5461-10922".to_string()]);
    Ok(())
}

#[test]
fn slot_entry_equality_ignores_nothing() {
    let a = SlotEntry {
        range_start: 0,
        range_end: 1,
        servers: vec![],
    };
    let b = a.clone();
    assert_eq!(a, b);
}
