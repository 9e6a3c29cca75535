//! The discovery & listener engine: one-shot bring-up that walks the
//! cluster once, builds the address map, and starts an accept loop per
//! cluster node.

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use anyhow::{Context, Result};
use bytes::BytesMut;
use codec::topology::{self, NodeEntry, SlotEntry};
use codec::{Frame, read_frame, write_frame};
use service::forwarder;
use service::{AddressMap, BufferPool, HostAddress, PortCounter, RewriteSet};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

const SEED_RETRY_ATTEMPTS: usize = 30;
const SEED_RETRY_DELAY: Duration = Duration::from_secs(2);

/// A running proxy: the populated address map plus the accept loops
/// bound to it. `status` reports the current mapping; `stop` closes
/// every listener and waits for its accept loop to unwind.
pub struct Engine {
    address_map: Arc<AddressMap>,
    stop_tx: watch::Sender<bool>,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Writes one line per mapping, ordered by local port ascending:
    /// `Listening on: <localPort> proxy to: <remoteHost>:<remotePort>`.
    pub fn status(&self, mut writer: impl Write) -> std::io::Result<()> {
        for (local_port, remote) in self.address_map.snapshot_local_to_remote() {
            writeln!(writer, "Listening on: {local_port} proxy to: {remote}")?;
        }

        Ok(())
    }

    /// Closes every listener. Forwarders already in flight unwind on
    /// their next I/O; this only waits for the accept loops themselves.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);

        for task in self.accept_tasks {
            let _ = task.await;
        }
    }
}

/// Runs discovery once and brings up one listener per distinct cluster
/// node. Fails the whole engine (no listeners opened) if discovery,
/// topology decoding, or any bind fails.
pub async fn start(config: Arc<Config>) -> Result<Engine> {
    let seed_addr = resolve_seed(&config.cluster.seed).await?;
    let mut seed_conn = dial_with_retry(seed_addr, SEED_RETRY_ATTEMPTS, SEED_RETRY_DELAY).await?;

    let mut scratch = BytesMut::with_capacity(config.runtime.buffer_byte_size);

    write_frame(&mut seed_conn, &Frame::command(&["CLUSTER", "slots"]))
        .await
        .context("writing CLUSTER slots to seed")?;
    let slots_frame = read_frame(&mut seed_conn, &mut scratch)
        .await
        .context("reading CLUSTER slots reply")?;
    let slots_reply =
        topology::slots_from_frame(&slots_frame).context("decoding CLUSTER slots reply")?;

    write_frame(&mut seed_conn, &Frame::command(&["CLUSTER", "NODES"]))
        .await
        .context("writing CLUSTER NODES to seed")?;
    let nodes_frame = read_frame(&mut seed_conn, &mut scratch)
        .await
        .context("reading CLUSTER NODES reply")?;
    let nodes_reply =
        topology::nodes_from_frame(&nodes_frame).context("decoding CLUSTER NODES reply")?;

    drop(seed_conn);

    log::info!(
        "discovery: {} slot ranges, {} node records from seed {seed_addr}",
        slots_reply.len(),
        nodes_reply.len(),
    );

    let address_map = Arc::new(AddressMap::new());
    let port_counter = PortCounter::new(config.listen.port);
    let buffer_pool = Arc::new(BufferPool::new(
        config.runtime.number_of_buffers,
        config.runtime.buffer_byte_size,
    ));
    let rewrite_set = Arc::new(RewriteSet {
        slots_reply,
        nodes_reply,
    });

    let listeners = bind_listeners(
        &rewrite_set.slots_reply,
        &address_map,
        &port_counter,
        config.listen.host,
    )
    .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let public_hostname: Arc<str> = Arc::from(config.cluster.public_hostname.as_str());

    let mut accept_tasks = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let local_addr = listener.local_addr().context("reading listener address")?;

        accept_tasks.push(tokio::spawn(accept_loop(
            listener,
            local_addr,
            address_map.clone(),
            rewrite_set.clone(),
            buffer_pool.clone(),
            public_hostname.clone(),
            config.runtime.debug,
            stop_rx.clone(),
        )));
    }

    Ok(Engine {
        address_map,
        stop_tx,
        accept_tasks,
    })
}

async fn bind_listeners(
    slots_reply: &[SlotEntry],
    address_map: &AddressMap,
    port_counter: &PortCounter,
    listen_host: IpAddr,
) -> Result<Vec<TcpListener>> {
    let mut seen = AHashSet::new();
    let mut distinct_remotes = Vec::new();

    for slot in slots_reply {
        for server in &slot.servers {
            let remote = HostAddress::new(server.ip.clone(), server.port);
            if seen.insert(remote.clone()) {
                distinct_remotes.push(remote);
            }
        }
    }

    let mut listeners = Vec::with_capacity(distinct_remotes.len());

    for remote in distinct_remotes {
        if address_map.lookup_remote(&remote).is_some() {
            continue;
        }

        let local_port = port_counter
            .allocate()
            .context("allocating local port for cluster node")?;

        let bind_addr = SocketAddr::new(listen_host, local_port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("binding local listener on {bind_addr}"))?;

        let bound_port = listener
            .local_addr()
            .context("reading bound listener address")?
            .port();

        address_map.create(remote.clone(), bound_port);
        log::info!("bound local port {bound_port} -> {remote}");
        listeners.push(listener);
    }

    Ok(listeners)
}

/// Accepts connections on a single listener until `stop_rx` fires,
/// opening a fresh upstream connection and spawning a forwarder per
/// accepted client.
async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    address_map: Arc<AddressMap>,
    rewrite_set: Arc<RewriteSet>,
    buffer_pool: Arc<BufferPool>,
    public_hostname: Arc<str>,
    debug: bool,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => {
                let (client, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!("accept failed on {local_addr}: {err}");
                        continue;
                    }
                };

                let remote = match address_map.lookup_local(local_addr.port()) {
                    Some(remote) => remote,
                    None => {
                        log::error!("no upstream mapping for local port {}", local_addr.port());
                        continue;
                    }
                };

                let Some(buffer_a) = buffer_pool.acquire() else {
                    log::warn!("buffer pool exhausted, refusing connection from {peer}");
                    continue;
                };
                let Some(buffer_b) = buffer_pool.acquire() else {
                    log::warn!("buffer pool exhausted, refusing connection from {peer}");
                    buffer_pool.release(buffer_a);
                    continue;
                };

                let address_map = address_map.clone();
                let rewrite_set = rewrite_set.clone();
                let buffer_pool = buffer_pool.clone();
                let public_hostname = public_hostname.clone();
                let label = format!("{peer}->{remote}");

                tokio::spawn(async move {
                    log::info!("{label}: accepted");

                    let upstream = match TcpStream::connect((remote.host.as_str(), remote.port)).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            log::warn!("{label}: upstream dial failed: {err}");
                            buffer_pool.release(buffer_a);
                            buffer_pool.release(buffer_b);
                            return;
                        }
                    };

                    let (ba, bb) = forwarder::run(
                        client,
                        upstream,
                        buffer_a,
                        buffer_b,
                        rewrite_set,
                        address_map,
                        public_hostname,
                        debug,
                        label,
                    )
                    .await;

                    buffer_pool.release(ba);
                    buffer_pool.release(bb);
                });
            }
        }
    }
}

async fn resolve_seed(seed: &str) -> Result<SocketAddr> {
    let address: HostAddress = seed.parse().context("parsing cluster seed address")?;

    if let Ok(ip) = address.host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, address.port));
    }

    let mut last_err = None;
    for attempt in 1..=SEED_RETRY_ATTEMPTS {
        match tokio::net::lookup_host((address.host.as_str(), address.port)).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    return Ok(addr);
                }
                last_err = Some(anyhow::anyhow!(
                    "seed hostname {} resolved to no addresses",
                    address.host
                ));
            }
            Err(err) => {
                log::warn!(
                    "resolving cluster seed {} failed (attempt {attempt}/{SEED_RETRY_ATTEMPTS}): {err}",
                    address.host
                );
                last_err = Some(err.into());
            }
        }

        if attempt < SEED_RETRY_ATTEMPTS {
            tokio::time::sleep(SEED_RETRY_DELAY).await;
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("failed to resolve cluster seed {}", address.host)))
}

async fn dial_with_retry(addr: SocketAddr, attempts: usize, delay: Duration) -> Result<TcpStream> {
    let mut last_err = None;

    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                log::warn!("dialing cluster seed {addr} failed (attempt {attempt}/{attempts}): {err}");
                last_err = Some(err);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(anyhow::anyhow!(
        "failed to dial cluster seed {addr} after {attempts} attempts: {}",
        last_err.unwrap()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dial_with_retry_succeeds_once_listener_comes_up() {
        let reserve = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserve.local_addr().unwrap();
        drop(reserve);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(_) => return,
            };
            let _ = listener.accept().await;
        });

        let stream = dial_with_retry(addr, 20, Duration::from_millis(20)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn dial_with_retry_exhausts_and_fails() {
        let reserve = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserve.local_addr().unwrap();
        drop(reserve);

        let result = dial_with_retry(addr, 3, Duration::from_millis(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bind_listeners_skips_already_mapped_remotes() {
        let address_map = AddressMap::new();
        address_map.create(HostAddress::new("172.22.0.2", 7000), 9000);

        let counter = PortCounter::new(0);
        let slots = vec![SlotEntry {
            range_start: 0,
            range_end: 16383,
            servers: vec![codec::topology::ServerEntry {
                ip: "172.22.0.2".to_string(),
                port: 7000,
                id: "a".repeat(40),
            }],
        }];

        // already mapped, so the zero-value counter (which would
        // otherwise report exhaustion on the first call) is never consulted
        let listeners = bind_listeners(&slots, &address_map, &counter, "127.0.0.1".parse().unwrap())
            .await
            .unwrap();

        assert!(listeners.is_empty());
        assert_eq!(
            address_map.lookup_remote(&HostAddress::new("172.22.0.2", 7000)),
            Some(9000)
        );
    }

    #[tokio::test]
    async fn bind_listeners_allocates_a_distinct_port_per_remote() {
        let address_map = AddressMap::new();
        let counter = PortCounter::new(40000);
        let slots = vec![SlotEntry {
            range_start: 0,
            range_end: 16383,
            servers: vec![
                codec::topology::ServerEntry {
                    ip: "172.22.0.2".to_string(),
                    port: 7000,
                    id: "a".repeat(40),
                },
                codec::topology::ServerEntry {
                    ip: "172.22.0.2".to_string(),
                    port: 7001,
                    id: "b".repeat(40),
                },
            ],
        }];

        let listeners = bind_listeners(&slots, &address_map, &counter, "127.0.0.1".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(listeners.len(), 2);
        assert!(address_map.lookup_remote(&HostAddress::new("172.22.0.2", 7000)).is_some());
        assert!(address_map.lookup_remote(&HostAddress::new("172.22.0.2", 7001)).is_some());

        let called = AtomicUsize::new(0);
        for listener in &listeners {
            called.fetch_add(listener.local_addr().is_ok() as usize, Ordering::Relaxed);
        }
        assert_eq!(called.load(Ordering::Relaxed), 2);
    }
}
