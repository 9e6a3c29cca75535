//! The bidirectional forwarder: two cooperating one-way pumps between a
//! client connection and its upstream cluster connection.
//!
//! Frames intercepted by R1/R2 never reach the cluster — the synthetic
//! reply goes back to the client instead, carried over an internal
//! channel to the pump that owns the client-facing write half, so writes
//! to a single socket are never interleaved from two tasks.

use std::io::ErrorKind;
use std::sync::Arc;

use bytes::BytesMut;
use codec::{Frame, read_frame, write_frame};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::address::AddressMap;
use crate::rewrite::{self, RewriteSet};

fn is_quiet_close(err: &codec::Error) -> bool {
    matches!(
        err,
        codec::Error::Io(io) if matches!(
            io.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
        )
    )
}

/// Reads frames from `client`, applying R1/R2; non-intercepted frames
/// are forwarded to `upstream_wr` unchanged. Terminates on read/write
/// error, EOF, or when the sibling pump signals `sibling_stop`.
async fn pump_client_to_upstream(
    mut client_rd: OwnedReadHalf,
    mut upstream_wr: OwnedWriteHalf,
    mut scratch: BytesMut,
    rewrite_set: Arc<RewriteSet>,
    address_map: Arc<AddressMap>,
    public_hostname: Arc<str>,
    synthetic_tx: mpsc::Sender<Frame>,
    own_stop: watch::Sender<bool>,
    mut sibling_stop: watch::Receiver<bool>,
    debug: bool,
    label: &str,
) -> BytesMut {
    loop {
        tokio::select! {
            biased;
            _ = sibling_stop.changed() => break,
            result = read_frame(&mut client_rd, &mut scratch) => {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(err) => {
                        if !is_quiet_close(&err) {
                            log::warn!("{label}: client read failed: {err}");
                        }
                        break;
                    }
                };

                if let Some(synthetic) = rewrite::intercept(&frame, &rewrite_set, &address_map, &public_hostname) {
                    if debug {
                        log::debug!("{label}: intercepted query, replying locally: {synthetic:?}");
                    }
                    if synthetic_tx.send(synthetic).await.is_err() {
                        break;
                    }
                    continue;
                }

                if debug {
                    log::debug!("{label}: forwarding frame upstream: {frame:?}");
                }

                if let Err(err) = write_frame(&mut upstream_wr, &frame).await {
                    log::warn!("{label}: upstream write failed: {err}");
                    break;
                }
            }
        }
    }

    let _ = own_stop.send(true);
    scratch
}

/// Reads frames from `upstream`, applying R3; delivers synthetic replies
/// produced by the sibling pump (R1/R2) as well as ordinary upstream
/// traffic to `client_wr`. Terminates the same way as its sibling.
async fn pump_upstream_to_client(
    mut upstream_rd: OwnedReadHalf,
    mut client_wr: OwnedWriteHalf,
    mut scratch: BytesMut,
    address_map: Arc<AddressMap>,
    public_hostname: Arc<str>,
    mut synthetic_rx: mpsc::Receiver<Frame>,
    own_stop: watch::Sender<bool>,
    mut sibling_stop: watch::Receiver<bool>,
    debug: bool,
    label: &str,
) -> BytesMut {
    let mut synthetic_closed = false;

    loop {
        tokio::select! {
            biased;
            _ = sibling_stop.changed() => break,
            maybe_synthetic = synthetic_rx.recv(), if !synthetic_closed => {
                match maybe_synthetic {
                    Some(frame) => {
                        if let Err(err) = write_frame(&mut client_wr, &frame).await {
                            log::warn!("{label}: client write failed: {err}");
                            break;
                        }
                    }
                    None => synthetic_closed = true,
                }
            }
            result = read_frame(&mut upstream_rd, &mut scratch) => {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(err) => {
                        if !is_quiet_close(&err) {
                            log::warn!("{label}: upstream read failed: {err}");
                        }
                        break;
                    }
                };

                let outgoing = rewrite::rewrite(&frame, &address_map, &public_hostname).unwrap_or(frame);

                if debug {
                    log::debug!("{label}: forwarding frame to client: {outgoing:?}");
                }

                if let Err(err) = write_frame(&mut client_wr, &outgoing).await {
                    log::warn!("{label}: client write failed: {err}");
                    break;
                }
            }
        }
    }

    let _ = own_stop.send(true);
    scratch
}

/// Runs both pumps to completion and returns their scratch buffers so
/// the caller can release them back to the [`crate::buffer::BufferPool`].
pub async fn run(
    client: TcpStream,
    upstream: TcpStream,
    buffer_a: BytesMut,
    buffer_b: BytesMut,
    rewrite_set: Arc<RewriteSet>,
    address_map: Arc<AddressMap>,
    public_hostname: Arc<str>,
    debug: bool,
    label: String,
) -> (BytesMut, BytesMut) {
    let (client_rd, client_wr) = client.into_split();
    let (upstream_rd, upstream_wr) = upstream.into_split();

    let (stop_a_tx, stop_a_rx) = watch::channel(false);
    let (stop_b_tx, stop_b_rx) = watch::channel(false);
    let (synthetic_tx, synthetic_rx) = mpsc::channel(8);

    let label_a = format!("{label} c->u");
    let label_b = format!("{label} u->c");

    let task_a = pump_client_to_upstream(
        client_rd,
        upstream_wr,
        buffer_a,
        rewrite_set,
        address_map.clone(),
        public_hostname.clone(),
        synthetic_tx,
        stop_a_tx,
        stop_b_rx,
        debug,
        &label_a,
    );

    let task_b = pump_upstream_to_client(
        upstream_rd,
        client_wr,
        buffer_b,
        address_map,
        public_hostname,
        synthetic_rx,
        stop_b_tx,
        stop_a_rx,
        debug,
        &label_b,
    );

    tokio::join!(task_a, task_b)
}
