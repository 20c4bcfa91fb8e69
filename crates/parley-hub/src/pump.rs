//! Per-connection read and write pumps.
//!
//! Each connection runs [`read_pump`] and [`write_pump`] as two tasks. They
//! share a [`ClientHandle`]; whichever exits first cancels the other. Both are
//! generic over the transport so the node can plug in a WebSocket while tests
//! use in-memory channels.

use crate::client::{ClientHandle, ClientState, OutboundReceiver};
use crate::directory::UserDirectory;
use crate::envelope::{sanitize_text, Envelope, Protocol};
use crate::error::HubError;
use crate::hub::HubHandle;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default liveness window.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(60);

/// Default time allowed for one write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Liveness probe.
    Ping(Vec<u8>),
    /// Liveness acknowledgment.
    Pong(Vec<u8>),
    /// Close frame.
    Close,
}

/// Timing and size limits for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Silence tolerated before the peer is presumed dead.
    pub liveness_window: Duration,
    /// Interval between probes. Must be shorter than the liveness window.
    pub ping_period: Duration,
    /// Time allowed for one write or flush.
    pub write_wait: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl KeepaliveConfig {
    /// Settings for a liveness window, probing at 9/10 of it.
    pub fn with_liveness_window(liveness_window: Duration) -> Self {
        Self {
            liveness_window,
            ping_period: liveness_window * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            ping_period: DEFAULT_LIVENESS_WINDOW * 9 / 10,
            write_wait: DEFAULT_WRITE_WAIT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Read frames from the peer until the connection ends.
///
/// Every frame received re-arms the liveness deadline. On exit the write
/// pump is cancelled and the registration is handed back to the hub.
pub async fn read_pump<S, E>(
    handle: ClientHandle,
    mut stream: S,
    hub: HubHandle,
    directory: Arc<UserDirectory>,
    keepalive: KeepaliveConfig,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let client_id = handle.id;

    loop {
        let next = tokio::select! {
            _ = handle.cancelled() => break,
            next = timeout(keepalive.liveness_window, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                info!(client_id, "Liveness window elapsed");
                break;
            }
            Ok(None) => {
                debug!(client_id, "Connection stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(client_id, error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(bytes) => bytes,
            Frame::Ping(_) | Frame::Pong(_) => continue,
            Frame::Close => {
                debug!(client_id, "Close received");
                break;
            }
        };

        if payload.len() > keepalive.max_message_size {
            let err = HubError::MessageTooLarge {
                size: payload.len(),
                limit: keepalive.max_message_size,
            };
            warn!(client_id, error = %err, "Dropping connection");
            break;
        }

        let inbound = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client_id, error = %e, "Malformed envelope");
                continue;
            }
        };

        if let Err(e) = dispatch(&handle, inbound, &hub, &directory).await {
            match e {
                HubError::Decode(_) => warn!(client_id, error = %e, "Envelope rejected"),
                _ => {
                    debug!(client_id, error = %e, "Dispatch failed");
                    break;
                }
            }
        }
    }

    debug!(client_id, state = %ClientState::Unregistering, "Read pump exiting");
    handle.cancel();
    if hub.unregister(client_id, handle.session).await.is_err() {
        debug!(client_id, "Hub gone before unregister");
    }
}

async fn dispatch(
    handle: &ClientHandle,
    inbound: Envelope,
    hub: &HubHandle,
    directory: &UserDirectory,
) -> Result<(), HubError> {
    match inbound.protocol {
        Protocol::RosterQuery => {
            let reply = Envelope::new(Protocol::RosterQuery, handle.id, directory.roster());
            handle.reply(reply).await
        }
        Protocol::BroadcastText => {
            let text = inbound.data.as_str().ok_or_else(|| {
                HubError::Decode(format!("expected text payload, got {}", inbound.data))
            })?;
            let outbound = Envelope::new(Protocol::BroadcastText, handle.id, sanitize_text(text));
            hub.broadcast(outbound).await
        }
        Protocol::Unknown(tag) => {
            warn!(client_id = handle.id, protocol = %tag, "Protocol is not defined");
            Ok(())
        }
    }
}

/// Write queued messages and keepalive probes to the peer.
///
/// Runs until the hub closes the queue, a write fails or times out, or the
/// read pump cancels the connection.
pub async fn write_pump<K>(
    handle: ClientHandle,
    mut sink: K,
    mut outbound: OutboundReceiver,
    keepalive: KeepaliveConfig,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let client_id = handle.id;
    let mut ticker = interval_at(Instant::now() + keepalive.ping_period, keepalive.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = handle.cancelled() => break,
            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!(client_id, "Outbound queue closed");
                    if let Err(e) = send_with_deadline(&mut sink, Frame::Close, keepalive.write_wait).await {
                        debug!(client_id, error = %e, "Close frame not delivered");
                    }
                    break;
                };

                let mut batch = vec![message];
                while let Ok(next) = outbound.try_recv() {
                    batch.push(next);
                }

                if let Err(e) = write_batch(&mut sink, &batch, keepalive.write_wait).await {
                    warn!(client_id, error = %e, "Write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Frame::Ping(Vec::new()), keepalive.write_wait).await {
                    info!(client_id, error = %e, "Keepalive probe failed");
                    break;
                }
            }
        }
    }

    handle.cancel();
    match timeout(keepalive.write_wait, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(client_id, error = %e, "Closing connection failed"),
        Err(_) => warn!(client_id, "Close deadline exceeded, abandoning connection"),
    }
    debug!(client_id, state = %ClientState::Closed, "Write pump exited");
}

/// Feed every message, then flush once, all within `write_wait`.
async fn write_batch<K>(
    sink: &mut K,
    batch: &[crate::client::Outbound],
    write_wait: Duration,
) -> Result<(), HubError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut frames = Vec::with_capacity(batch.len());
    for message in batch {
        match message.encode() {
            Ok(json) => frames.push(Frame::Text(json)),
            Err(e) => warn!(error = %e, "Skipping message that failed to encode"),
        }
    }

    let write = async {
        for frame in frames {
            sink.feed(frame).await?;
        }
        sink.flush().await
    };

    match timeout(write_wait, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HubError::Transport(e.to_string())),
        Err(_) => Err(HubError::Transport("write deadline exceeded".to_string())),
    }
}

async fn send_with_deadline<K>(
    sink: &mut K,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), HubError>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HubError::Transport(e.to_string())),
        Err(_) => Err(HubError::Transport("write deadline exceeded".to_string())),
    }
}
