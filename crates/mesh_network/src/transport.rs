//! TCP transport: listener, dialer and per-connection tasks.
//!
//! Every connection gets a reader loop that decodes frames and forwards them
//! as [`TransportEvent`]s, and a writer task draining the connection's
//! [`PeerLink`] queue. Whoever owns a `PeerLink` can enqueue envelopes
//! without awaiting socket I/O.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{CodecError, Frame, FrameCodec};
use crate::error::NetworkError;
use crate::graph::NodeAddress;
use crate::message::Envelope;

/// Envelopes a connection may have queued before further sends are dropped.
pub const LINK_QUEUE_DEPTH: usize = 256;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Which role a connection plays for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted by our listener.
    Inbound,
    /// Our single upstream connection.
    Outbound,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// Write handle to one live connection.
///
/// Sending only enqueues; the connection's writer task does the I/O. The
/// queue holds at most [`LINK_QUEUE_DEPTH`] envelopes.
#[derive(Debug, Clone)]
pub struct PeerLink {
    id: u64,
    addr: NodeAddress,
    tx: mpsc::Sender<Envelope>,
}

impl PeerLink {
    /// Create a link and the queue its writer drains.
    pub fn channel(addr: NodeAddress) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(LINK_QUEUE_DEPTH);
        let link = Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            tx,
        };
        (link, rx)
    }

    /// Unique per connection, so a late disconnect never evicts a newer link
    /// registered under the same address.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The remote address of the connection.
    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }

    /// Queue an envelope for this connection without waiting.
    ///
    /// Fails with [`NetworkError::QueueFull`] when the peer is not keeping
    /// up; the envelope is dropped.
    pub fn send(&self, envelope: Envelope) -> Result<(), NetworkError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => NetworkError::QueueFull(self.addr.to_string()),
            TrySendError::Closed(_) => {
                NetworkError::Transport(format!("Connection to {} is closed", self.addr))
            }
        })
    }
}

/// An incoming event from the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection was established. `local_addr` is our end of it.
    Connected {
        side: Side,
        link: PeerLink,
        local_addr: NodeAddress,
    },
    /// An envelope was received.
    Message {
        side: Side,
        link_id: u64,
        from: NodeAddress,
        envelope: Envelope,
    },
    /// The connection closed.
    Disconnected {
        side: Side,
        link_id: u64,
        addr: NodeAddress,
    },
}

/// Accept connections until shutdown, running each on its own task.
pub async fn run_listener<E>(
    listener: TcpListener,
    events: mpsc::Sender<E>,
    shutdown: broadcast::Sender<()>,
) where
    E: From<TransportEvent> + Send + 'static,
{
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {peer_addr}");
                        let events = events.clone();
                        let conn_shutdown = shutdown.subscribe();
                        tokio::spawn(async move {
                            let result =
                                run_connection(stream, Side::Inbound, events, conn_shutdown).await;
                            if let Err(e) = result {
                                warn!("Inbound connection from {peer_addr} failed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("TCP accept failed: {e}");
                    }
                }
            }
            _ = stop.recv() => {
                info!("Mesh listener shutting down");
                break;
            }
        }
    }
}

/// Dial `addr`.
pub async fn connect(addr: &str) -> Result<TcpStream, NetworkError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| NetworkError::Transport(format!("Connect to {addr} failed: {e}")))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Drive one connection until the peer closes it, a framing error occurs,
/// or shutdown is signalled.
///
/// Emits `Connected` before any `Message`, and always ends with
/// `Disconnected` once `Connected` was sent.
pub async fn run_connection<E>(
    stream: TcpStream,
    side: Side,
    events: mpsc::Sender<E>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), NetworkError>
where
    E: From<TransportEvent> + Send + 'static,
{
    let peer_addr = NodeAddress::from(stream.peer_addr()?);
    let local_addr = NodeAddress::from(stream.local_addr()?);
    let (read_half, write_half) = stream.into_split();

    let (link, outgoing) = PeerLink::channel(peer_addr.clone());
    let link_id = link.id();

    tokio::spawn(run_writer(write_half, outgoing, peer_addr.clone()));

    let connected = TransportEvent::Connected {
        side,
        link,
        local_addr,
    };
    if events.send(connected.into()).await.is_err() {
        return Ok(());
    }

    let mut reader = FramedRead::new(read_half, FrameCodec);
    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Frame::Envelope(envelope))) => {
                    let event = TransportEvent::Message {
                        side,
                        link_id,
                        from: peer_addr.clone(),
                        envelope,
                    };
                    if events.send(event.into()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Frame::Malformed(reason))) => {
                    warn!("Dropped malformed frame from {peer_addr}: {reason}");
                }
                Some(Err(e)) => {
                    warn!("Closing {side} connection {peer_addr}: {e}");
                    break;
                }
                None => {
                    debug!("{side} connection {peer_addr} closed by peer");
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!("Closing {side} connection {peer_addr} on shutdown");
                break;
            }
        }
    }

    let disconnected = TransportEvent::Disconnected {
        side,
        link_id,
        addr: peer_addr,
    };
    let _ = events.send(disconnected.into()).await;
    Ok(())
}

/// Drain a link's queue onto the socket.
///
/// An envelope that cannot be framed is skipped; only an I/O error ends the
/// writer.
async fn run_writer<W>(write_half: W, mut outgoing: mpsc::Receiver<Envelope>, addr: NodeAddress)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = FramedWrite::new(write_half, FrameCodec);
    while let Some(envelope) = outgoing.recv().await {
        let kind = envelope.kind();
        match writer.send(envelope).await {
            Ok(()) => {}
            Err(CodecError::Io(e)) => {
                debug!("Write to {addr} failed: {e}");
                break;
            }
            Err(e) => warn!("Dropped {kind} to {addr}: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[test]
    fn test_link_ids_are_unique() {
        let (a, _rx_a) = PeerLink::channel("a:1".into());
        let (b, _rx_b) = PeerLink::channel("a:1".into());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.addr(), b.addr());
    }

    #[test]
    fn test_send_on_closed_link_fails() {
        let (link, rx) = PeerLink::channel("a:1".into());
        drop(rx);
        let result = link.send(Envelope::json("t", 1));
        assert!(matches!(result, Err(NetworkError::Transport(_))));
    }

    #[test]
    fn test_send_on_full_link_drops() {
        let (link, mut rx) = PeerLink::channel("a:1".into());
        for i in 0..LINK_QUEUE_DEPTH {
            link.send(Envelope::json("t", i as i64)).unwrap();
        }
        let result = link.send(Envelope::json("t", -1));
        assert!(matches!(result, Err(NetworkError::QueueFull(addr)) if addr == "a:1"));

        // Draining makes room again.
        assert_eq!(rx.try_recv().unwrap(), Envelope::json("t", 0));
        link.send(Envelope::json("t", -1)).unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&addr.to_string()).await;
        assert!(matches!(result, Err(NetworkError::Transport(_))));
    }

    #[tokio::test]
    async fn test_exchange_over_loopback() {
        let (events_tx, mut events_rx) = mpsc::channel::<TransportEvent>(64);
        let (shutdown_tx, _) = broadcast::channel(4);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        tokio::spawn(run_listener(listener, events_tx.clone(), shutdown_tx.clone()));

        let stream = connect(&server_addr.to_string()).await.unwrap();
        let client_shutdown = shutdown_tx.subscribe();
        let client_events = events_tx.clone();
        tokio::spawn(async move {
            let _ =
                run_connection(stream, Side::Outbound, client_events, client_shutdown).await;
        });

        // Both ends report Connected; the outbound end knows the server address.
        let mut inbound_link = None;
        let mut outbound_link = None;
        for _ in 0..2 {
            match next_event(&mut events_rx).await {
                TransportEvent::Connected {
                    side: Side::Inbound,
                    link,
                    local_addr,
                } => {
                    assert_eq!(local_addr, NodeAddress::from(server_addr));
                    inbound_link = Some(link);
                }
                TransportEvent::Connected {
                    side: Side::Outbound,
                    link,
                    ..
                } => {
                    assert_eq!(link.addr(), &NodeAddress::from(server_addr));
                    outbound_link = Some(link);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        let inbound_link = inbound_link.unwrap();
        let outbound_link = outbound_link.unwrap();

        outbound_link.send(Envelope::json("temp", 21.5)).unwrap();
        match next_event(&mut events_rx).await {
            TransportEvent::Message {
                side,
                link_id,
                envelope,
                ..
            } => {
                assert_eq!(side, Side::Inbound);
                assert_eq!(link_id, inbound_link.id());
                assert_eq!(envelope, Envelope::json("temp", 21.5));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Shutdown closes both connections and the listener.
        let _ = shutdown_tx.send(());
        let mut disconnected = 0;
        while disconnected < 2 {
            if let TransportEvent::Disconnected { .. } = next_event(&mut events_rx).await {
                disconnected += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        use tokio::io::AsyncWriteExt;

        let (events_tx, mut events_rx) = mpsc::channel::<TransportEvent>(64);
        let (shutdown_tx, _) = broadcast::channel(4);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        tokio::spawn(run_listener(listener, events_tx, shutdown_tx.clone()));

        let mut raw = TcpStream::connect(server_addr).await.unwrap();
        assert!(matches!(next_event(&mut events_rx).await, TransportEvent::Connected { .. }));

        let garbage = b"{broken";
        raw.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        raw.write_all(garbage).await.unwrap();
        let frame = crate::codec::encode(&Envelope::json("t", 1)).unwrap();
        raw.write_all(&frame).await.unwrap();

        match next_event(&mut events_rx).await {
            TransportEvent::Message { envelope, .. } => {
                assert_eq!(envelope, Envelope::json("t", 1))
            }
            other => panic!("unexpected event {other:?}"),
        }

        drop(raw);
        assert!(matches!(next_event(&mut events_rx).await, TransportEvent::Disconnected { .. }));
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_oversized_envelope_is_skipped_not_fatal() {
        let (events_tx, mut events_rx) = mpsc::channel::<TransportEvent>(64);
        let (shutdown_tx, _) = broadcast::channel(4);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        tokio::spawn(run_listener(listener, events_tx.clone(), shutdown_tx.clone()));

        let stream = connect(&server_addr.to_string()).await.unwrap();
        let client_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _ = run_connection(stream, Side::Outbound, events_tx, client_shutdown).await;
        });

        let mut outbound_link = None;
        let mut _inbound_link = None;
        for _ in 0..2 {
            if let TransportEvent::Connected { side, link, .. } = next_event(&mut events_rx).await {
                match side {
                    Side::Outbound => outbound_link = Some(link),
                    Side::Inbound => _inbound_link = Some(link),
                }
            }
        }
        let link = outbound_link.unwrap();

        // Hex doubles the payload, so this no longer fits in one frame.
        let huge = mesh_core::Value::Bytes(vec![0; crate::codec::MAX_FRAME_LEN / 2 + 1]);
        link.send(Envelope::json("big", huge)).unwrap();
        link.send(Envelope::json("small", 1)).unwrap();

        match next_event(&mut events_rx).await {
            TransportEvent::Message { envelope, .. } => {
                assert_eq!(envelope, Envelope::json("small", 1))
            }
            other => panic!("unexpected event {other:?}"),
        }
        let _ = shutdown_tx.send(());
    }
}
