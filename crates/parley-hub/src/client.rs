//! Client connection management.

use crate::envelope::Envelope;
use crate::error::HubError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier a client claims when connecting.
pub type ClientId = i64;

/// A message waiting in a client's outbound queue.
pub type Outbound = Arc<Envelope>;

/// Receiving end of a client's outbound queue, consumed by the write pump.
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// Registration record owned by the hub.
///
/// Holds the only strong sender of the outbound queue. Dropping the record
/// closes the queue, so the queue closes exactly once and only where the hub
/// drops it.
#[derive(Debug)]
pub struct Client {
    /// Claimed client id.
    pub id: ClientId,
    /// Unique per connection; tells apart two connections with the same id.
    pub session: Uuid,
    /// Channel for sending messages to this client.
    sender: mpsc::Sender<Outbound>,
    /// Connection metadata.
    pub metadata: ClientMetadata,
}

impl Client {
    /// Offer a message without waiting.
    pub fn offer(&self, message: Outbound) -> Result<(), HubError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::SlowConsumer(self.id),
            mpsc::error::TrySendError::Closed(_) => HubError::ChannelClosed,
        })
    }
}

/// What the two pumps of a connection hold.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Claimed client id.
    pub id: ClientId,
    /// Session of the registration this handle belongs to.
    pub session: Uuid,
    /// Weak sender for replies addressed to this client only.
    outbound: mpsc::WeakSender<Outbound>,
    /// Shared by the read and write pump; either one exiting stops the other.
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Enqueue a reply for this client only.
    ///
    /// Waits for queue space, but gives up if the connection is shutting
    /// down or the hub has already closed the queue.
    pub async fn reply(&self, envelope: Envelope) -> Result<(), HubError> {
        let sender = self.outbound.upgrade().ok_or(HubError::ChannelClosed)?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(HubError::ChannelClosed),
            res = sender.send(Arc::new(envelope)) => res.map_err(|_| HubError::ChannelClosed),
        }
    }

    /// Stop both pumps of this connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection starts shutting down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Metadata about a client connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMetadata {
    /// When the client connected (Unix timestamp).
    pub connected_at: u64,
}

impl ClientMetadata {
    /// Create metadata with current timestamp.
    pub fn now() -> Self {
        Self {
            connected_at: unix_now(),
        }
    }

    /// Seconds since the connection was established.
    pub fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.connected_at)
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lifecycle stages of one connection.
///
/// Used as the `state` field in connection logs. No value tracks a live
/// connection; the stage is implied by which pump code is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Authorized, transport being upgraded.
    Connecting,
    /// Handed to the hub.
    Registered,
    /// Both pumps running.
    Active,
    /// A pump has exited; the hub is being told.
    Unregistering,
    /// Both pumps gone.
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Connecting => "connecting",
            ClientState::Registered => "registered",
            ClientState::Active => "active",
            ClientState::Unregistering => "unregistering",
            ClientState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Create a client with an outbound queue of `capacity` slots.
///
/// Returns the record to register with the hub, the handle for the pumps and
/// the queue receiver for the write pump.
pub fn create_client(id: ClientId, capacity: usize) -> (Client, ClientHandle, OutboundReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let session = Uuid::new_v4();
    let handle = ClientHandle {
        id,
        session,
        outbound: sender.downgrade(),
        cancel: CancellationToken::new(),
    };
    let client = Client {
        id,
        session,
        sender,
        metadata: ClientMetadata::now(),
    };
    (client, handle, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Protocol;

    fn text(id: ClientId, s: &str) -> Outbound {
        Arc::new(Envelope::new(Protocol::BroadcastText, id, s))
    }

    #[test]
    fn test_client_creation() {
        let (client, handle, _rx) = create_client(7, 1);
        assert_eq!(client.id, 7);
        assert_eq!(handle.id, 7);
        assert_eq!(client.session, handle.session);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_sessions_are_unique() {
        let (a, _, _) = create_client(1, 1);
        let (b, _, _) = create_client(1, 1);
        assert_ne!(a.session, b.session);
    }

    #[test]
    fn test_offer_full_queue() {
        let (client, _handle, mut rx) = create_client(3, 1);

        client.offer(text(1, "first")).unwrap();
        let err = client.offer(text(1, "second")).unwrap_err();
        assert!(matches!(err, HubError::SlowConsumer(3)));

        assert_eq!(rx.try_recv().unwrap().data, "first");
    }

    #[test]
    fn test_offer_after_receiver_dropped() {
        let (client, _handle, rx) = create_client(3, 1);
        drop(rx);
        assert!(matches!(
            client.offer(text(1, "x")),
            Err(HubError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_reply_reaches_own_queue() {
        let (_client, handle, mut rx) = create_client(1, 1);

        handle
            .reply(Envelope::new(Protocol::RosterQuery, 1, "1:Clement"))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.protocol, Protocol::RosterQuery);
        assert_eq!(msg.data, "1:Clement");
    }

    #[tokio::test]
    async fn test_dropping_client_closes_queue() {
        let (client, handle, mut rx) = create_client(1, 1);
        drop(client);

        assert!(rx.recv().await.is_none());
        assert!(matches!(
            handle
                .reply(Envelope::new(Protocol::RosterQuery, 1, ""))
                .await,
            Err(HubError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_reply_gives_up_when_cancelled() {
        let (client, handle, _rx) = create_client(1, 1);
        client.offer(text(1, "fills the queue")).unwrap();

        handle.cancel();
        let res = handle
            .reply(Envelope::new(Protocol::RosterQuery, 1, ""))
            .await;
        assert!(matches!(res, Err(HubError::ChannelClosed)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ClientState::Unregistering.to_string(), "unregistering");
    }
}
