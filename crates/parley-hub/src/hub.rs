//! The hub: single owner of the active client set.
//!
//! All registration, unregistration and fan-out decisions are made inside
//! [`Hub::run`], one command at a time. The client map is never shared, so it
//! needs no lock. Everything else talks to the hub through a [`HubHandle`].

use crate::client::{Client, ClientId};
use crate::envelope::Envelope;
use crate::error::HubError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default capacity of each hub mailbox.
pub const DEFAULT_MAILBOX_SIZE: usize = 256;

/// Request to drop one specific registration.
#[derive(Debug, Clone, Copy)]
struct Unregister {
    id: ClientId,
    session: Uuid,
}

/// The hub control loop and the state it owns.
#[derive(Debug)]
pub struct Hub {
    /// Registered clients indexed by ID.
    clients: HashMap<ClientId, Client>,
    register_rx: mpsc::Receiver<Client>,
    unregister_rx: mpsc::Receiver<Unregister>,
    broadcast_rx: mpsc::Receiver<Envelope>,
    stats: HubStats,
    stats_tx: watch::Sender<HubStats>,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    pub fn new(mailbox_size: usize) -> (Self, HubHandle) {
        let mailbox_size = mailbox_size.max(1);
        let (register_tx, register_rx) = mpsc::channel(mailbox_size);
        let (unregister_tx, unregister_rx) = mpsc::channel(mailbox_size);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(mailbox_size);
        let (stats_tx, stats_rx) = watch::channel(HubStats::default());

        let hub = Self {
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            stats: HubStats::default(),
            stats_tx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats_rx,
        };
        (hub, handle)
    }

    /// Run the control loop until every [`HubHandle`] is dropped.
    ///
    /// Mailboxes are polled in order: register, unregister, broadcast. A
    /// registration that was accepted before a broadcast was sent is
    /// therefore always applied before that broadcast fans out.
    pub async fn run(mut self) {
        info!("Hub started");
        loop {
            tokio::select! {
                biased;
                Some(client) = self.register_rx.recv() => self.register(client),
                Some(req) = self.unregister_rx.recv() => self.unregister(req.id, req.session),
                Some(envelope) = self.broadcast_rx.recv() => self.broadcast(envelope),
                else => break,
            }
            self.publish_stats();
        }
        info!("Hub stopped");
    }

    fn register(&mut self, client: Client) {
        let id = client.id;
        let session = client.session;
        if let Some(prior) = self.clients.insert(id, client) {
            // Dropping the prior record closes its queue; its write pump
            // sends a close frame and takes the read pump down with it.
            warn!(
                client_id = id,
                prior_session = %prior.session,
                session = %session,
                "Duplicate id registered, closing prior connection"
            );
            self.stats.total_replaced += 1;
        }
        self.stats.total_connections += 1;
        info!(client_id = id, session = %session, clients = self.clients.len(), "Client registered");
    }

    fn unregister(&mut self, id: ClientId, session: Uuid) {
        match self.clients.get(&id) {
            Some(client) if client.session == session => {
                if let Some(client) = self.clients.remove(&id) {
                    info!(
                        client_id = id,
                        session = %session,
                        connected_secs = client.metadata.age_secs(),
                        clients = self.clients.len(),
                        "Client unregistered"
                    );
                }
            }
            Some(_) => {
                debug!(client_id = id, session = %session, "Stale unregister ignored");
            }
            None => {
                debug!(client_id = id, session = %session, "Unregister for absent client ignored");
            }
        }
    }

    fn broadcast(&mut self, envelope: Envelope) {
        let message = Arc::new(envelope);
        let mut evicted = Vec::new();

        for client in self.clients.values() {
            if let Err(e) = client.offer(message.clone()) {
                evicted.push((client.id, client.session, e));
            }
        }

        let recipients = self.clients.len() - evicted.len();
        for (id, session, reason) in evicted {
            warn!(client_id = id, error = %reason, "Evicting client");
            self.unregister(id, session);
            self.stats.total_evictions += 1;
        }
        self.stats.total_broadcasts += 1;

        debug!(
            sender = message.id,
            protocol = %message.protocol,
            recipients,
            "Broadcast delivered"
        );
    }

    fn publish_stats(&mut self) {
        let mut active_clients: Vec<ClientId> = self.clients.keys().copied().collect();
        active_clients.sort_unstable();
        self.stats.current_connections = active_clients.len();
        self.stats.active_clients = active_clients;
        self.stats_tx.send_replace(self.stats.clone());
    }
}

/// Cloneable entry point to a running [`Hub`].
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Client>,
    unregister_tx: mpsc::Sender<Unregister>,
    broadcast_tx: mpsc::Sender<Envelope>,
    stats_rx: watch::Receiver<HubStats>,
}

impl HubHandle {
    /// Hand a client to the hub.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| HubError::HubClosed)
    }

    /// Drop a registration. Does nothing if the client is already gone or
    /// the id now belongs to a different session.
    pub async fn unregister(&self, id: ClientId, session: Uuid) -> Result<(), HubError> {
        self.unregister_tx
            .send(Unregister { id, session })
            .await
            .map_err(|_| HubError::HubClosed)
    }

    /// Fan an envelope out to every registered client.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.broadcast_tx
            .send(envelope)
            .await
            .map_err(|_| HubError::HubClosed)
    }

    /// Latest published statistics.
    pub fn stats(&self) -> HubStats {
        self.stats_rx.borrow().clone()
    }

    /// Wait until the published statistics satisfy `predicate`.
    pub async fn wait_for_stats<F>(&self, predicate: F) -> Result<HubStats, HubError>
    where
        F: FnMut(&HubStats) -> bool,
    {
        let mut rx = self.stats_rx.clone();
        let stats = rx
            .wait_for(predicate)
            .await
            .map_err(|_| HubError::HubClosed)?;
        Ok(stats.clone())
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Ids currently registered, ascending.
    pub active_clients: Vec<ClientId>,
    /// Total registrations since start.
    pub total_connections: u64,
    /// Registrations that replaced a live one with the same id.
    pub total_replaced: u64,
    /// Total broadcasts fanned out since start.
    pub total_broadcasts: u64,
    /// Clients dropped for not keeping up.
    pub total_evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{create_client, OutboundReceiver};
    use crate::envelope::Protocol;
    use std::time::Duration;

    fn spawn_hub() -> HubHandle {
        let (hub, handle) = Hub::new(16);
        tokio::spawn(hub.run());
        handle
    }

    async fn connect(hub: &HubHandle, id: ClientId, capacity: usize) -> (Uuid, OutboundReceiver) {
        let (client, handle, rx) = create_client(id, capacity);
        hub.register(client).await.unwrap();
        (handle.session, rx)
    }

    async fn wait_for(hub: &HubHandle, f: impl FnMut(&HubStats) -> bool) -> HubStats {
        tokio::time::timeout(Duration::from_secs(5), hub.wait_for_stats(f))
            .await
            .expect("hub stats never matched")
            .unwrap()
    }

    fn text(id: ClientId, s: &str) -> Envelope {
        Envelope::new(Protocol::BroadcastText, id, s)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let hub = spawn_hub();
        let (session, _rx) = connect(&hub, 1, 1).await;

        let stats = wait_for(&hub, |s| s.current_connections == 1).await;
        assert_eq!(stats.active_clients, vec![1]);
        assert_eq!(stats.total_connections, 1);

        hub.unregister(1, session).await.unwrap();
        let stats = wait_for(&hub, |s| s.current_connections == 0).await;
        assert!(stats.active_clients.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_harmless() {
        let hub = spawn_hub();
        let (session, mut rx) = connect(&hub, 1, 1).await;

        hub.unregister(1, session).await.unwrap();
        hub.unregister(1, session).await.unwrap();
        hub.unregister(42, Uuid::new_v4()).await.unwrap();

        // Queue closed once, hub still serving.
        assert!(rx.recv().await.is_none());
        let (_s, _rx2) = connect(&hub, 2, 1).await;
        let stats = wait_for(&hub, |s| s.active_clients == vec![2]).await;
        assert_eq!(stats.total_connections, 2);
    }

    #[tokio::test]
    async fn test_broadcast_includes_sender() {
        let hub = spawn_hub();
        let (_s1, mut rx1) = connect(&hub, 1, 1).await;
        let (_s2, mut rx2) = connect(&hub, 2, 1).await;

        hub.broadcast(text(1, "Hello World")).await.unwrap();

        let m1 = rx1.recv().await.unwrap();
        let m2 = rx2.recv().await.unwrap();
        assert_eq!(m1.id, 1);
        assert_eq!(m1.data, "Hello World");
        assert_eq!(*m1, *m2);
    }

    #[tokio::test]
    async fn test_register_applied_before_later_broadcast() {
        let hub = spawn_hub();
        let (_s1, mut rx1) = connect(&hub, 1, 1).await;
        hub.broadcast(text(1, "mine")).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().data, "mine");
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        let hub = spawn_hub();
        let (_s1, mut rx1) = connect(&hub, 1, 1).await;
        let (_s2, mut rx2) = connect(&hub, 2, 1).await;
        wait_for(&hub, |s| s.current_connections == 2).await;

        // Client 2 never reads, so its single slot stays full.
        hub.broadcast(text(1, "one")).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().data, "one");

        hub.broadcast(text(1, "two")).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().data, "two");

        let stats = wait_for(&hub, |s| s.current_connections == 1).await;
        assert_eq!(stats.active_clients, vec![1]);
        assert_eq!(stats.total_evictions, 1);

        // Whatever was queued drains, then the queue reports closed.
        assert_eq!(rx2.recv().await.unwrap().data, "one");
        assert!(rx2.recv().await.is_none());

        hub.broadcast(text(1, "three")).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().data, "three");
    }

    #[tokio::test]
    async fn test_closed_receiver_is_evicted() {
        let hub = spawn_hub();
        let (_s1, rx1) = connect(&hub, 1, 1).await;
        drop(rx1);

        hub.broadcast(text(1, "anyone?")).await.unwrap();
        let stats = wait_for(&hub, |s| s.total_broadcasts == 1).await;
        assert_eq!(stats.current_connections, 0);
        assert_eq!(stats.total_evictions, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_replaces_prior() {
        let hub = spawn_hub();
        let (old_session, mut old_rx) = connect(&hub, 1, 1).await;
        let (new_session, mut new_rx) = connect(&hub, 1, 1).await;

        // Prior registration's queue is closed by the replacement.
        assert!(old_rx.recv().await.is_none());

        let stats = wait_for(&hub, |s| s.total_replaced == 1).await;
        assert_eq!(stats.active_clients, vec![1]);

        // A late unregister from the old connection must not evict the new one.
        hub.unregister(1, old_session).await.unwrap();
        hub.broadcast(text(1, "still here")).await.unwrap();
        assert_eq!(new_rx.recv().await.unwrap().data, "still here");

        hub.unregister(1, new_session).await.unwrap();
        wait_for(&hub, |s| s.current_connections == 0).await;
    }

    #[tokio::test]
    async fn test_handle_errors_after_hub_stops() {
        let (hub, handle) = Hub::new(1);
        drop(hub);

        assert!(matches!(
            handle.broadcast(text(1, "x")).await,
            Err(HubError::HubClosed)
        ));
        let (client, _h, _rx) = create_client(1, 1);
        assert!(matches!(
            handle.register(client).await,
            Err(HubError::HubClosed)
        ));
    }

    #[tokio::test]
    async fn test_run_returns_when_handles_dropped() {
        let (hub, handle) = Hub::new(4);
        let task = tokio::spawn(hub.run());
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("hub did not stop")
            .unwrap();
    }
}
