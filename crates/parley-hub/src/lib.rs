//! # Parley Hub
//!
//! Broadcast core for the Parley chat relay.
//!
//! Clients hold a persistent connection; any text one client sends is fanned
//! out to every connected client, the sender included.
//!
//! ## Components
//!
//! - **Envelope**: the JSON unit exchanged with clients (`protocal`, `id`, `data`)
//! - **Directory**: read-only `id -> name` map consulted at connect time and
//!   for roster queries
//! - **Hub**: the only owner of the active client set; one control loop,
//!   three mailboxes, no locks
//! - **Pumps**: a read loop and a write loop per connection
//!
//! ## Protocol Tags
//!
//! | tag    | meaning        | reply                                  |
//! |--------|----------------|----------------------------------------|
//! | `0001` | roster query   | to the requester only: `1:Clement,...` |
//! | `0002` | broadcast text | to everyone, newlines folded, trimmed  |
//!
//! ## Example
//!
//! ```rust
//! use parley_hub::{create_client, Envelope, Hub, Protocol};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (hub, handle) = Hub::new(64);
//! tokio::spawn(hub.run());
//!
//! let (client, _pump_handle, mut outbound) = create_client(1, 1);
//! handle.register(client).await.unwrap();
//!
//! handle
//!     .broadcast(Envelope::new(Protocol::BroadcastText, 1, "hello"))
//!     .await
//!     .unwrap();
//!
//! let message = outbound.recv().await.unwrap();
//! assert_eq!(message.data, "hello");
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  read pump ──broadcast──┐                    ┌──> queue ──> write pump
//!  read pump ──unregister─┼──> Hub::run ──try_send──> queue ──> write pump
//!  bootstrap ──register───┘   (client map)     └──> queue ──> write pump
//! ```
//!
//! A client whose queue is full when a broadcast arrives is evicted on the
//! spot. No client can slow the hub down.

pub mod client;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod pump;

// Re-export main types
pub use client::{
    create_client, Client, ClientHandle, ClientId, ClientMetadata, ClientState, Outbound,
    OutboundReceiver,
};
pub use directory::{UserDirectory, UserEntry};
pub use envelope::{sanitize_text, Envelope, Protocol, BROADCAST_TEXT, ROSTER_QUERY};
pub use error::HubError;
pub use hub::{Hub, HubHandle, HubStats, DEFAULT_MAILBOX_SIZE};
pub use pump::{read_pump, write_pump, Frame, KeepaliveConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api() {
        let (_hub, handle) = Hub::new(DEFAULT_MAILBOX_SIZE);
        assert_eq!(handle.stats(), HubStats::default());
    }
}
