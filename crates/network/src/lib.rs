//! # bmnode network core
//!
//! The machinery of a lightweight peer-to-peer node for a
//! Bitmessage-style anonymous messaging overlay:
//!
//! - **Wire codec**: big-endian framing, varints, address records and the
//!   typed payloads of `version`, `verack`, `addr`, `inv`, `getdata`,
//!   `object`, `ping`, `pong` and `error`.
//! - **Object store**: the proof-of-work-protected payloads the overlay
//!   gossips, keyed by vector, with expiry and snapshot persistence.
//! - **Peer pools**: checked and unchecked IP and I2P peers, capped,
//!   sampled and persisted.
//! - **Connection workers**: one task per peer running the handshake,
//!   inventory synchronization, object serving and banning.
//! - **I2P SAM bridge**: a dialer and listener presenting I2P streams to
//!   the same connection workers.
//! - **Manager**: the periodic loop that prunes, persists, publishes our
//!   I2P destination and keeps outgoing connections topped up under a
//!   network-group diversity constraint.
//!
//! Everything shared lives on a single [`state::State`] created at
//! startup; workers receive an `Arc` of it and nothing else.

pub mod config;
pub mod connection;
pub mod error;
pub mod i2p;
pub mod listener;
pub mod manager;
pub mod messages;
pub mod peers;
pub mod pools;
pub mod pow;
pub mod state;
pub mod store;

pub use config::NetworkConfig;
pub use connection::{Connection, ConnectionDirection, ConnectionState};
pub use error::{NetworkError, NetworkResult};
pub use manager::Manager;
pub use messages::{Message, Object, Payload};
pub use peers::PeerAddr;
pub use state::State;
