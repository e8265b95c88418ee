//! PQC Signaling - Rendezvous and Admission Control
//!
//! This library provides the signaling core that lets two peers find each
//! other and exchange connection-setup messages, gated by authorization
//! grants that can advertise post-quantum key material.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod service;

pub use auth::{AuthorizationGrant, GrantAuthority, GrantError, RoomGrant};
pub use config::{ClientConfig, ServerConfig};
pub use crypto::kyber::PqKeyPair;
pub use directory::PeerDirectory;
pub use error::SignalError;
pub use protocol::{Inbound, Outbound};
pub use registry::ConnectionRegistry;
pub use router::SignalingRouter;
pub use service::SignalingServer;
