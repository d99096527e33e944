//! Mesh Network: socket bridge between process-local pub/sub cores.
//!
//! This crate links the [`mesh_core::Messenger`] of several processes over
//! TCP so that a value published in one process reaches subscribers in the
//! others, each delivered exactly once and tagged as network-originated.
//!
//! # Architecture
//!
//! - **Transport**: length-prefixed JSON frames over plain TCP.
//! - **Topology**: one hub listens on the server address; every process,
//!   the hub included, holds a single upstream connection to it.
//! - **Graph**: the hub collects NODE reports and pushes the full graph to
//!   every peer on each change.
//! - **Relay**: local samples go upstream (leaf) or to every other node
//!   (hub); network samples are never relayed again.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mesh_core::Messenger;
//! use mesh_network::{MeshNode, NetworkConfig};
//!
//! # async fn example() {
//! let messenger = Messenger::new();
//! let mut node = MeshNode::new(NetworkConfig::default(), messenger.clone());
//!
//! node.start().await.unwrap();
//! let temp = messenger.advertise("temp", "float");
//! temp.publish(21.5);
//! node.stop();
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod graph;
mod inbound;
pub mod message;
pub mod node;
pub mod outbound;
pub mod relay;
pub mod state;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use codec::{CodecError, FrameCodec};
pub use config::NetworkConfig;
pub use error::NetworkError;
pub use graph::{Graph, GraphStore, NodeAddress, NodeInfo};
pub use message::{Envelope, MessageKind};
pub use node::MeshNode;
pub use relay::RelayEngine;
pub use state::{BridgeEvent, BridgeState, NodeStatus};
pub use transport::{PeerLink, Side, TransportEvent};
