//! CSU gateway ledger.
//!
//! Owns upload sessions from creation to close:
//! - **Handlers**: InitSession, CommitRootProof, DistributeBatch, FinalizeAndCloseSession,
//!   AbortAndCloseSession
//! - **Distribution**: dedup, proof verification and round-robin placement of fragments
//! - **Correlator**: resolves packet acknowledgements and timeouts back to sessions
//! - **Authorization**: session-bound finalize grants, revoked when a session closes
//! - **Expiry**: closes sessions that outlive their deadline
//!
//! `GatewayNode` ties these together over a `KvStore` and a `PacketTransport`.

pub mod authz;
pub mod background;
pub mod config;
pub mod context;
pub mod correlator;
pub mod distribution;
pub mod error;
pub mod expiry;
pub mod handlers;
pub mod messages;
pub mod metrics;
pub mod node;
pub mod state;
pub mod transport;

pub use authz::{Authorization, FeeAllowance, Grant};
pub use config::{CsuParams, GatewayConfig};
pub use context::BlockContext;
pub use correlator::{PacketOutcome, Resolution};
pub use error::{CsuError, ErrorKind, Result};
pub use messages::*;
pub use node::{ChannelRole, GatewayNode};
pub use state::{Session, SessionState};
pub use transport::{LogTransport, OutboundPacket, PacketTransport, RecordingTransport};
