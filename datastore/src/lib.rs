//! CSU receiving ledgers.
//!
//! The far ends of gateway channels: a storage ledger that files fragments and a metadata
//! ledger that publishes manifests. Both answer every packet with an `Acknowledgement`
//! the relayer carries back to the gateway.

pub mod config;
pub mod error;
pub mod fragments;
pub mod manifests;
pub mod receiver;

pub use config::{DatastoreConfig, LedgerRole};
pub use error::{DatastoreError, Result};
pub use fragments::{FragmentStore, StoredFragment};
pub use manifests::{ManifestStore, StoredManifest};
pub use receiver::ReceivingLedger;
