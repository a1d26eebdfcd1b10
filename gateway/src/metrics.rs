//! Prometheus metrics for the gateway ledger.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `csu_sessions_opened_total` | Counter | Sessions created by InitSession |
//! | `csu_sessions_closed_total` | Counter | Sessions closed, by outcome |
//! | `csu_fragments_distributed_total` | Counter | Fragments sent to storage channels |
//! | `csu_manifests_sent_total` | Counter | Manifests sent to the metadata channel |
//! | `csu_packet_outcomes_total` | Counter | Resolved packet outcomes, by packet kind and outcome |
//! | `csu_rejected_calls_total` | Counter | Rejected operations, by operation and error kind |

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;

use crate::context::LedgerEvent;
use crate::error::ErrorKind;

/// Prometheus metrics collection for the gateway.
///
/// Uses `parking_lot::RwLock` for the registry to allow concurrent reads during encoding.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<RwLock<Registry>>,
    pub sessions_opened: Counter,
    pub sessions_closed: Family<[(String, String); 1], Counter>, // outcome
    pub fragments_distributed: Counter,
    pub manifests_sent: Counter,
    pub packet_outcomes: Family<[(String, String); 2], Counter>, // kind, outcome
    pub rejected_calls: Family<[(String, String); 2], Counter>,  // operation, kind
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let sessions_opened = Counter::default();
        registry.register(
            "csu_sessions_opened",
            "Sessions created",
            sessions_opened.clone(),
        );

        let sessions_closed = Family::<[(String, String); 1], Counter>::default();
        registry.register(
            "csu_sessions_closed",
            "Sessions closed by outcome",
            sessions_closed.clone(),
        );

        let fragments_distributed = Counter::default();
        registry.register(
            "csu_fragments_distributed",
            "Fragments sent to storage channels",
            fragments_distributed.clone(),
        );

        let manifests_sent = Counter::default();
        registry.register(
            "csu_manifests_sent",
            "Manifests sent to the metadata channel",
            manifests_sent.clone(),
        );

        let packet_outcomes = Family::<[(String, String); 2], Counter>::default();
        registry.register(
            "csu_packet_outcomes",
            "Resolved packet outcomes by packet kind and outcome",
            packet_outcomes.clone(),
        );

        let rejected_calls = Family::<[(String, String); 2], Counter>::default();
        registry.register(
            "csu_rejected_calls",
            "Rejected operations by operation and error kind",
            rejected_calls.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            sessions_opened,
            sessions_closed,
            fragments_distributed,
            manifests_sent,
            packet_outcomes,
            rejected_calls,
        }
    }

    /// Count an event from a committed call.
    pub fn record(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::SessionOpened => {
                self.sessions_opened.inc();
            }
            LedgerEvent::SessionClosed(state) => {
                self.sessions_closed
                    .get_or_create(&[("outcome".to_string(), state.as_str().to_string())])
                    .inc();
            }
            LedgerEvent::FragmentsDistributed(n) => {
                self.fragments_distributed.inc_by(*n);
            }
            LedgerEvent::ManifestSent => {
                self.manifests_sent.inc();
            }
            LedgerEvent::PacketResolved { kind, outcome } => {
                self.packet_outcomes
                    .get_or_create(&[
                        ("kind".to_string(), kind.to_string()),
                        ("outcome".to_string(), outcome.to_string()),
                    ])
                    .inc();
            }
        }
    }

    pub fn record_rejection(&self, operation: &str, kind: ErrorKind) {
        self.rejected_calls
            .get_or_create(&[
                ("operation".to_string(), operation.to_string()),
                ("kind".to_string(), kind.as_str().to_string()),
            ])
            .inc();
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(e) = encode(&mut buffer, &registry) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return format!("# Error encoding metrics: {}", e);
        }
        buffer
    }
}
