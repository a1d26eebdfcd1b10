//! Round loop for the operator binary.

use common::KvStore;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::context::BlockContext;
use crate::node::GatewayNode;
use crate::transport::PacketTransport;

/// Drive end-of-round processing every `interval` until Ctrl-C.
///
/// `after_round` runs after each round, committed or not; the binary uses it to flush
/// the store.
pub async fn run_round_loop<S, T>(
    node: &mut GatewayNode<S, T>,
    interval: Duration,
    mut after_round: impl FnMut(&GatewayNode<S, T>),
) where
    S: KvStore,
    T: PacketTransport,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut height = node.block().height;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!(height, "Shutdown signal received, stopping round loop");
                break;
            }
        }

        height += 1;
        node.begin_block(BlockContext::now(height));
        match node.end_round() {
            Ok(closed) => debug!(height, expired = closed.len(), "Round complete"),
            Err(e) => error!(height, error = %e, "End-of-round processing failed"),
        }
        after_round(node);
    }
}
