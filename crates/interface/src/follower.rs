use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use crate::chain::ChainHandle;
use crate::error::Error;
use crate::header::Header;
use crate::lifecycle::SharedState;
use crate::network::NetworkHandle;
use crate::reconciler::{HeaderReconciler, ReconcilerState};

/// Consumes the lifecycle's copy-queue of tip headers and drives the
/// reconciler, one header at a time, serialized on the process-wide
/// `bhi_lock` so no two interfaces mutate the chain database concurrently.
pub struct TipFollower {
	pub reconciler: Arc<HeaderReconciler>,
	pub network: Arc<dyn NetworkHandle>,
}

impl TipFollower {
	pub async fn run(
		&self,
		mut state: ReconcilerState,
		mut updates: mpsc::UnboundedReceiver<(u32, Header)>,
		bhi_lock: Arc<Mutex<()>>,
		shared: Arc<SharedState>,
	) -> Result<(), Error> {
		let mut tracking_height = state.blockchain.height() + 1;

		while let Some((_, header)) = updates.recv().await {
			let _guard = bhi_lock.lock().await;

			if state.blockchain.height() < header.block_height.saturating_sub(1) {
				let (_, next_h) =
					self.reconciler.sync_until(&mut state, state.blockchain.height() + 1, None).await?;
				tracking_height = next_h;
			} else if state.blockchain.height() >= tracking_height && state.blockchain.contains(&header) {
				trace!(height = header.block_height, "header already integrated by another interface");
			} else {
				let (outcome, next_h) = self.reconciler.step(&mut state, tracking_height, Some(header)).await?;
				trace!(?outcome, tracking_height, next_h, "reconciler step");
				state.tip = state.tip.max(tracking_height);
				tracking_height = next_h;
			}

			shared.set_tip(state.tip);
			shared.set_blockchain(state.blockchain.clone());
			self.network.notify_updated();
		}
		Ok(())
	}
}
