use std::sync::Arc;

use tracing::debug;

use crate::chain::{ChainHandle, ChainRegistry};
use crate::error::{Error, GracefulDisconnect};
use crate::header::Header;
use crate::network::{ChunkResult, NetworkHandle};

/// A broken invariant in the reconciler itself: a bug, not a server fault.
/// The lifecycle converts this into a `GracefulDisconnect` at the task
/// boundary rather than panicking the process over one misbehaving peer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("reconciler invariant violated: {0}")]
pub struct FatalError(pub String);

/// Fetches a single header by height. Backed by the live session in
/// production; backed by a scripted table in tests.
#[async_trait::async_trait]
pub trait HeaderFetcher: Send + Sync {
	async fn get_block_header(&self, height: u32) -> Result<Header, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Catchup,
	Join,
	Conflict,
	Fork,
	NoFork,
}

/// The mutable part of reconciliation: which chain we're extending, and how
/// far the server's tip has been observed to reach.
pub struct ReconcilerState {
	pub blockchain: Arc<dyn ChainHandle>,
	pub tip: u32,
}

/// `sync_until`/`step`: backward exponential search plus binary search to
/// pinpoint a fork point against a potentially-forked local chain set, then
/// classification of the outcome. This is the core of the interface.
pub struct HeaderReconciler {
	pub registry: Arc<ChainRegistry>,
	pub network: Arc<dyn NetworkHandle>,
	pub fetcher: Arc<dyn HeaderFetcher>,
}

fn checkpoint_conflict() -> Error {
	GracefulDisconnect::new("server chain conflicts with checkpoints or genesis").into()
}

impl HeaderReconciler {
	/// Closes the gap `[h, target]` (`target` defaults to the last-seen
	/// tip), using bulk chunk fetches while the gap is wide and single-header
	/// `step`s once it narrows.
	pub async fn sync_until(
		&self,
		state: &mut ReconcilerState,
		mut h: u32,
		target: Option<u32>,
	) -> Result<(Outcome, u32), Error> {
		let target = target.unwrap_or(state.tip);
		let mut last = Outcome::Catchup;

		while target.saturating_sub(h) > 10 {
			let ChunkResult { could_connect, num_headers } = self.network.request_chunk(h, target).await?;
			if could_connect {
				h = (h / 2016) * 2016 + num_headers;
				state.tip = state.tip.max(h);
				last = Outcome::Catchup;
				continue;
			}
			if h <= self.network.max_checkpoint() {
				return Err(checkpoint_conflict());
			}
			let (outcome, next_h) = Box::pin(self.step(state, h, None)).await?;
			h = next_h;
			last = outcome;
		}

		while h < target {
			let (outcome, next_h) = Box::pin(self.step(state, h, None)).await?;
			h = next_h;
			last = outcome;
		}

		Ok((last, h))
	}

	/// `step(h, header?)`: the backward/binary search and fork-point
	/// classification. Accepts a candidate header from a tip notification;
	/// otherwise fetches one at `h`.
	pub async fn step(
		&self,
		state: &mut ReconcilerState,
		h: u32,
		header: Option<Header>,
	) -> Result<(Outcome, u32), Error> {
		if h == 0 {
			return Err(FatalError("step called with height 0".into()).into());
		}
		// The height under reconciliation is itself an observation of the
		// server's tip; `tip` only ever grows (invariant: monotone).
		state.tip = state.tip.max(h);
		let mut header = match header {
			Some(header) => header,
			None => self.fetcher.get_block_header(h).await?,
		};

		// Case 1: forward success.
		if self.registry.check_header(&header).is_some() {
			return Ok((Outcome::Catchup, h));
		}
		if let Some(chain) = self.registry.can_connect(&header, true) {
			chain.save_header(header);
			state.blockchain = chain;
			return Ok((Outcome::Catchup, h + 1));
		}

		// Case 2: backward phase, exponential retreat.
		let max_checkpoint = self.network.max_checkpoint();
		let mut bad = h;
		let mut bad_header = header.clone();
		let mut height = h.saturating_sub(1);
		let mut checkp = height <= max_checkpoint;
		if checkp {
			height = max_checkpoint + 1;
		}
		header = self.fetcher.get_block_header(height).await?;
		let mut chain_hit = self.registry.check_header(&header);
		let mut connect_hit = self.registry.can_connect(&header, true);
		if checkp && chain_hit.is_none() && connect_hit.is_none() {
			return Err(checkpoint_conflict());
		}
		while chain_hit.is_none() && connect_hit.is_none() {
			bad = height;
			bad_header = header.clone();
			let delta = state.tip.saturating_sub(height);
			let mut next_height = state.tip.saturating_sub(2 * delta);
			checkp = next_height <= max_checkpoint;
			if checkp {
				next_height = max_checkpoint + 1;
			}
			height = next_height;
			header = self.fetcher.get_block_header(height).await?;
			chain_hit = self.registry.check_header(&header);
			connect_hit = self.registry.can_connect(&header, true);
			if checkp && chain_hit.is_none() && connect_hit.is_none() {
				return Err(checkpoint_conflict());
			}
		}

		// Case 3: connect-after-backward.
		if let Some(chain) = connect_hit {
			chain.save_header(header);
			state.blockchain = chain;
			return Ok((Outcome::Catchup, height + 1));
		}

		// Case 4: binary phase. `chain_hit` must be set: the loop above only
		// exits when at least one of the two is.
		let good_chain = chain_hit
			.ok_or_else(|| FatalError("backward loop exited with neither a chain nor a connect hit".into()))?;
		state.blockchain = good_chain;
		let mut good = height;
		let mut mid = (bad + good) / 2;
		let mut mid_header = self.fetcher.get_block_header(mid).await?;

		loop {
			if let Some(chain) = self.registry.check_header(&mid_header) {
				good = mid;
				state.blockchain = chain;
			} else {
				bad = mid;
				bad_header = mid_header.clone();
			}
			debug!(bad, good, "binary search narrowing toward fork point");

			if bad != good + 1 {
				mid = (bad + good) / 2;
				mid_header = self.fetcher.get_block_header(mid).await?;
				continue;
			}

			// Case 5: classification at fork point `bad`.
			if !state.blockchain.accepts_next(&bad_header, false) {
				return Err(FatalError(format!("unexpected bad header during binary search at height {bad}")).into());
			}

			let Some(branch) = self.registry.get(bad) else {
				if state.blockchain.height() > good {
					let new_branch: Arc<dyn ChainHandle> = Arc::from(state.blockchain.fork(bad_header.clone()));
					debug_assert_eq!(new_branch.forkpoint(), bad);
					self
						.registry
						.register(bad, new_branch.clone())
						.map_err(|e| FatalError(e.to_string()))?;
					state.blockchain = new_branch;
					return Ok((Outcome::Fork, bad + 1));
				}
				return if good < state.tip {
					Ok((Outcome::NoFork, good + 1))
				} else {
					Ok((Outcome::NoFork, good))
				};
			};

			if branch.contains(&bad_header) {
				return Ok((Outcome::Join, bad + 1));
			}

			let parent_contains = branch
				.parent_id()
				.and_then(|parent_id| self.registry.get(parent_id))
				.map(|parent| parent.contains(&mid_header));

			if let Some(true) = parent_contains {
				let parent_id = branch.parent_id().expect("parent_accepts implies a parent id");
				state.blockchain = self.registry.get(parent_id).expect("looked up above");
				mid = bad;
				mid_header = self.fetcher.get_block_header(bad).await?;
				debug!(bad, "reorg onto parent branch, resuming binary search");
				continue;
			}

			branch.truncate(0);
			branch.save_header(bad_header.clone());
			state.blockchain = branch;
			return Ok((Outcome::Conflict, bad + 1));
		}
	}
}
