use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Error;

/// Result of a bulk header fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResult {
	pub could_connect: bool,
	pub num_headers: u32,
}

/// The parent coordinator this interface reports to. Out of scope for this
/// crate's own implementation (it owns the chain registry's sibling
/// interfaces, connection supervision, and reconnect policy); this trait is
/// the contract the reconciler and lifecycle need from it.
#[async_trait::async_trait]
pub trait NetworkHandle: Send + Sync {
	/// Fetches up to one 2016-header chunk starting at `idx`, connecting it
	/// onto the local chain if possible. `tip` bounds how many headers the
	/// server is asked for.
	async fn request_chunk(&self, idx: u32, tip: u32) -> Result<ChunkResult, Error>;

	/// No reconciliation step ever reads or mutates state at or below this
	/// height; it is assumed truth.
	fn max_checkpoint(&self) -> u32;

	/// The single lock serializing chain-mutating reconciliation steps
	/// across every interface in the process.
	fn bhi_lock(&self) -> Arc<Mutex<()>>;

	/// Fired once per `TipFollower` iteration after the registry has settled.
	fn notify_updated(&self);
}
