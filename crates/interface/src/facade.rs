use std::sync::Arc;
use std::time::Duration;

use chain_core::ready::ReadyWaiter;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::addr::{ProxyConfig, ServerAddr};
use crate::chain::{ChainHandle, ChainRegistry};
use crate::error::Error;
use crate::lifecycle::{ConnectionLifecycle, SharedState};
use crate::network::{ChunkResult, NetworkHandle};

const GET_HEADER_TIMEOUT: Duration = Duration::from_secs(1);

/// The public surface one interface exposes to its owning coordinator: a
/// handle on the lifecycle task plus the read-only state it publishes.
pub struct InterfaceFacade {
	ready: ReadyWaiter<()>,
	shared: Arc<SharedState>,
	network: Arc<dyn NetworkHandle>,
	task: JoinHandle<()>,
	host: String,
}

impl InterfaceFacade {
	pub fn new(
		network: Arc<dyn NetworkHandle>,
		server: ServerAddr,
		certs_dir: impl Into<std::path::PathBuf>,
		registry: Arc<ChainRegistry>,
		proxy: Option<ProxyConfig>,
	) -> Self {
		let host = server.host.clone();
		let lifecycle = ConnectionLifecycle {
			addr: server,
			trust_store: crate::trust::TrustStore::new(certs_dir),
			proxy,
			registry,
			network: network.clone(),
			client_version: env!("CARGO_PKG_NAME").to_string(),
			protocol_version: "1.4".to_string(),
		};
		let handle = lifecycle.spawn();
		InterfaceFacade { ready: handle.ready, shared: handle.shared, network, task: handle.task, host }
	}

	/// Resolves once the initial handshake and subscription have completed.
	pub async fn ready(&mut self) {
		self.ready.wait().await;
	}

	pub fn tip(&self) -> u32 {
		self.shared.tip()
	}

	pub fn blockchain(&self) -> Option<Arc<dyn ChainHandle>> {
		self.shared.blockchain()
	}

	pub fn last_error(&self) -> Option<String> {
		self.shared.last_error()
	}

	/// Cancels the lifecycle task; all of its children inherit cancellation.
	pub fn close(&self) {
		self.task.abort();
	}

	pub async fn get_block_header(&self, height: u32) -> Result<crate::header::Header, Error> {
		let fetcher = self
			.shared
			.fetcher()
			.ok_or_else(|| Error::Timeout("get_block_header called before the interface was ready"))?;
		timeout(GET_HEADER_TIMEOUT, fetcher.get_block_header(height))
			.await
			.map_err(|_| Error::Timeout("get_block_header"))?
	}

	pub async fn request_chunk(&self, idx: u32, tip: u32) -> Result<ChunkResult, Error> {
		self.network.request_chunk(idx, tip).await
	}

	pub fn diagnostic_name(&self) -> &str {
		&self.host
	}
}
