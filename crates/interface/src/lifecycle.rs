use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chain_core::ready::{ReadyWaiter, ready};
use parking_lot::Mutex;
use rustls_pki_types::ServerName;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::addr::{Protocol, ProxyConfig, ServerAddr};
use crate::chain::{ChainHandle, ChainRegistry};
use crate::dial;
use crate::error::{Error, GracefulDisconnect};
use crate::follower::TipFollower;
use crate::header::Header;
use crate::network::NetworkHandle;
use crate::reconciler::{HeaderFetcher, HeaderReconciler, ReconcilerState};
use crate::session::{self, NotificationSession, SessionHandle};
use crate::trust::TrustStore;

const KEEP_ALIVE_IDLE: Duration = Duration::from_secs(300);
const PING_TIMEOUT: Duration = Duration::from_secs(5);
const HEADER_FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// What the facade reads without going through the lifecycle task: the
/// current tip, the working chain, and a fetcher for one-off header lookups.
/// Written only by the lifecycle/follower pair, under `bhi_lock` where the
/// write touches `blockchain`.
#[derive(Debug, Default)]
pub struct SharedState {
	tip: AtomicU32,
	blockchain: Mutex<Option<Arc<dyn ChainHandle>>>,
	fetcher: Mutex<Option<Arc<dyn HeaderFetcher>>>,
	last_error: Mutex<Option<String>>,
}

impl SharedState {
	pub fn tip(&self) -> u32 {
		self.tip.load(Ordering::SeqCst)
	}

	pub fn blockchain(&self) -> Option<Arc<dyn ChainHandle>> {
		self.blockchain.lock().clone()
	}

	pub fn last_error(&self) -> Option<String> {
		self.last_error.lock().clone()
	}

	pub(crate) fn set_tip(&self, tip: u32) {
		self.tip.fetch_max(tip, Ordering::SeqCst);
	}

	pub(crate) fn set_blockchain(&self, chain: Arc<dyn ChainHandle>) {
		*self.blockchain.lock() = Some(chain);
	}

	fn set_fetcher(&self, fetcher: Arc<dyn HeaderFetcher>) {
		*self.fetcher.lock() = Some(fetcher);
	}

	pub(crate) fn fetcher(&self) -> Option<Arc<dyn HeaderFetcher>> {
		self.fetcher.lock().clone()
	}
}

/// Everything needed to run one persistent connection to one server:
/// TLS/plain bootstrap, the `server.version`/`headers.subscribe` handshake,
/// and the keep-alive loop. `run` never returns except by error.
pub struct ConnectionLifecycle {
	pub addr: ServerAddr,
	pub trust_store: TrustStore,
	pub proxy: Option<ProxyConfig>,
	pub registry: Arc<ChainRegistry>,
	pub network: Arc<dyn NetworkHandle>,
	pub client_version: String,
	pub protocol_version: String,
}

pub struct LifecycleHandle {
	pub ready: ReadyWaiter<()>,
	pub shared: Arc<SharedState>,
	pub task: JoinHandle<()>,
}

/// Fetches headers through the live session, for the reconciler and for the
/// facade's one-off `get_block_header`.
struct SessionFetcher {
	session: Arc<NotificationSession>,
}

#[async_trait::async_trait]
impl HeaderFetcher for SessionFetcher {
	async fn get_block_header(&self, height: u32) -> Result<Header, Error> {
		let reply = timeout(HEADER_FETCH_TIMEOUT, self.session.call("blockchain.block.header", json!([height])))
			.await
			.map_err(|_| Error::Timeout("blockchain.block.header"))?
			.map_err(Error::from)?;
		let hex_str: String =
			serde_json::from_value(reply).map_err(|e| Error::Session(session::Error::Decode(e)))?;
		Header::from_hex(height, &hex_str).map_err(|e| Error::Session(session::Error::HeaderDecode(e)))
	}
}

impl ConnectionLifecycle {
	pub fn spawn(self) -> LifecycleHandle {
		let (ready_tx, ready_rx) = ready();
		let shared = Arc::new(SharedState::default());
		let genesis = self.registry.get(0).expect("genesis is always registered at forkpoint 0");
		shared.set_blockchain(genesis);
		let shared_for_task = shared.clone();
		let host = self.addr.host.clone();
		let task = tokio::spawn(async move {
			if let Err(e) = self.run(ready_tx, shared_for_task.clone()).await {
				warn!(%host, error = %e, "connection lifecycle ended");
				*shared_for_task.last_error.lock() = Some(e.to_string());
			}
		});
		LifecycleHandle { ready: ready_rx, shared, task }
	}

	async fn run(
		self,
		ready_tx: chain_core::ready::Ready<()>,
		shared: Arc<SharedState>,
	) -> Result<(), Error> {
		let host = self.addr.host.clone();
		let port = self.addr.port;

		let raw = dial::dial(&host, port, self.proxy.as_ref())
			.await
			.map_err(|e| Error::NetworkUnreachable { addr: None, source: e })?;

		let SessionHandle { session, mut headers, mut done } = match self.addr.protocol {
			Protocol::Plain => NotificationSession::open(raw, host.clone()),
			Protocol::Tls => {
				let tls_config = self.trust_store.load_or_bootstrap(&host, port, self.proxy.as_ref()).await?;
				let connector = tokio_rustls::TlsConnector::from(tls_config);
				let server_name = ServerName::try_from(host.clone())
					.map_err(|_| GracefulDisconnect::new(format!("{host:?} is not a valid TLS server name")))?;
				let tls_stream = connector
					.connect(server_name, raw)
					.await
					.map_err(|e| Error::NetworkUnreachable { addr: None, source: e })?;
				NotificationSession::open(tls_stream, host.clone())
			},
		};
		let session = Arc::new(session);

		match session.call("server.version", json!([self.client_version, self.protocol_version])).await {
			Ok(reply) => debug!(%host, %reply, "server.version handshake complete"),
			Err(session::Error::Rpc(rpc_err)) => {
				return Err(GracefulDisconnect::new(format!("server.version rejected: {}", rpc_err.message)).into());
			},
			Err(e) => return Err(e.into()),
		}

		let subscribe_reply = session.call("blockchain.headers.subscribe", json!([])).await?;
		let (tip_header, tip) = parse_subscribe_reply(&subscribe_reply)?;

		let initial_chain = self.registry.check_header(&tip_header).unwrap_or_else(|| {
			self.registry.get(0).expect("genesis is always registered at forkpoint 0")
		});
		shared.set_blockchain(initial_chain.clone());
		shared.set_tip(tip);

		let fetcher: Arc<dyn HeaderFetcher> = Arc::new(SessionFetcher { session: session.clone() });
		shared.set_fetcher(fetcher.clone());
		ready_tx.set(());
		info!(%host, tip, "interface ready");

		let reconciler =
			Arc::new(HeaderReconciler { registry: self.registry.clone(), network: self.network.clone(), fetcher });
		let state = ReconcilerState { blockchain: initial_chain, tip };

		let (copy_tx, copy_rx) = mpsc::unbounded_channel();
		let _ = copy_tx.send((tip, tip_header));

		let follower = TipFollower { reconciler, network: self.network.clone() };
		let bhi_lock = self.network.bhi_lock();
		let shared_for_follower = shared.clone();
		let follower_task = tokio::spawn(async move { follower.run(state, copy_rx, bhi_lock, shared_for_follower).await });

		let result: Result<(), Error> = loop {
			tokio::select! {
				received = headers.recv() => {
					match received {
						Some(header) => {
							shared.set_tip(header.block_height);
							if copy_tx.send((header.block_height, header)).is_err() {
								break Err(GracefulDisconnect::new("tip follower task is gone").into());
							}
						},
						None => break Err(GracefulDisconnect::new("header queue closed").into()),
					}
				},
				reason = &mut done => {
					let reason = reason.unwrap_or_else(|_| "session task gone".to_string());
					break Err(GracefulDisconnect::new(reason).into());
				},
				_ = sleep(KEEP_ALIVE_IDLE) => {
					match timeout(PING_TIMEOUT, session.call("server.ping", json!([]))).await {
						Ok(Ok(_)) => continue,
						Ok(Err(e)) => break Err(GracefulDisconnect::new(format!("server.ping failed: {e}")).into()),
						Err(_) => break Err(GracefulDisconnect::new("server.ping timed out").into()),
					}
				},
			}
		};

		follower_task.abort();
		match follower_task.await {
			Ok(Ok(())) | Err(_) => {},
			Ok(Err(e)) if result.is_ok() => return Err(e),
			Ok(Err(_)) => {},
		}
		result
	}
}

fn parse_subscribe_reply(value: &serde_json::Value) -> Result<(Header, u32), Error> {
	#[derive(serde::Deserialize)]
	struct Reply {
		hex: String,
		height: u32,
	}
	let reply: Reply =
		serde_json::from_value(value.clone()).map_err(|e| Error::Session(session::Error::Decode(e)))?;
	let header =
		Header::from_hex(reply.height, &reply.hex).map_err(|e| Error::Session(session::Error::HeaderDecode(e)))?;
	Ok((header, reply.height))
}
