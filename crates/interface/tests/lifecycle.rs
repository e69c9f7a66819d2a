mod common;

use std::sync::Arc;
use std::time::Duration;

use chain_interface::chain::memory::MemoryChain;
use chain_interface::chain::{ChainHandle, ChainRegistry};
use chain_interface::lifecycle::ConnectionLifecycle;
use chain_interface::trust::TrustStore;
use chain_interface::{ChunkResult, Error, Header, NetworkHandle, Protocol, ServerAddr};
use common::fake_server::FakeServer;
use tokio::sync::Mutex;

struct NullNetwork;

#[async_trait::async_trait]
impl NetworkHandle for NullNetwork {
	async fn request_chunk(&self, _idx: u32, _tip: u32) -> Result<ChunkResult, Error> {
		Ok(ChunkResult { could_connect: false, num_headers: 0 })
	}
	fn max_checkpoint(&self) -> u32 {
		0
	}
	fn bhi_lock(&self) -> Arc<Mutex<()>> {
		Arc::new(Mutex::new(()))
	}
	fn notify_updated(&self) {}
}

fn header_hex(height: u32, prev: [u8; 32], tag: u8) -> (Header, String) {
	let mut payload = [0u8; 48];
	payload[0] = tag;
	let header = Header::new(height, prev, payload);
	let hex = header.to_hex();
	(header, hex)
}

fn lifecycle(port: u16, certs_dir: &std::path::Path) -> ConnectionLifecycle {
	ConnectionLifecycle {
		addr: ServerAddr { host: "127.0.0.1".to_string(), port, protocol: Protocol::Plain },
		trust_store: TrustStore::new(certs_dir),
		proxy: None,
		registry: Arc::new(ChainRegistry::new(MemoryChain::genesis(Vec::new()))),
		network: Arc::new(NullNetwork),
		client_version: "test-client".to_string(),
		protocol_version: "1.4".to_string(),
	}
}

#[tokio::test]
async fn bootstrap_subscribe_and_header_push_end_to_end() {
	let (server, port) = FakeServer::bind().await;
	let (header1, hex1) = header_hex(1, [0u8; 32], 1);
	let (_header2, hex2) = header_hex(2, header1.hash(), 2);
	let server_task = tokio::spawn(server.run(hex1, 1, vec![(hex2, 2)]));

	let certs_dir = tempfile::tempdir().unwrap();
	let mut handle = lifecycle(port, certs_dir.path()).spawn();

	tokio::time::timeout(Duration::from_secs(5), handle.ready.wait())
		.await
		.expect("lifecycle reached ready within the timeout");
	assert_eq!(handle.shared.tip(), 1);

	// The tip-follower task processes the pushed header asynchronously;
	// poll briefly rather than assuming it's already landed.
	for _ in 0..100 {
		if handle.shared.tip() >= 2 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert_eq!(handle.shared.tip(), 2);

	let chain = handle.shared.blockchain().expect("blockchain is set once ready");
	assert_eq!(chain.height(), 2);
	assert!(chain.contains(&header1));

	handle.task.abort();
	server_task.abort();
}

#[tokio::test]
async fn keep_alive_ping_survives_an_idle_period() {
	tokio::time::pause();

	let (server, port) = FakeServer::bind().await;
	let (_header1, hex1) = header_hex(1, [0u8; 32], 1);
	let server_task = tokio::spawn(server.run(hex1, 1, Vec::new()));

	let certs_dir = tempfile::tempdir().unwrap();
	let mut handle = lifecycle(port, certs_dir.path()).spawn();

	tokio::time::timeout(Duration::from_secs(5), handle.ready.wait())
		.await
		.expect("lifecycle reached ready within the timeout");

	// Past the keep-alive idle threshold: the lifecycle should issue a
	// server.ping, get an answer from the fake server, and keep running.
	// Resume real time afterward so the ping/pong round trip (ordinary
	// socket I/O, not a timer) settles on its own schedule.
	tokio::time::advance(Duration::from_secs(301)).await;
	tokio::time::resume();

	for _ in 0..100 {
		if handle.task.is_finished() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert!(!handle.task.is_finished(), "a successful keep-alive ping must not end the connection");

	handle.task.abort();
	server_task.abort();
}
