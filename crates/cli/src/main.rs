mod config;
mod network;

use std::path::PathBuf;
use std::time::Duration;

use chain_interface::InterfaceFacade;
use chain_interface::chain::{ChainHandle, ChainRegistry};
use chain_interface::chain::memory::MemoryChain;
use clap::Parser;
use tracing::{info, warn};

use crate::config::Config;
use crate::network::DemoNetwork;

/// Demonstration harness for a single header-syncing connection: not a
/// wallet, just log lines showing tip/height as they're observed.
#[derive(Parser, Debug)]
#[command(name = "chain-interface-cli", version, about = "Single-server header sync demo")]
struct Cli {
	/// Server to connect to, as `host:port:s|t`. Overrides the config file's
	/// first entry if given.
	#[arg(long)]
	server: Option<String>,

	/// Directory for on-disk state (certificate cache, chain files).
	#[arg(long)]
	data_dir: Option<PathBuf>,

	/// Height below which the reconciler trusts its own history unconditionally.
	#[arg(long)]
	checkpoint: Option<u32>,

	/// YAML config file (see `config::Config`); CLI flags override its fields.
	#[arg(long, default_value = "chain-interface.yaml")]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chain_interface_cli=info,chain_interface=info")),
		)
		.init();

	let cli = Cli::parse();
	let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
		warn!(error = %e, "no usable config file, falling back to CLI flags only");
		Config { servers: Vec::new(), data_dir: PathBuf::from(".chain-interface"), proxy: None, max_checkpoint: 0 }
	});
	if let Some(server) = cli.server {
		config.servers = vec![server];
	}
	if let Some(data_dir) = cli.data_dir {
		config.data_dir = data_dir;
	}
	if let Some(checkpoint) = cli.checkpoint {
		config.max_checkpoint = checkpoint;
	}

	let server_addrs = config.server_addrs()?;
	let Some(server) = server_addrs.into_iter().next() else {
		anyhow::bail!("no server configured: pass --server or list one under `servers:` in the config file");
	};

	fs_err::create_dir_all(config.certs_dir())?;

	// The real persistent chain database is an external collaborator this
	// crate only defines the contract for; this demo harness plays that role
	// with an in-process chain that starts empty and grows as headers sync.
	let registry = ChainRegistry::new(MemoryChain::genesis(Vec::new()));
	let network = DemoNetwork::new(config.max_checkpoint);

	let mut facade =
		InterfaceFacade::new(network, server.clone(), config.certs_dir(), std::sync::Arc::new(registry), config.proxy);

	info!(host = %server.host, "connecting");
	facade.ready().await;
	info!(host = facade.diagnostic_name(), tip = facade.tip(), "subscribed");

	loop {
		tokio::time::sleep(Duration::from_secs(5)).await;
		let tip = facade.tip();
		let height = facade.blockchain().map(|c| c.height());
		info!(host = facade.diagnostic_name(), tip, ?height, "status");
		if let Some(err) = facade.last_error() {
			warn!(host = facade.diagnostic_name(), %err, "interface stopped");
			facade.close();
			break;
		}
	}

	Ok(())
}
