use std::path::{Path, PathBuf};

use chain_interface::{ProxyConfig, ServerAddr};
use serde::{Deserialize, Serialize};

/// The out-of-scope "configuration loader" collaborator the interface itself
/// never reads from disk directly: the list of servers to connect to, where
/// certs are cached, and the checkpoint ceiling below which the reconciler
/// never questions its own history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub servers: Vec<String>,
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
	#[serde(default)]
	pub proxy: Option<ProxyConfig>,
	#[serde(default)]
	pub max_checkpoint: u32,
}

fn default_data_dir() -> PathBuf {
	PathBuf::from(".chain-interface")
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("reading config at {path}: {source}")]
	Read { path: PathBuf, #[source] source: std::io::Error },
	#[error("parsing config at {path}: {source}")]
	Parse { path: PathBuf, #[source] source: serde_yaml::Error },
	#[error("server address {0:?}: {1}")]
	BadServerAddr(String, chain_interface::addr::ParseServerAddrError),
}

impl Config {
	pub fn load(path: &Path) -> Result<Self, Error> {
		let contents = fs_err::read_to_string(path)
			.map_err(|e| Error::Read { path: path.to_path_buf(), source: e })?;
		serde_yaml::from_str(&contents).map_err(|e| Error::Parse { path: path.to_path_buf(), source: e })
	}

	pub fn certs_dir(&self) -> PathBuf {
		self.data_dir.join("certs")
	}

	pub fn server_addrs(&self) -> Result<Vec<ServerAddr>, Error> {
		self
			.servers
			.iter()
			.map(|s| s.parse().map_err(|e| Error::BadServerAddr(s.clone(), e)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_a_minimal_document() {
		let yaml = "servers:\n  - electrum.example.org:50002:s\nmax_checkpoint: 100\n";
		let cfg: Config = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(cfg.servers, vec!["electrum.example.org:50002:s".to_string()]);
		assert_eq!(cfg.data_dir, default_data_dir());
		assert_eq!(cfg.max_checkpoint, 100);
	}

	#[test]
	fn rejects_a_malformed_server_string() {
		let cfg = Config {
			servers: vec!["not-a-valid-addr".to_string()],
			data_dir: default_data_dir(),
			proxy: None,
			max_checkpoint: 0,
		};
		assert!(cfg.server_addrs().is_err());
	}
}
