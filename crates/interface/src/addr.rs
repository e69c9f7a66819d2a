use std::fmt;
use std::str::FromStr;

/// Transport used for the connection to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
	Plain,
	Tls,
}

impl Protocol {
	fn letter(self) -> char {
		match self {
			Protocol::Plain => 't',
			Protocol::Tls => 's',
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ParseServerAddrError {
	#[error("expected \"host:port:protocol\", got {0:?}")]
	Shape(String),
	#[error("invalid port {0:?}")]
	Port(String),
	#[error("unknown protocol letter {0:?} (expected \"s\" or \"t\")")]
	Protocol(String),
}

/// `(host, port, protocol)`. String form `"host:port:protocol"` where
/// protocol is `s` (TLS) or `t` (plain).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
	pub host: String,
	pub port: u16,
	pub protocol: Protocol,
}

impl fmt::Display for ServerAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.host, self.port, self.protocol.letter())
	}
}

impl FromStr for ServerAddr {
	type Err = ParseServerAddrError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.rsplitn(3, ':');
		let protocol = parts.next().ok_or_else(|| ParseServerAddrError::Shape(s.to_string()))?;
		let port = parts.next().ok_or_else(|| ParseServerAddrError::Shape(s.to_string()))?;
		let host = parts.next().ok_or_else(|| ParseServerAddrError::Shape(s.to_string()))?;
		if parts.next().is_some() {
			return Err(ParseServerAddrError::Shape(s.to_string()));
		}
		let protocol = match protocol {
			"s" => Protocol::Tls,
			"t" => Protocol::Plain,
			other => return Err(ParseServerAddrError::Protocol(other.to_string())),
		};
		let port: u16 = port
			.parse()
			.map_err(|_| ParseServerAddrError::Port(port.to_string()))?;
		Ok(ServerAddr { host: host.to_string(), port, protocol })
	}
}

/// SOCKS mode for proxied dialing. HTTP proxies are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
	Socks4,
	Socks5,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProxyConfig {
	pub mode: ProxyMode,
	pub host: String,
	pub port: u16,
	#[serde(default)]
	pub user: Option<String>,
	#[serde(default)]
	pub password: Option<String>,
}

impl ProxyConfig {
	pub fn addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_tls_addr() {
		let addr: ServerAddr = "electrum.example.org:50002:s".parse().unwrap();
		assert_eq!(addr.host, "electrum.example.org");
		assert_eq!(addr.port, 50002);
		assert_eq!(addr.protocol, Protocol::Tls);
		assert_eq!(addr.to_string(), "electrum.example.org:50002:s");
	}

	#[test]
	fn parses_plain_addr() {
		let addr: ServerAddr = "127.0.0.1:50001:t".parse().unwrap();
		assert_eq!(addr.protocol, Protocol::Plain);
	}

	#[test]
	fn rejects_bad_shape() {
		assert!("electrum.example.org:50002".parse::<ServerAddr>().is_err());
		assert!("electrum.example.org:50002:x".parse::<ServerAddr>().is_err());
		assert!("electrum.example.org:notaport:s".parse::<ServerAddr>().is_err());
	}
}
