use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

use crate::addr::{ProxyConfig, ProxyMode};

/// A dialed byte stream, plain TCP or tunneled through a SOCKS proxy.
pub trait DialedStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DialedStream for T {}

/// Opens the raw TCP connection to `host:port`, through `proxy` if given.
/// TLS, if any, is layered on top by the caller; this only supports
/// SOCKS4a/SOCKS5 the way the rest of this interface's proxy config does —
/// HTTP proxies are not supported.
pub async fn dial(
	host: &str,
	port: u16,
	proxy: Option<&ProxyConfig>,
) -> std::io::Result<Box<dyn DialedStream>> {
	let Some(proxy) = proxy else {
		return Ok(Box::new(TcpStream::connect((host, port)).await?));
	};
	let proxy_addr = proxy.addr();
	match proxy.mode {
		ProxyMode::Socks5 => {
			let stream = match (&proxy.user, &proxy.password) {
				(Some(user), Some(pass)) => {
					Socks5Stream::connect_with_password(proxy_addr.as_str(), (host, port), user.as_str(), pass.as_str())
						.await
				},
				_ => Socks5Stream::connect(proxy_addr.as_str(), (host, port)).await,
			}
			.map_err(to_io_error)?;
			Ok(Box::new(stream))
		},
		ProxyMode::Socks4 => {
			let stream = Socks4Stream::connect(proxy_addr.as_str(), (host, port))
				.await
				.map_err(to_io_error)?;
			Ok(Box::new(stream))
		},
	}
}

fn to_io_error(e: tokio_socks::Error) -> std::io::Error {
	std::io::Error::other(e)
}
