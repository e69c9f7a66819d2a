use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::header::Header;
use crate::wire::{Id, IncomingLine, Request, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("i/o: {0}")]
	Io(#[from] std::io::Error),
	#[error("malformed line: {0}")]
	Decode(#[from] serde_json::Error),
	#[error("malformed header push: {0}")]
	HeaderDecode(#[from] crate::header::HeaderError),
	#[error("server error: {} ({})", .0.message, .0.code)]
	Rpc(RpcError),
	#[error("unexpected notification method {0:?}")]
	UnknownNotification(String),
	#[error("session closed")]
	Closed,
}

type Pending = Arc<Mutex<HashMap<Id, oneshot::Sender<Result<Value, RpcError>>>>>;

/// A JSON-RPC client session layered directly over a line-delimited stream.
/// Framing and request/response correlation live here; routing unsolicited
/// notifications into the right typed queue is this type's whole job beyond
/// that, matching the narrow responsibility this component has in the
/// connection it belongs to.
#[derive(Debug)]
pub struct NotificationSession {
	host: String,
	lines_out: mpsc::UnboundedSender<String>,
	pending: Pending,
	next_id: AtomicU64,
	_reader: tokio::task::JoinHandle<()>,
	_writer: tokio::task::JoinHandle<()>,
}

/// What the session hands back to its caller at open time.
pub struct SessionHandle {
	pub session: NotificationSession,
	/// Deserialized `blockchain.headers.subscribe` pushes, in arrival order.
	pub headers: mpsc::UnboundedReceiver<Header>,
	/// Resolves once the session's background tasks have stopped, carrying
	/// the reason (read error, EOF, or a fatal protocol violation).
	pub done: oneshot::Receiver<String>,
}

impl NotificationSession {
	pub fn open<S>(stream: S, host: impl Into<String>) -> SessionHandle
	where
		S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
	{
		let host = host.into();
		let (read_half, write_half) = tokio::io::split(stream);
		let (lines_out, lines_rx) = mpsc::unbounded_channel::<String>();
		let (header_tx, header_rx) = mpsc::unbounded_channel();
		let (done_tx, done_rx) = oneshot::channel();
		let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

		let writer = tokio::spawn(write_loop(write_half, lines_rx));
		let reader = tokio::spawn(read_loop(read_half, host.clone(), pending.clone(), header_tx, done_tx));

		SessionHandle {
			session: NotificationSession {
				host,
				lines_out,
				pending,
				next_id: AtomicU64::new(1),
				_reader: reader,
				_writer: writer,
			},
			headers: header_rx,
			done: done_rx,
		}
	}

	/// Sends a request and awaits its matching reply. The caller supplies
	/// whatever timeout is appropriate for the method (this type imposes
	/// none of its own).
	pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
		let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id.clone(), tx);
		let req = Request::new(id.clone(), method, params);
		let line = req.to_line()?;
		trace!(host = %self.host, %method, "-> {line}");
		self.lines_out.send(line).map_err(|_| Error::Closed)?;
		match rx.await {
			Ok(Ok(result)) => Ok(result),
			Ok(Err(rpc_err)) => Err(Error::Rpc(rpc_err)),
			Err(_) => {
				self.pending.lock().remove(&id);
				Err(Error::Closed)
			},
		}
	}
}

async fn write_loop<W: AsyncWrite + Unpin>(mut write_half: W, mut lines: mpsc::UnboundedReceiver<String>) {
	while let Some(line) = lines.recv().await {
		if write_half.write_all(line.as_bytes()).await.is_err() {
			break;
		}
		if write_half.write_all(b"\n").await.is_err() {
			break;
		}
		if write_half.flush().await.is_err() {
			break;
		}
	}
}

async fn read_loop<R: AsyncRead + Unpin>(
	read_half: R,
	host: String,
	pending: Pending,
	header_tx: mpsc::UnboundedSender<Header>,
	done_tx: oneshot::Sender<String>,
) {
	let mut lines = BufReader::new(read_half).lines();
	let reason = loop {
		match lines.next_line().await {
			Ok(Some(line)) => {
				trace!(%host, "<- {line}");
				if let Err(reason) = handle_line(&line, &host, &pending, &header_tx) {
					break reason;
				}
			},
			Ok(None) => break "connection loop exited".to_string(),
			Err(e) => break format!("read error: {e}"),
		}
	};
	debug!(%host, %reason, "session reader stopped");
	let _ = done_tx.send(reason);
}

fn handle_line(
	line: &str,
	host: &str,
	pending: &Pending,
	header_tx: &mpsc::UnboundedSender<Header>,
) -> Result<(), String> {
	let incoming: IncomingLine = match serde_json::from_str(line) {
		Ok(v) => v,
		Err(e) => return Err(format!("malformed line: {e}")),
	};

	if incoming.is_notification() {
		let method = incoming.method.unwrap_or_default();
		match method.as_str() {
			"blockchain.headers.subscribe" => {
				let Some(params) = incoming.params else {
					return Err("headers.subscribe notification missing params".to_string());
				};
				match parse_header_push(&params) {
					Ok(header) => {
						let _ = header_tx.send(header);
					},
					Err(e) => warn!(%host, "dropping malformed header push: {e}"),
				}
			},
			"blockchain.scripthash.subscribe" => {
				trace!(%host, "scripthash notification (unused by this interface)");
			},
			other => return Err(format!("unexpected notification method {other:?}")),
		}
		return Ok(());
	}

	let Some(id) = incoming.id.clone() else {
		return Err("reply with neither id nor notification shape".to_string());
	};
	let Some(tx) = pending.lock().remove(&id) else {
		trace!(%host, ?id, "reply for unknown or already-resolved request id");
		return Ok(());
	};
	let result = match incoming.error {
		Some(e) => Err(e),
		None => Ok(incoming.result.unwrap_or(Value::Null)),
	};
	let _ = tx.send(result);
	Ok(())
}

fn parse_header_push(params: &Value) -> Result<Header, Error> {
	#[derive(serde::Deserialize)]
	struct Push {
		hex: String,
		height: u32,
	}
	// The server may send either a single push object or a one-element array
	// containing it; accept both.
	let push: Push = if params.is_array() {
		serde_json::from_value(params.first().cloned().unwrap_or(Value::Null))?
	} else {
		serde_json::from_value(params.clone())?
	};
	Ok(Header::from_hex(push.height, &push.hex)?)
}

impl Drop for NotificationSession {
	fn drop(&mut self) {
		self._reader.abort();
		self._writer.abort();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::duplex;

	#[tokio::test]
	async fn call_round_trips_a_reply() {
		let (client, mut server) = duplex(4096);
		let handle = NotificationSession::open(client, "test-host");
		let session = handle.session;

		tokio::spawn(async move {
			let mut buf = BufReader::new(&mut server);
			let mut line = String::new();
			buf.read_line(&mut line).await.unwrap();
			let incoming: IncomingLine = serde_json::from_str(&line).unwrap();
			let reply = format!("{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":\"1.4\"}}\n", match incoming.id.unwrap() {
				Id::Number(n) => n,
				_ => unreachable!(),
			});
			server.write_all(reply.as_bytes()).await.unwrap();
		});

		let result = session.call("server.version", serde_json::json!(["c", "1.4"])).await.unwrap();
		assert_eq!(result, serde_json::json!("1.4"));
	}

	#[tokio::test]
	async fn header_push_is_routed_to_the_header_queue() {
		let (client, mut server) = duplex(4096);
		let mut handle = NotificationSession::open(client, "test-host");

		let push = serde_json::json!({"hex": "00".repeat(80), "height": 101});
		let line = format!(
			"{{\"jsonrpc\":\"2.0\",\"method\":\"blockchain.headers.subscribe\",\"params\":[{push}]}}\n"
		);
		server.write_all(line.as_bytes()).await.unwrap();

		let header = handle.headers.recv().await.unwrap();
		assert_eq!(header.block_height, 101);
	}

	#[tokio::test]
	async fn unknown_notification_method_ends_the_session() {
		let (client, mut server) = duplex(4096);
		let handle = NotificationSession::open(client, "test-host");

		server.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"server.banner\",\"params\":[]}\n").await.unwrap();

		let reason = handle.done.await.unwrap();
		assert!(reason.contains("server.banner"));
	}
}
