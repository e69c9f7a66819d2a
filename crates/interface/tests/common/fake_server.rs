use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// A scripted stand-in for a line-JSON-RPC server: answers `server.version`
/// and `blockchain.headers.subscribe` with fixed values, optionally pushes a
/// few more header notifications, then answers `server.ping` until the
/// socket closes. Enough to drive `ConnectionLifecycle` end-to-end without a
/// real blockchain node.
pub struct FakeServer {
	listener: TcpListener,
}

impl FakeServer {
	pub async fn bind() -> (Self, u16) {
		let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();
		(FakeServer { listener }, port)
	}

	pub async fn run(self, subscribe_hex: String, subscribe_height: u32, pushes: Vec<(String, u32)>) {
		let (stream, _) = self.listener.accept().await.unwrap();
		let (read_half, mut write_half) = stream.into_split();
		let mut lines = BufReader::new(read_half).lines();

		let version_req = lines.next_line().await.unwrap().expect("client sent server.version");
		send_result(&mut write_half, request_id(&version_req), json!("1.4")).await;

		let subscribe_req = lines.next_line().await.unwrap().expect("client sent headers.subscribe");
		send_result(
			&mut write_half,
			request_id(&subscribe_req),
			json!({"hex": subscribe_hex, "height": subscribe_height}),
		)
		.await;

		for (hex, height) in pushes {
			let notification = json!({
				"jsonrpc": "2.0",
				"method": "blockchain.headers.subscribe",
				"params": [{"hex": hex, "height": height}],
			});
			send_line(&mut write_half, &notification).await;
		}

		while let Ok(Some(line)) = lines.next_line().await {
			if line.contains("server.ping") {
				send_result(&mut write_half, request_id(&line), Value::Null).await;
			}
		}
	}
}

fn request_id(line: &str) -> Value {
	let parsed: Value = serde_json::from_str(line).expect("request line is valid json");
	parsed.get("id").cloned().unwrap_or(Value::Null)
}

async fn send_result(write_half: &mut (impl tokio::io::AsyncWrite + Unpin), id: Value, result: Value) {
	send_line(write_half, &json!({"jsonrpc": "2.0", "id": id, "result": result})).await;
}

async fn send_line(write_half: &mut (impl tokio::io::AsyncWrite + Unpin), value: &Value) {
	let mut line = value.to_string();
	line.push('\n');
	write_half.write_all(line.as_bytes()).await.unwrap();
	write_half.flush().await.unwrap();
}
