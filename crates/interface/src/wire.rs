use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request id. Servers in this protocol only ever use integers,
/// but we accept strings too rather than reject a technically-valid peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
	Number(u64),
	String(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Request {
	pub id: Id,
	pub method: String,
	pub params: Value,
}

impl Request {
	pub fn new(id: Id, method: impl Into<String>, params: Value) -> Self {
		Request { id, method: method.into(), params }
	}

	pub fn to_line(&self) -> serde_json::Result<String> {
		#[derive(Serialize)]
		struct OnWire<'a> {
			jsonrpc: &'static str,
			id: &'a Id,
			method: &'a str,
			params: &'a Value,
		}
		serde_json::to_string(&OnWire { jsonrpc: "2.0", id: &self.id, method: &self.method, params: &self.params })
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
}

/// One line of incoming traffic: either a reply to a request we sent
/// (carries `id`) or an unsolicited notification (no `id`).
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingLine {
	pub id: Option<Id>,
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub params: Option<Value>,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<RpcError>,
}

impl IncomingLine {
	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_serializes_with_jsonrpc_envelope() {
		let req = Request::new(Id::Number(1), "server.version", serde_json::json!(["c", "1.4"]));
		let line = req.to_line().unwrap();
		assert!(line.contains("\"jsonrpc\":\"2.0\""));
		assert!(line.contains("\"method\":\"server.version\""));
	}

	#[test]
	fn notification_has_no_id() {
		let line = r#"{"jsonrpc":"2.0","method":"blockchain.headers.subscribe","params":[{"hex":"aa","height":1}]}"#;
		let incoming: IncomingLine = serde_json::from_str(line).unwrap();
		assert!(incoming.is_notification());
		assert_eq!(incoming.method.as_deref(), Some("blockchain.headers.subscribe"));
	}

	#[test]
	fn reply_carries_id_and_result() {
		let line = r#"{"jsonrpc":"2.0","id":4,"result":"1.4"}"#;
		let incoming: IncomingLine = serde_json::from_str(line).unwrap();
		assert!(!incoming.is_notification());
		assert_eq!(incoming.id, Some(Id::Number(4)));
	}
}
