use std::net::SocketAddr;

use crate::reconciler::FatalError;
use crate::session;
use crate::trust;

/// A disconnect that is not this interface's fault (or is a documented
/// protocol refusal): logged as a single line, never as a traceback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct GracefulDisconnect {
	pub reason: String,
}

impl GracefulDisconnect {
	pub fn new(reason: impl Into<String>) -> Self {
		Self { reason: reason.into() }
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("graceful disconnect: {0}")]
	Disconnect(#[from] GracefulDisconnect),

	#[error("trust store: {0}")]
	Trust(#[from] trust::Error),

	#[error("session: {0}")]
	Session(#[from] session::Error),

	#[error("reconciler bug: {0}")]
	Fatal(#[from] FatalError),

	#[error("network unreachable: {addr:?}: {source}")]
	NetworkUnreachable {
		addr: Option<SocketAddr>,
		#[source]
		source: std::io::Error,
	},

	#[error("timed out waiting on {0}")]
	Timeout(&'static str),
}

impl Error {
	/// The graceful-disconnect reason, if this is one; used by callers that
	/// need to distinguish a documented refusal from a bug or I/O fault
	/// without string-matching the display text.
	pub fn as_graceful(&self) -> Option<&GracefulDisconnect> {
		match self {
			Error::Disconnect(g) => Some(g),
			_ => None,
		}
	}
}
