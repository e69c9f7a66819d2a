use tokio::sync::watch;

/// A completion token that can be set exactly once; every waiter observes the
/// same value and a second `set` is a no-op. Modeled on the certificate-state
/// watch channel used for other one-shot-then-cached signals in this stack.
#[derive(Clone, Debug)]
pub struct Ready<T> {
	tx: watch::Sender<Option<T>>,
}

#[derive(Clone, Debug)]
pub struct ReadyWaiter<T> {
	rx: watch::Receiver<Option<T>>,
}

pub fn ready<T: Clone>() -> (Ready<T>, ReadyWaiter<T>) {
	let (tx, rx) = watch::channel(None);
	(Ready { tx }, ReadyWaiter { rx })
}

impl<T: Clone> Ready<T> {
	/// Fulfils the token. Ignored if it was already fulfilled.
	pub fn set(&self, value: T) {
		self.tx.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}
			*current = Some(value);
			true
		});
	}

	pub fn is_done(&self) -> bool {
		self.tx.borrow().is_some()
	}
}

impl<T: Clone> ReadyWaiter<T> {
	/// Waits until the token is fulfilled and returns the value. Returns
	/// immediately if it already is.
	pub async fn wait(&mut self) -> T {
		loop {
			if let Some(v) = self.rx.borrow().clone() {
				return v;
			}
			if self.rx.changed().await.is_err() {
				// Sender dropped without ever fulfilling the token: park forever,
				// mirroring a Future that is never resolved.
				std::future::pending::<()>().await;
			}
		}
	}

	pub fn peek(&self) -> Option<T> {
		self.rx.borrow().clone()
	}
}
