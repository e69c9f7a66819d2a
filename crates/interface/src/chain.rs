use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::header::Header;

/// A chain handle is keyed by its forkpoint: the height of the first header
/// that is unique to this branch. The genesis chain is forkpoint 0.
pub type ChainId = u32;

/// The capability set the reconciler needs from a branch of the local chain
/// database. Production wiring backs this with a real on-disk chain; test
/// wiring substitutes a scripted in-memory one, which is the equivalent of
/// the original's mock sidecars without threading callables through the
/// header type itself.
pub trait ChainHandle: Send + Sync + std::fmt::Debug {
	fn id(&self) -> ChainId;
	fn forkpoint(&self) -> u32;
	fn parent_id(&self) -> Option<ChainId>;
	fn height(&self) -> u32;

	/// True if `header` is already part of this chain at `header.block_height`.
	fn contains(&self, header: &Header) -> bool;

	/// True if `header` would extend this chain. When `check_height` is
	/// false, height continuity with the current tip is not required (used
	/// to validate a fork-point header's linkage to its own chain).
	fn accepts_next(&self, header: &Header, check_height: bool) -> bool;

	fn save_header(&self, header: Header);

	/// Truncates this chain's backing storage from `offset` onward, then the
	/// caller re-appends via `save_header`. Used only by the conflict case.
	fn truncate(&self, offset: u64);

	fn path(&self) -> String;

	/// Splits off a new, unregistered branch rooted just before `header`.
	/// The caller is responsible for registering it in the `ChainRegistry`.
	fn fork(&self, header: Header) -> Box<dyn ChainHandle>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("forkpoint {0} is already registered")]
	AlreadyRegistered(ChainId),
}

/// Process-wide `{forkpoint -> ChainHandle}` arena. Parent links are stored
/// as forkpoint indices rather than handles, so there is never a reference
/// cycle to break.
#[derive(Debug, Default)]
pub struct ChainRegistry {
	chains: Mutex<HashMap<ChainId, Arc<dyn ChainHandle>>>,
}

impl ChainRegistry {
	pub fn new(genesis: Arc<dyn ChainHandle>) -> Self {
		let mut chains = HashMap::new();
		chains.insert(genesis.forkpoint(), genesis);
		ChainRegistry { chains: Mutex::new(chains) }
	}

	pub fn get(&self, id: ChainId) -> Option<Arc<dyn ChainHandle>> {
		self.chains.lock().get(&id).cloned()
	}

	pub fn contains_key(&self, id: ChainId) -> bool {
		self.chains.lock().contains_key(&id)
	}

	pub fn register(&self, id: ChainId, chain: Arc<dyn ChainHandle>) -> Result<(), RegistryError> {
		let mut chains = self.chains.lock();
		if chains.contains_key(&id) {
			return Err(RegistryError::AlreadyRegistered(id));
		}
		chains.insert(id, chain);
		Ok(())
	}

	/// `check_header(H)`: the chain, if any, that already recognises `header`
	/// at its height.
	pub fn check_header(&self, header: &Header) -> Option<Arc<dyn ChainHandle>> {
		self.chains.lock().values().find(|c| c.contains(header)).cloned()
	}

	/// `can_connect(H, check_height)`: the chain, if any, that would accept
	/// `header` as its next header.
	pub fn can_connect(&self, header: &Header, check_height: bool) -> Option<Arc<dyn ChainHandle>> {
		self
			.chains
			.lock()
			.values()
			.find(|c| c.accepts_next(header, check_height))
			.cloned()
	}
}

/// A process-memory `ChainHandle`. The real persistent blockchain database
/// is an external collaborator this crate only defines the contract for
/// (see the module doc); this is what satisfies that contract in-process —
/// used directly by reconciler tests, and by the CLI demo harness as its
/// stand-in for a real on-disk chain.
pub mod memory {
	use super::*;
	use parking_lot::RwLock;

	/// A chain as a flat vec of headers starting at `forkpoint`, with an
	/// optional parent.
	#[derive(Debug)]
	pub struct MemoryChain {
		id: ChainId,
		parent: Option<ChainId>,
		headers: RwLock<Vec<Header>>,
	}

	impl MemoryChain {
		pub fn genesis(headers: Vec<Header>) -> Arc<Self> {
			Arc::new(MemoryChain { id: 0, parent: None, headers: RwLock::new(headers) })
		}

		pub fn branch(id: ChainId, parent: ChainId, headers: Vec<Header>) -> Arc<Self> {
			Arc::new(MemoryChain { id, parent: Some(parent), headers: RwLock::new(headers) })
		}

		fn tip(&self) -> Option<Header> {
			self.headers.read().last().cloned()
		}

		fn header_at(&self, height: u32) -> Option<Header> {
			self.headers.read().iter().find(|h| h.block_height == height).cloned()
		}
	}

	impl ChainHandle for MemoryChain {
		fn id(&self) -> ChainId {
			self.id
		}
		fn forkpoint(&self) -> u32 {
			self.id
		}
		fn parent_id(&self) -> Option<ChainId> {
			self.parent
		}
		fn height(&self) -> u32 {
			self.tip().map(|h| h.block_height).unwrap_or(self.id.saturating_sub(1))
		}
		fn contains(&self, header: &Header) -> bool {
			self
				.headers
				.read()
				.iter()
				.any(|h| h.block_height == header.block_height && h.hash() == header.hash())
		}
		fn accepts_next(&self, header: &Header, check_height: bool) -> bool {
			if check_height {
				return match self.tip() {
					Some(tip) => header.block_height == tip.block_height + 1 && header.prev_hash == tip.hash(),
					None => true,
				};
			}
			// Without the tip-extension requirement, `header` only needs to link
			// onto whatever this chain already has recorded at its own previous
			// height, which may well be interior to the chain, not its tip.
			match header.block_height.checked_sub(1) {
				Some(prev_height) => self
					.header_at(prev_height)
					.map(|prev| header.prev_hash == prev.hash())
					.unwrap_or(false),
				None => false,
			}
		}
		fn save_header(&self, header: Header) {
			self.headers.write().push(header);
		}
		fn truncate(&self, offset: u64) {
			self.headers.write().truncate(offset as usize);
		}
		fn path(&self) -> String {
			format!("memory://chain/{}", self.id)
		}
		fn fork(&self, header: Header) -> Box<dyn ChainHandle> {
			Box::new(MemoryChain {
				id: header.block_height,
				parent: Some(self.id),
				headers: RwLock::new(vec![header]),
			})
		}
	}
}
