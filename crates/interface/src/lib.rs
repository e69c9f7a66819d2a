pub mod addr;
pub mod chain;
pub mod dial;
pub mod error;
pub mod facade;
pub mod follower;
pub mod header;
pub mod lifecycle;
pub mod network;
pub mod reconciler;
pub mod session;
pub mod trust;
pub mod wire;

pub use addr::{Protocol, ProxyConfig, ProxyMode, ServerAddr};
pub use error::{Error, GracefulDisconnect};
pub use facade::InterfaceFacade;
pub use header::Header;
pub use network::{ChunkResult, NetworkHandle};
pub use reconciler::Outcome;
