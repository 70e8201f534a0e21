//! Server topology: nodes, the locator ring, and the server pool.

pub mod events;
pub mod locator;
pub mod node;
pub mod server_pool;

pub use events::{NodeEvent, NodeEventListener, SubscriptionId};
pub use locator::{KetamaLocator, NodeLocator, NodeLocatorFactory, SingleNodeLocator};
pub use node::{Node, NodeState};
pub use server_pool::ServerPool;
