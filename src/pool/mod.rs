//! Per-node socket pooling.

pub mod failure;
pub mod socket;
pub mod socket_pool;

pub use failure::{FailurePolicy, NoFailurePolicy, ThrottlingFailurePolicy};
pub use socket::PooledSocket;
pub use socket_pool::{SocketGuard, SocketPool};
