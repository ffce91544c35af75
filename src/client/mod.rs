//! RPC client implementation.
//!
//! This module contains the core [`RpcClient`] type, which turns a
//! fire-and-forget pub/sub transport into a correlated request/response
//! abstraction.
//!
//! # Architecture
//!
//! Each published request carries a unique correlation id. A single
//! background listener consumes the result topic and resolves matching
//! entries in the shared correlation registry; callers block on
//! [`RpcClient::wait_for_response`] until their id resolves, their timeout
//! elapses, or the client is stopped.
//!
//! # Concurrency
//!
//! Any number of publish+wait pairs can be in flight simultaneously. The
//! registry is protected by a mutex, but lock contention is minimal since
//! every critical section is a HashMap insert/remove.

mod listener;
mod rpc_client;
mod stats;

pub use rpc_client::{LifecycleState, RpcClient};
pub use stats::StatsSnapshot;
