//! Wire types and client for the runner RPC surface.
//!
//! The runner exposes a JSON request/response API under `/api/v1/rpc/<Method>`.
//! Transport failures (connection refused, non-2xx status) are surfaced as
//! [`RpcError`]; domain failures ride inside the response body's `error`
//! field so that a file that does not exist never tears down the transport.

mod client;
mod types;

pub use client::{ReplClient, RpcError};
pub use types::*;
