//! Client gateway
//!
//! Accepts decoded client requests, routes them by the node's current role
//! and turns results into replies. The wire format is pluggable through
//! [`WireCodec`].

mod codec;
mod errors;
mod handler;
mod request;
mod server;
mod session;

pub use codec::{JsonCodec, WireCodec, MAX_REQUEST_LEN};
pub use errors::{GatewayError, GatewayResult};
pub use handler::Gateway;
pub use request::{Redirect, Reply, Request};
pub use server::ClientServer;
pub use session::Session;
