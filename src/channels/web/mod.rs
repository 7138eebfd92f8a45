//! HTTP channel: the REST surface polled by the voice backend and used by
//! the browser client.

pub mod server;
pub mod types;

pub use server::{GatewayHandle, GatewayState, build_router, start_server};
