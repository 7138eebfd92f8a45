//! Configuration resolution.
//!
//! Settings file defaults are overridden by environment variables (a `.env`
//! file is loaded first by the binary), which are in turn overridden by
//! command-line flags in `main.rs`.

mod helpers;
pub mod relay;

pub use relay::{DEFAULT_PORT, RelayConfig, parse_port};
