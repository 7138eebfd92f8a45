//! Trial-session domain: case identity, conversation buffering rules and
//! the per-case document store.

pub mod case;
pub mod files;
pub mod policy;
