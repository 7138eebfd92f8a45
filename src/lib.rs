//! Conversation relay and case file store for simulated trial sessions.
//!
//! The browser client posts role-tagged conversation turns per case; the
//! voice backend polls for everything said since its last poll. Case
//! documents are uploaded into per-case directories and served back for
//! preview.

pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod legal;
pub mod lifecycle;
pub mod settings;
