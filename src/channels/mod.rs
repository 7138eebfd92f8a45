//! Inbound channels.

pub mod web;
