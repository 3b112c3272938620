//! WebSocket HTTP handler for the web layer.
//!
//! This module contains only the Axum upgrade handler. The connection registry,
//! broadcast and reader/writer loops live in the `fanout` crate.

pub mod handler;
