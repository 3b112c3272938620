//! Live-update fanout for the board.
//!
//! A write made by one client (new post, edited post, new message post) is
//! pushed to every client holding a live WebSocket connection, across every
//! service instance that shares the same broker.
//!
//! # Architecture
//!
//! ```text
//!  write path                                     other instances
//!      │ Publisher::publish(topic, json)                 ▲
//!      ▼                                                 │
//!  [publish loop] ──────────► Broker (Redis pub/sub) ────┘
//!                                   │
//!                                   ▼
//!                           [subscribe loop]  one upstream subscription
//!                                   │
//!                                   ▼
//!                          Manager::broadcast  try-enqueue, evict when full
//!                      ┌────────────┼────────────┐
//!                      ▼            ▼            ▼
//!                   [queue]      [queue]      [queue]   bounded, per connection
//!                      ▼            ▼            ▼
//!                   writer       writer       writer  ──► WebSocket
//!                   reader       reader       reader  ◄── close detection
//! ```
//!
//! # Delivery
//!
//! - **Ephemeral**: a client that is not connected misses events; nothing is
//!   buffered for it.
//! - **At most once** per connected client, FIFO per connection.
//! - **Slow consumers are evicted**: a full queue drops the connection instead
//!   of stalling everyone else. The client is expected to reconnect.
//! - **No envelope**: each frame is the exact JSON of the changed entity.
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry and the per-connection queue handle
//! - `manager`: broadcast with eviction on backpressure
//! - `broker`: Redis and in-memory pub/sub backends
//! - `source`: subscribe loop with reconnects, fire-and-forget publish loop
//! - `pump`: WebSocket reader/writer loops
//! - `handler`: domain event handler feeding the publish loop

pub mod broker;
pub mod connection;
pub mod error;
pub mod handler;
pub mod manager;
pub mod pump;
pub mod source;

/// One serialized event, shared between every connection it is delivered to.
pub type Payload = bytes::Bytes;

pub use error::Error;
pub use handler::LiveUpdateHandler;
pub use manager::Manager;
pub use source::{EventSource, Publisher, Shutdown, SubscribeState};
