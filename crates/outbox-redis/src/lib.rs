//! # Outbox Redis
//!
//! Low-level Redis plumbing for the log-backed outbox store.
//!
//! - **No delivery logic** - claim/ack/reclaim/prune live in the store's Lua scripts
//! - Connection management with automatic reconnection
//! - Consumer group helpers for Redis Streams
//!
//! ## Example
//!
//! ```rust,no_run
//! use outbox_redis::RedisClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RedisClient::connect("redis://localhost:6379").await?;
//!     client.xgroup_create("outbox", "billing").await?;
//!     let len = client.xlen("outbox").await?;
//!     println!("{} entries", len);
//!     Ok(())
//! }
//! ```

mod client;
mod streams;

pub use client::RedisClient;
pub use streams::{parse_stream_seq, GroupInfo};

pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
