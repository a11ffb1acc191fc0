//! # Broadcast Chat Server Library
//!
//! This library provides a multi-client chat server. Clients connect over TCP,
//! register a username with their first frame, and every message frame they
//! send afterwards is relayed to all other registered clients.
//!
//! ## Wire Protocol
//!
//! Every unit on the wire is a frame: a fixed-width ASCII header carrying the
//! payload length, followed by the payload bytes (see the `shared` crate).
//! The server forwards each message as `username frame || message frame` in a
//! single write, reusing the header bytes it originally received.
//!
//! ## Architecture Design
//!
//! ### Single Dispatcher
//! All connection bookkeeping happens in one task. The accept loop and the
//! event channel are multiplexed with `tokio::select!`, and each event is
//! handled to completion before the next wait, so the registry needs no
//! locking.
//!
//! ### Connection Tasks
//! Every accepted socket is split in two halves:
//! - a **reader task** that reads the username frame, then chat frames, and
//!   reports them to the dispatcher as events
//! - a **writer task** that drains a bounded outbound queue onto the socket
//!
//! A client that sends garbage, disconnects, or stops draining its queue is
//! torn down without affecting anyone else.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Bind address, header width, payload limit, queue depth and handshake
//! timeout.
//!
//! ### Registry Module (`registry`)
//! Maps connection handles to their username frame and outbound queue.
//!
//! ### Network Module (`network`)
//! The listener, the dispatcher and the per-connection tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(&config).await?;
//!
//!     // Accepts clients and relays messages until the process exits
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod registry;
