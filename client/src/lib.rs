//! # Chat Client Library
//!
//! Terminal client for the broadcast chat server. It registers a username on
//! connect, sends each message as a single frame, and decodes the
//! `username frame || message frame` pairs the server relays from other
//! clients.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::ChatClient;
//! use shared::FrameCodec;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = ChatClient::connect("127.0.0.1:1234", "alice", FrameCodec::default()).await?;
//!     client.send_message("hi everyone").await?;
//!
//!     while let Some(incoming) = client.next_message().await? {
//!         println!("{} > {}", incoming.username, incoming.message);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{ChatClient, ClientError, IncomingMessage, MessageSink, MessageStream};
