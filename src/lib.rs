//! A multiplexed, asynchronous client core for RESP-family line-oriented,
//! length-prefixed key/value protocols.
//!
//! The crate is split along the same seams a server-side driver usually is: wire framing
//! ([`codec`]), the universal decode target ([`reply`], [`decoder`]), typed output sinks
//! ([`sink`]), the in-flight request queue ([`request`]), transaction scoping
//! ([`transaction`]), and the connection itself ([`connection`]), which owns the socket,
//! the pending queue, and the reconnection supervisor. [`commands`] is the public
//! per-command surface built on top of all of it.

pub mod codec;
pub mod completion;
pub mod constant;
pub mod decoder;
pub mod error;
pub mod opts;
pub mod reply;
pub mod request;
pub mod sink;
pub mod transaction;

#[cfg(feature = "tokio")]
mod commands;
#[cfg(feature = "tokio")]
mod connection;

#[cfg(feature = "tokio")]
pub use connection::Connection;
pub use error::{Error, Result};
pub use opts::ConnectionOpts;
