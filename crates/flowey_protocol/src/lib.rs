//! # Flowey Sync Protocol
//!
//! Wire-level types shared by the Flowey store, server and CLI.
//!
//! This crate provides:
//! - `UserId` and `Version` identity/counter types
//! - `State`, the versioned JSON document kept per user
//! - Subprotocol header parsing for the websocket handshake
//! - `CloseReason` codes sent when the server ends a connection
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod close;
mod error;
mod handshake;
mod state;
mod types;

pub use close::CloseReason;
pub use error::{ProtocolError, ProtocolResult};
pub use handshake::{parse_subprotocol_header, SUBPROTOCOL};
pub use state::{State, VERSION_FIELD};
pub use types::{UserId, Version, VERSION_MODULUS};
