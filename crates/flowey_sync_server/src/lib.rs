//! # Flowey Sync Server
//!
//! Websocket server that keeps one JSON state document per user in sync
//! across all of that user's open connections.
//!
//! This crate provides:
//! - Session authentication (`Authenticator`, `SessionAuthenticator`)
//! - Version-based reconciliation of submitted states (`Reconciler`)
//! - A registry of live connections grouped by user (`ConnectionRegistry`)
//! - The per-connection state machine (`ConnectionHandler`)
//! - The `/ws` upgrade, the `/session` endpoint and graceful drain
//!   (`SyncServer`)
//!
//! # Protocol
//!
//! Clients obtain a token with `POST /session`, then open a websocket on
//! `/ws` with `Sec-WebSocket-Protocol: flowey, <token>`
//! and exchange whole state documents, each carrying an integer `version`:
//! 1. A client submits the state it has, with the version it was based on
//! 2. If that equals the stored state nothing happens
//! 3. If its version matches the stored version, the state is stored with
//!    the next version and sent to every connection of the user, the
//!    submitter included
//! 4. Otherwise the stored state is sent back to the submitter only, which
//!    re-bases and submits again
//!
//! Versions wrap from 999999 back to 0.
//!
//! # Shutdown
//!
//! [`SyncServer::shutdown`] stops accepting, asks every connection to close
//! with a normal closure and waits (bounded) for all connection tasks to exit.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod reconciler;
mod registry;
mod server;
mod session;
mod transport;
mod ws;

pub use auth::{AuthConfig, Authenticator, Credentials, SessionAuthenticator, SessionToken};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{ConnectionHandler, ConnectionState, HandlerContext};
pub use reconciler::{Outcome, Reconciler};
pub use registry::{CloseSignal, ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::SyncServer;
pub use transport::{ChannelPeer, ChannelTransport, Inbound, MessageTransport};
pub use ws::WebSocketTransport;
