//! Message transport abstraction.
//!
//! A connection handler only needs to receive text frames, send text frames
//! and close with a reason. [`crate::WebSocketTransport`] implements this over
//! a real websocket; [`ChannelTransport`] implements it over in-process
//! channels so handlers can be driven without sockets.

use crate::error::{ServerError, ServerResult};
use flowey_protocol::CloseReason;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One event read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text message.
    Text(String),
    /// A frame the protocol does not use (binary, ping, pong).
    Ignored,
    /// The peer closed the connection.
    Closed {
        /// Close code sent by the peer, if any.
        code: Option<u16>,
        /// Close reason sent by the peer.
        reason: String,
    },
    /// The connection failed.
    Failed(String),
}

impl Inbound {
    /// Returns whether no further events will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Inbound::Closed { .. } | Inbound::Failed(_))
    }
}

/// Bidirectional text message transport.
pub trait MessageTransport: Send {
    /// Waits for the next inbound event.
    ///
    /// Must be cancel-safe: dropping the future before it completes must not
    /// lose a message.
    fn receive(&mut self) -> impl Future<Output = Inbound> + Send;

    /// Sends one text message.
    fn send(&mut self, text: String) -> impl Future<Output = ServerResult<()>> + Send;

    /// Closes the connection with `reason`. Errors are swallowed.
    fn close(&mut self, reason: CloseReason) -> impl Future<Output = ()> + Send;
}

/// In-process transport backed by channels.
pub struct ChannelTransport {
    incoming: mpsc::Receiver<Inbound>,
    outgoing: Option<mpsc::Sender<String>>,
    closed: Arc<Mutex<Option<CloseReason>>>,
}

/// The client end of a [`ChannelTransport`].
pub struct ChannelPeer {
    to_server: Option<mpsc::Sender<Inbound>>,
    from_server: mpsc::Receiver<String>,
    closed: Arc<Mutex<Option<CloseReason>>>,
}

impl ChannelTransport {
    /// Creates a connected transport and peer.
    ///
    /// `capacity` bounds each direction; a peer that stops reading eventually
    /// blocks the server's sends.
    pub fn pair(capacity: usize) -> (ChannelTransport, ChannelPeer) {
        let capacity = capacity.max(1);
        let (to_server, incoming) = mpsc::channel(capacity);
        let (outgoing, from_server) = mpsc::channel(capacity);
        let closed = Arc::new(Mutex::new(None));

        let transport = ChannelTransport {
            incoming,
            outgoing: Some(outgoing),
            closed: Arc::clone(&closed),
        };
        let peer = ChannelPeer {
            to_server: Some(to_server),
            from_server,
            closed,
        };
        (transport, peer)
    }
}

impl MessageTransport for ChannelTransport {
    async fn receive(&mut self) -> Inbound {
        self.incoming.recv().await.unwrap_or(Inbound::Closed {
            code: None,
            reason: String::new(),
        })
    }

    async fn send(&mut self, text: String) -> ServerResult<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| ServerError::Transport("transport closed".into()))?;
        outgoing
            .send(text)
            .await
            .map_err(|_| ServerError::Transport("peer went away".into()))
    }

    async fn close(&mut self, reason: CloseReason) {
        {
            let mut closed = self.closed.lock();
            if closed.is_none() {
                *closed = Some(reason);
            }
        }
        self.outgoing = None;
    }
}

impl ChannelPeer {
    /// Sends a text message to the server.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        self.send_event(Inbound::Text(text.into())).await
    }

    /// Sends an arbitrary event to the server.
    pub async fn send_event(&self, event: Inbound) -> bool {
        match &self.to_server {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Drops the client side of the connection.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Waits for the next message from the server.
    ///
    /// Returns `None` once the server closed the transport and all messages
    /// were read.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_server.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_server.try_recv().ok()
    }

    /// Returns the reason the server closed with, if it did.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }

    /// Reads and discards messages until the server closes, then returns the
    /// close reason.
    pub async fn closed(&mut self) -> Option<CloseReason> {
        while self.from_server.recv().await.is_some() {}
        self.close_reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (mut transport, mut peer) = ChannelTransport::pair(4);

        assert!(peer.send("hello").await);
        assert_eq!(transport.receive().await, Inbound::Text("hello".into()));

        transport.send("world".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn disconnect_reads_as_closed() {
        let (mut transport, mut peer) = ChannelTransport::pair(4);
        peer.disconnect();

        let event = transport.receive().await;
        assert!(event.is_terminal());
        assert_eq!(
            event,
            Inbound::Closed {
                code: None,
                reason: String::new()
            }
        );
    }

    #[tokio::test]
    async fn close_records_reason_and_ends_stream() {
        let (mut transport, mut peer) = ChannelTransport::pair(4);
        transport.send("last".into()).await.unwrap();
        transport.close(CloseReason::Shutdown).await;

        assert_eq!(peer.recv().await.as_deref(), Some("last"));
        assert_eq!(peer.closed().await, Some(CloseReason::Shutdown));
        assert!(transport.send("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn first_close_reason_is_kept() {
        let (mut transport, peer) = ChannelTransport::pair(4);
        transport.close(CloseReason::Lagging).await;
        transport.close(CloseReason::Shutdown).await;
        assert_eq!(peer.close_reason(), Some(CloseReason::Lagging));
    }

    #[tokio::test]
    async fn send_to_dropped_peer_fails() {
        let (mut transport, peer) = ChannelTransport::pair(4);
        drop(peer);
        assert!(matches!(
            transport.send("x".into()).await,
            Err(ServerError::Transport(_))
        ));
    }

    #[test]
    fn terminal_events() {
        assert!(!Inbound::Text(String::new()).is_terminal());
        assert!(!Inbound::Ignored.is_terminal());
        assert!(Inbound::Failed("reset".into()).is_terminal());
    }
}
