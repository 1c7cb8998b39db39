//! Transport seam between the gateway and wherever the engine actually runs.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use super::error::TransportError;
use super::protocol::{InboundMessage, OutboundMessage};

/// Stream of frames coming back from the engine.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Outbound half of an engine connection.
///
/// `send` must not block: implementations hand the frame to a writer task or
/// an in-process channel and return immediately.
pub trait EngineTransport: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Forcibly tear the connection down. Further sends fail with `Closed`.
    fn terminate(&self);
}

/// In-process duplex: the gateway side sends [`OutboundMessage`]s, the engine
/// side (an embedded engine, or a test double) answers with [`InboundMessage`]s.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    closed: AtomicBool,
}

/// Engine-facing half of a [`ChannelTransport`].
pub struct EngineEndpoint {
    pub requests: mpsc::UnboundedReceiver<OutboundMessage>,
    pub replies: mpsc::UnboundedSender<InboundMessage>,
}

impl ChannelTransport {
    /// Build a connected transport, the receiver the gateway consumes, and
    /// the endpoint the engine drives.
    pub fn pair() -> (Self, InboundReceiver, EngineEndpoint) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Self {
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
        };
        let endpoint = EngineEndpoint {
            requests: outbound_rx,
            replies: inbound_tx,
        };

        (transport, inbound_rx, endpoint)
    }
}

impl EngineTransport for ChannelTransport {
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    fn terminate(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Channel transport terminated");
        }
    }
}
