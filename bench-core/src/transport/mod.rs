//! # transport
//!
//! The seam between the benchmark engine and the network. A [`Transport`]
//! owns one shared connection and hands out independent [`Context`]s on it,
//! one per worker. Connection events are delivered to a
//! [`ConnectionListener`] registered at dial time.
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{PublishMessage, ReceivedMessage, SubscribeMessage};

pub mod loopback;
pub mod mqtt;

pub use loopback::{LoopbackHandle, LoopbackTransport};
pub use mqtt::MqttTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// request could not be handed to the connection
    #[error("client error: {0}")]
    Client(String),
    #[error("connection error: {0}")]
    Connection(String),
    /// the connection's queues are gone; nothing more will complete
    #[error("transport closed")]
    Closed,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("TLS error: {0}")]
    Tls(String),
}

impl TransportError {
    /// Returns true if the same operation may succeed when resubmitted
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Client(_) | TransportError::Connection(_)
        )
    }
}

/// One logical send/receive channel on the shared connection. Never shared
/// between workers.
#[async_trait]
pub trait Context: Send + 'static {
    /// completes once the transport has accepted the message
    async fn send(&mut self, msg: PublishMessage) -> Result<(), TransportError>;

    /// completes with the next message delivered to this context
    ///
    /// CANCEL-SAFETY: must be cancel-safe, workers race it against shutdown
    async fn recv(&mut self) -> Result<ReceivedMessage, TransportError>;
}

/// Non-blocking subscribe capability handed to [`ConnectionListener::on_connect`]
pub trait Subscriber: Send + Sync {
    /// queue a SUBSCRIBE without waiting for it to be sent
    fn try_subscribe(&self, msg: SubscribeMessage) -> Result<(), TransportError>;
}

/// Edge-triggered connection callbacks
pub trait ConnectionListener: Send + Sync + 'static {
    fn on_connect(&self, subscriber: &dyn Subscriber);
    fn on_disconnect(&self, reason: &str);
}

#[async_trait]
pub trait Transport: Send + 'static {
    type Context: Context;

    /// open a new independent context on the connection
    fn open_context(&self) -> Result<Self::Context, TransportError>;

    /// Start connecting in the background. Returns once the dialer is
    /// running; `listener` is told when the connection comes up or drops.
    fn dial(&mut self, listener: Arc<dyn ConnectionListener>) -> Result<(), TransportError>;

    /// disconnect and stop background work
    async fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let io = TransportError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(io.is_retryable());
        assert!(TransportError::Client("request channel full".into()).is_retryable());
        assert!(TransportError::Connection("reset".into()).is_retryable());

        assert!(!TransportError::Closed.is_retryable());
        assert!(!TransportError::Unsupported("mqtt 3.1".into()).is_retryable());
        assert!(!TransportError::Tls("bad cert".into()).is_retryable());
    }
}
