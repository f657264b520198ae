// Connector trait for the live channel transport
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed,
}

/// An open full-duplex transport.
///
/// Dropping `outbound` closes the transport. `inbound` yields frames in the
/// order they were received and ends with `Closed` (or simply ends).
#[derive(Debug)]
pub struct ChannelTransport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, endpoint: &str) -> anyhow::Result<ChannelTransport>;
}
