// WebSocket transport for the live channel
use crate::application::channel_connector::{ChannelConnector, ChannelTransport, TransportEvent};
use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn open(&self, endpoint: &str) -> anyhow::Result<ChannelTransport> {
        let url = Url::parse(endpoint).with_context(|| format!("Invalid live channel endpoint '{}'", endpoint))?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        tracing::debug!("WebSocket handshake completed with {}", url);

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // Pump frames both ways until either side closes
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound_tx.send(TransportEvent::Message(text));
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                let _ = inbound_tx.send(TransportEvent::Message(text));
                            }
                            Err(_) => {
                                let _ = inbound_tx.send(TransportEvent::Error("binary frame is not UTF-8".to_string()));
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        // protocol-level ping/pong frames are answered by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    },
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed);
        });

        Ok(ChannelTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
