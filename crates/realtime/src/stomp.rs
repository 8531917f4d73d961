//! STOMP over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use storefront_core::ClientConfig;

use crate::error::RealtimeError;
use crate::frame::{Command, Frame, decode};
use crate::link::{BrokerLink, Connector, InboundMessage, SubscriptionId};

/// Supplies the access token sent with `CONNECT`, read at every (re)connect.
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub struct StompConnector {
    url: String,
    heartbeat: Duration,
    connect_timeout: Duration,
    token: Option<TokenSource>,
}

impl StompConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: config.realtime_url.clone(),
            heartbeat: config.heartbeat_interval,
            connect_timeout: config.request_timeout,
            token: None,
        }
    }

    pub fn with_token_source(mut self, token: TokenSource) -> Self {
        self.token = Some(token);
        self
    }

    fn host(&self) -> String {
        self.url
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }

    async fn handshake(&self) -> Result<StompLink, RealtimeError> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        let mut link = StompLink { socket };

        let token = self.token.as_ref().and_then(|source| source());
        let heartbeat_ms = u64::try_from(self.heartbeat.as_millis()).unwrap_or(u64::MAX);
        link.send(Frame::connect(&self.host(), heartbeat_ms, token.as_deref()))
            .await?;

        loop {
            let frame = link.next_frame().await.ok_or(RealtimeError::Closed)??;
            match frame.command {
                Command::Connected => {
                    tracing::debug!(
                        version = frame.get("version"),
                        server = frame.get("server"),
                        "stomp session established"
                    );
                    return Ok(link);
                }
                Command::Error => return Err(refusal(&frame)),
                other => tracing::debug!(command = other.as_str(), "ignoring frame before CONNECTED"),
            }
        }
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerLink>, RealtimeError> {
        let link = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| RealtimeError::ConnectTimeout(self.connect_timeout))??;
        Ok(Box::new(link))
    }
}

struct StompLink {
    socket: Socket,
}

impl StompLink {
    async fn send(&mut self, frame: Frame) -> Result<(), RealtimeError> {
        self.socket.send(Message::Text(frame.encode())).await?;
        Ok(())
    }

    /// Next non-heartbeat frame. Undecodable frames are logged and skipped.
    async fn next_frame(&mut self) -> Option<Result<Frame, RealtimeError>> {
        loop {
            let text = match self.socket.next().await? {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::warn!("dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            };

            match decode(&text) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(e) => tracing::warn!(error = %e, "dropping undecodable stomp frame"),
            }
        }
    }
}

#[async_trait]
impl BrokerLink for StompLink {
    async fn subscribe(&mut self, id: &SubscriptionId, topic: &str) -> Result<(), RealtimeError> {
        self.send(Frame::subscribe(id.as_str(), topic)).await
    }

    async fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), RealtimeError> {
        self.send(Frame::unsubscribe(id.as_str())).await
    }

    async fn next_message(&mut self) -> Option<Result<InboundMessage, RealtimeError>> {
        loop {
            let frame = match self.next_frame().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e)),
            };
            match frame.command {
                Command::Message => {
                    let Some(subscription) = frame.get("subscription") else {
                        tracing::warn!("MESSAGE frame without subscription header");
                        continue;
                    };
                    return Some(Ok(InboundMessage {
                        subscription: SubscriptionId::from(subscription),
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        body: frame.body,
                    }));
                }
                Command::Error => return Some(Err(refusal(&frame))),
                other => tracing::debug!(command = other.as_str(), "ignoring stomp frame"),
            }
        }
    }

    async fn heartbeat(&mut self) -> Result<(), RealtimeError> {
        self.socket.send(Message::Text("\n".to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.send(Frame::disconnect()).await {
            tracing::debug!(error = %e, "DISCONNECT not delivered");
        }
        let _ = self.socket.close(None).await;
    }
}

fn refusal(frame: &Frame) -> RealtimeError {
    let message = frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone());
    RealtimeError::Refused(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_taken_from_the_url() {
        let config = ClientConfig {
            realtime_url: "wss://shop.test:8443/ws".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(StompConnector::new(&config).host(), "shop.test");
    }
}
