//! Binance WebSocket 피드 커넥터.
//!
//! `/ws` 엔드포인트 하나에 연결하고 `SUBSCRIBE`/`UNSUBSCRIBE` 제어 메시지로
//! 여러 스트림을 다중화합니다.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use super::BinanceConfig;
use crate::stream::Topic;
use crate::traits::{ExchangeResult, FeedConnection, FeedConnector};
use crate::ExchangeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binance WebSocket 구독 메시지.
#[derive(Debug, Serialize)]
struct SubscribeMessage {
    method: String,
    params: Vec<String>,
    id: u64,
}

impl SubscribeMessage {
    fn new(method: &str, topics: &[Topic], id: u64) -> Self {
        Self {
            method: method.to_string(),
            params: topics.iter().map(|t| t.as_str().to_string()).collect(),
            id,
        }
    }
}

/// Binance 실시간 피드 커넥터.
pub struct BinanceFeedConnector {
    endpoint: String,
}

impl BinanceFeedConnector {
    pub fn new(config: &BinanceConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FeedConnector for BinanceFeedConnector {
    async fn connect(&self) -> ExchangeResult<Box<dyn FeedConnection>> {
        info!("Connecting to {}", self.endpoint);

        let (ws, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| ExchangeError::WebSocket(format!("connect failed: {}", e)))?;

        Ok(Box::new(BinanceFeedConnection { ws, next_id: 1 }))
    }
}

/// 하나의 Binance WebSocket 연결.
struct BinanceFeedConnection {
    ws: WsStream,
    next_id: u64,
}

impl BinanceFeedConnection {
    async fn send_control(&mut self, method: &str, topics: &[Topic]) -> ExchangeResult<()> {
        let msg = SubscribeMessage::new(method, topics, self.next_id);
        self.next_id += 1;

        let json = serde_json::to_string(&msg)?;
        debug!(method, id = msg.id, topics = topics.len(), "Sending control request");
        self.ws.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

#[async_trait]
impl FeedConnection for BinanceFeedConnection {
    async fn send_subscribe(&mut self, topics: &[Topic]) -> ExchangeResult<()> {
        self.send_control("SUBSCRIBE", topics).await
    }

    async fn send_unsubscribe(&mut self, topics: &[Topic]) -> ExchangeResult<()> {
        self.send_control("UNSUBSCRIBE", topics).await
    }

    async fn next_frame(&mut self) -> Option<ExchangeResult<Vec<u8>>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_bytes().to_vec())),
                Ok(Message::Binary(data)) => return Some(Ok(data.to_vec())),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!(?frame, "Upstream sent close frame");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn ping(&mut self) -> ExchangeResult<()> {
        self.ws.send(Message::Ping(Vec::new().into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> ExchangeResult<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
