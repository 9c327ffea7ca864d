//! 외부 클라이언트용 이벤트 싱크.
//!
//! 토픽별 `broadcast` 채널을 사용하며, 채널은 첫 구독 또는 첫 발행 시 생성됩니다.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::{StreamEvent, Subscriber, SubscriberError, Topic};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// 외부로 내보내는 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub topic: Topic,
    pub payload: Value,
}

/// 분류된 이벤트를 외부 소비자에게 전달하는 싱크.
pub trait EventSink: Send + Sync {
    /// 이벤트를 발행하고 수신자 수를 반환합니다. 수신자가 없으면 0입니다.
    fn push_event(&self, topic: &Topic, payload: Value) -> usize;
}

/// 토픽별 broadcast 채널 허브.
///
/// 복제본끼리 같은 채널을 공유합니다.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    channels: Arc<RwLock<HashMap<Topic, broadcast::Sender<Arc<OutboundEvent>>>>>,
    capacity: usize,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// 토픽을 구독합니다. 채널이 없으면 생성합니다.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Arc<OutboundEvent>> {
        {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            if let Some(tx) = channels.get(topic) {
                return tx.subscribe();
            }
        }

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// 현재 수신자 수.
    pub fn receiver_count(&self, topic: &Topic) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn push_event(&self, topic: &Topic, payload: Value) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        match channels.get(topic) {
            Some(tx) => tx
                .send(Arc::new(OutboundEvent {
                    topic: topic.clone(),
                    payload,
                }))
                .unwrap_or(0),
            None => 0,
        }
    }
}

/// 분류된 이벤트를 싱크로 전달하는 구독자.
pub struct SinkSubscriber<S: EventSink + ?Sized> {
    sink: Arc<S>,
}

impl<S: EventSink + ?Sized> SinkSubscriber<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

impl<S: EventSink + ?Sized + 'static> Subscriber for SinkSubscriber<S> {
    fn on_event(&self, event: &StreamEvent) -> Result<(), SubscriberError> {
        let topic = event
            .topic()
            .ok_or_else(|| SubscriberError::Failed("event has no topic".to_string()))?;
        self.sink.push_event(&topic, event.to_payload());
        Ok(())
    }
}
