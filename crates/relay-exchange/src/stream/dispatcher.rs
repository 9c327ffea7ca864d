//! 토픽별 이벤트 분배기.
//!
//! 각 `(토픽, 구독자)` 항목은 전용 FIFO 메일박스와 워커 태스크를 가집니다.
//! - 같은 토픽의 이벤트는 도착 순서대로 구독자에게 전달됩니다.
//! - 구독자 콜백은 블로킹 스레드 풀에서 실행되므로 오래 걸리는 콜백도 피드 루프와
//!   다른 구독자의 전달을 막지 않습니다.
//! - 구독자의 에러와 패닉은 해당 워커 안에서 기록되고 다른 구독자에게 전파되지 않습니다.
//!
//! # 메일박스 포화
//!
//! 메일박스는 `buffer` 크기로 제한됩니다. 가득 차면 그 구독자에 대해서만 이벤트를 버리므로
//! 느린 구독자는 확정 캔들을 포함한 일부 이벤트를 받지 못할 수 있습니다. 피드 루프가
//! 구독자를 기다리며 멈추는 대신 전달 누락을 택한 것이며, 버려진 수는
//! `DispatchOutcome::dropped`와 누적 `Dispatcher::dropped_total`로 확인할 수 있습니다.

use relay_core::KlinePolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{StreamEvent, SubscriberId, Topic, TopicRegistry};

/// 구독자 처리 에러.
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// 이벤트 처리 실패
    #[error("Subscriber failed: {0}")]
    Failed(String),

    /// 구독자가 더 이상 이벤트를 받을 수 없음
    #[error("Subscriber closed")]
    Closed,
}

/// 이벤트 구독자.
///
/// 이벤트마다 `spawn_blocking`으로 호출되며, 한 구독자의 호출은 순서대로 하나씩 실행됩니다.
pub trait Subscriber: Send + Sync + 'static {
    fn on_event(&self, event: &StreamEvent) -> Result<(), SubscriberError>;
}

impl<F> Subscriber for F
where
    F: Fn(&StreamEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &StreamEvent) -> Result<(), SubscriberError> {
        self(event)
    }
}

/// 클로저를 구독자로 사용할 때 시그니처 추론을 돕습니다.
pub fn subscriber_fn<F>(f: F) -> F
where
    F: Fn(&StreamEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    f
}

/// 분배 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// 이벤트 토픽 (분류 실패 시 `None`)
    pub topic: Option<Topic>,
    /// 메일박스에 적재된 구독자 수
    pub delivered: usize,
    /// 메일박스가 가득 차거나 닫혀 버려진 수
    pub dropped: usize,
    /// 캔들 정책에 의해 걸러졌는지 여부
    pub filtered: bool,
}

struct Mailbox {
    tx: mpsc::Sender<Arc<StreamEvent>>,
    worker: JoinHandle<()>,
}

/// 토픽 레지스트리를 소유하는 분배기.
pub struct Dispatcher {
    registry: RwLock<TopicRegistry<Mailbox>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    kline_policy: KlinePolicy,
    buffer: usize,
    dropped_total: AtomicU64,
}

impl Dispatcher {
    /// 새 분배기를 생성합니다. `buffer`는 구독자별 메일박스 크기입니다.
    pub fn new(kline_policy: KlinePolicy, buffer: usize) -> Self {
        Self {
            registry: RwLock::new(TopicRegistry::new()),
            retired: Mutex::new(Vec::new()),
            kline_policy,
            buffer: buffer.max(1),
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn kline_policy(&self) -> KlinePolicy {
        self.kline_policy
    }

    /// 생성 이후 메일박스 포화나 워커 종료로 버려진 이벤트 수.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// 구독자를 등록하고 워커를 시작합니다.
    ///
    /// 같은 토픽에 같은 식별자가 이미 있으면 교체하고 `false`를 반환합니다.
    /// Tokio 런타임 안에서 호출해야 합니다.
    pub fn add_subscriber<S: Subscriber>(&self, topic: Topic, id: SubscriberId, subscriber: S) -> bool {
        let (tx, rx) = mpsc::channel(self.buffer);
        let worker = tokio::spawn(run_mailbox(
            topic.clone(),
            id.clone(),
            Arc::new(subscriber),
            rx,
        ));

        let previous = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic, id, Mailbox { tx, worker });

        match previous {
            Some(old) => {
                self.retire(old);
                false
            }
            None => true,
        }
    }

    /// 구독자를 제거합니다. 이미 적재된 이벤트는 워커가 마저 처리합니다.
    pub fn remove_subscriber(&self, topic: &Topic, id: &SubscriberId) -> bool {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic, id);

        match removed {
            Some(mailbox) => {
                self.retire(mailbox);
                true
            }
            None => false,
        }
    }

    /// 토픽의 모든 구독자를 제거합니다.
    pub fn remove_topic(&self, topic: &Topic) -> usize {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove_topic(topic);

        let count = removed.len();
        for (_, mailbox) in removed {
            self.retire(mailbox);
        }
        count
    }

    /// 토픽의 구독자를 다른 토픽으로 옮깁니다.
    pub fn move_topic(&self, from: &Topic, to: Topic) -> usize {
        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .move_topic(from, to)
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .subscriber_count(topic)
    }

    /// 구독자가 있는 토픽 목록.
    pub fn topics(&self) -> Vec<Topic> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .topics()
            .cloned()
            .collect()
    }

    /// 이벤트를 해당 토픽의 모든 구독자 메일박스에 적재합니다.
    ///
    /// 블로킹하지 않으며 구독자 수와 무관하게 즉시 반환합니다.
    pub fn dispatch(&self, event: &StreamEvent) -> DispatchOutcome {
        let Some(topic) = event.topic() else {
            return DispatchOutcome::default();
        };

        let mut outcome = DispatchOutcome {
            topic: Some(topic.clone()),
            ..Default::default()
        };

        if let StreamEvent::KlineUpdate {
            is_closed: false, ..
        } = event
        {
            if self.kline_policy == KlinePolicy::ClosedOnly {
                outcome.filtered = true;
                return outcome;
            }
        }

        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut shared: Option<Arc<StreamEvent>> = None;

        for (id, mailbox) in registry.subscribers(&topic) {
            let event = shared
                .get_or_insert_with(|| Arc::new(event.clone()))
                .clone();

            match mailbox.tx.try_send(event) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    outcome.dropped += 1;
                    warn!(topic = %topic, subscriber = %id, "Subscriber mailbox full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    outcome.dropped += 1;
                    warn!(topic = %topic, subscriber = %id, "Subscriber worker stopped, dropping event");
                }
            }
        }

        if outcome.dropped > 0 {
            self.dropped_total
                .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        }
        outcome
    }

    /// 모든 메일박스를 닫고 워커가 남은 이벤트를 처리할 때까지 기다립니다.
    ///
    /// 기한 안에 끝나지 않은 워커는 중단하며, 그런 워커가 있으면 `false`를 반환합니다.
    pub async fn close(&self, deadline: Instant) -> bool {
        let mut workers: Vec<JoinHandle<()>> = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .into_iter()
            .map(|(_, _, mailbox)| mailbox.worker)
            .collect();
        workers.append(&mut self.retired.lock().unwrap_or_else(|e| e.into_inner()));

        let mut clean = true;
        for worker in workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout_at(deadline, worker).await.is_err() {
                abort.abort();
                clean = false;
            }
        }
        if !clean {
            warn!("Some subscriber workers did not finish before the deadline");
        }
        clean
    }

    fn retire(&self, mailbox: Mailbox) {
        let Mailbox { tx, worker } = mailbox;
        drop(tx);
        let mut retired = self.retired.lock().unwrap_or_else(|e| e.into_inner());
        retired.retain(|handle| !handle.is_finished());
        retired.push(worker);
    }
}

async fn run_mailbox(
    topic: Topic,
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber>,
    mut rx: mpsc::Receiver<Arc<StreamEvent>>,
) {
    while let Some(event) = rx.recv().await {
        let subscriber = Arc::clone(&subscriber);
        let handled = tokio::task::spawn_blocking(move || subscriber.on_event(&event)).await;

        match handled {
            Ok(Ok(())) => {}
            Ok(Err(SubscriberError::Closed)) => {
                debug!(topic = %topic, subscriber = %id, "Subscriber closed, stopping worker");
                break;
            }
            Ok(Err(e)) => {
                warn!(topic = %topic, subscriber = %id, error = %e, "Subscriber failed to handle event");
            }
            Err(e) if e.is_panic() => {
                error!(topic = %topic, subscriber = %id, "Subscriber panicked while handling event");
            }
            Err(_) => {
                debug!(topic = %topic, subscriber = %id, "Subscriber call cancelled, stopping worker");
                break;
            }
        }
    }
    debug!(topic = %topic, subscriber = %id, "Subscriber mailbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MiniTicker;
    use relay_core::{Candle, Timeframe};
    use std::time::Duration;

    fn ticker(symbol: &str, close: f64) -> StreamEvent {
        StreamEvent::SingleTicker(MiniTicker {
            event_time: 0,
            symbol: symbol.to_string(),
            close,
            open: close,
            high: close,
            low: close,
            volume: 0.0,
            quote_volume: 0.0,
        })
    }

    fn kline(closed: bool) -> StreamEvent {
        StreamEvent::KlineUpdate {
            topic: Topic::kline("btcusdt", Timeframe::M1),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            candle: Candle::flat(0, 1.0),
            is_closed: closed,
        }
    }

    fn recording(tx: mpsc::UnboundedSender<f64>) -> impl Subscriber {
        subscriber_fn(move |event: &StreamEvent| {
            if let StreamEvent::SingleTicker(t) = event {
                let _ = tx.send(t.close);
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_duplicate_registration_delivers_once() {
        let dispatcher = Dispatcher::new(KlinePolicy::Live, 16);
        let topic = Topic::mini_ticker("btcusdt");
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(dispatcher.add_subscriber(topic.clone(), "ui".into(), recording(tx.clone())));
        assert!(!dispatcher.add_subscriber(topic.clone(), "ui".into(), recording(tx)));

        let outcome = dispatcher.dispatch(&ticker("BTCUSDT", 1.0));
        assert_eq!(outcome.delivered, 1);

        assert_eq!(rx.recv().await, Some(1.0));
        assert!(dispatcher.close(Instant::now() + Duration::from_secs(1)).await);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_zero_subscribers() {
        let dispatcher = Dispatcher::new(KlinePolicy::Live, 16);
        let outcome = dispatcher.dispatch(&ticker("ETHUSDT", 1.0));
        assert_eq!(outcome.topic, Some(Topic::mini_ticker("ethusdt")));
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.dropped, 0);

        let outcome = dispatcher.dispatch(&StreamEvent::Unrecognized("junk".into()));
        assert_eq!(outcome, DispatchOutcome::default());
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated() {
        let dispatcher = Dispatcher::new(KlinePolicy::Live, 16);
        let topic = Topic::mini_ticker("btcusdt");
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_subscriber(
            topic.clone(),
            "panics".into(),
            subscriber_fn(|_: &StreamEvent| panic!("boom")),
        );
        dispatcher.add_subscriber(
            topic.clone(),
            "errors".into(),
            subscriber_fn(|_: &StreamEvent| Err(SubscriberError::Failed("nope".into()))),
        );
        dispatcher.add_subscriber(topic.clone(), "ok".into(), recording(tx));

        for close in [1.0, 2.0, 3.0] {
            assert_eq!(dispatcher.dispatch(&ticker("BTCUSDT", close)).delivered, 3);
        }

        assert_eq!(rx.recv().await, Some(1.0));
        assert_eq!(rx.recv().await, Some(2.0));
        assert_eq!(rx.recv().await, Some(3.0));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_only_for_slow_subscriber() {
        let dispatcher = Dispatcher::new(KlinePolicy::Live, 1);
        let topic = Topic::mini_ticker("btcusdt");
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_subscriber(
            topic.clone(),
            "slow".into(),
            subscriber_fn(move |_: &StreamEvent| {
                let _ = gate_rx.lock().unwrap().recv();
                Ok(())
            }),
        );
        dispatcher.add_subscriber(topic.clone(), "fast".into(), recording(tx));

        let mut dropped = 0;
        for i in 0..3 {
            let outcome = dispatcher.dispatch(&ticker("BTCUSDT", i as f64));
            dropped += outcome.dropped;
            assert_eq!(rx.recv().await, Some(i as f64));
        }
        assert!(dropped >= 1);
        assert_eq!(dispatcher.dropped_total(), dropped as u64);

        drop(gate_tx);
    }

    #[tokio::test]
    async fn test_blocking_subscriber_does_not_delay_others() {
        let dispatcher = Dispatcher::new(KlinePolicy::Live, 16);
        let topic = Topic::mini_ticker("btcusdt");
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_subscriber(
            topic.clone(),
            "blocking".into(),
            subscriber_fn(move |_: &StreamEvent| {
                let _ = gate_rx.lock().unwrap().recv();
                Ok(())
            }),
        );
        dispatcher.add_subscriber(topic.clone(), "fast".into(), recording(tx));

        for close in [1.0, 2.0, 3.0] {
            assert_eq!(dispatcher.dispatch(&ticker("BTCUSDT", close)).delivered, 2);
            let received = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
            assert_eq!(received.ok().flatten(), Some(close));
        }

        drop(gate_tx);
        assert!(dispatcher.close(Instant::now() + Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_closed_only_policy_filters_in_progress_candles() {
        let dispatcher = Dispatcher::new(KlinePolicy::ClosedOnly, 16);
        let topic = Topic::kline("btcusdt", Timeframe::M1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.add_subscriber(
            topic,
            "chart".into(),
            subscriber_fn(move |event: &StreamEvent| {
                if let StreamEvent::KlineUpdate { is_closed, .. } = event {
                    let _ = tx.send(*is_closed);
                }
                Ok(())
            }),
        );

        assert!(dispatcher.dispatch(&kline(false)).filtered);
        let outcome = dispatcher.dispatch(&kline(true));
        assert!(!outcome.filtered);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(rx.recv().await, Some(true));
    }
}
