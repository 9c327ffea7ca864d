//! 스트림 멀티플렉서.
//!
//! 하나의 업스트림 연결을 소유하고, 수신 프레임을 분류해 토픽별 구독자에게 분배합니다.
//!
//! # 동작
//!
//! - 구독 관심 집합은 연결과 독립적으로 유지되며 연결 전에도 `subscribe`할 수 있습니다.
//! - 연결이 끊기면 지수 백오프(지터 포함)로 재연결하고 전체 관심 집합을 다시 구독합니다.
//! - 연속 재연결 실패가 `max_reconnect_attempts`를 넘으면 `FeedStatus::Failed`로 종료합니다.
//!   인증/파싱 에러처럼 재시도할 수 없는 에러는 재연결 없이 바로 `Failed`가 됩니다.
//! - `shutdown`은 모든 토픽을 구독 해제하고 소켓을 닫으며, 주어진 제한 시간 안에 끝납니다.

use rand::Rng;
use relay_core::StreamSettings;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{
    classify_frame, DispatchOutcome, Dispatcher, StreamEvent, Subscriber, SubscriberId, Topic,
};
use crate::traits::{ExchangeResult, FeedConnection, FeedConnector};
use crate::ExchangeError;

/// 업스트림 연결 상태.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// 시작 전
    Idle,
    /// 연결 중
    Connecting,
    /// 연결되어 관심 토픽 구독 완료
    Connected,
    /// 재연결 대기 중
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// 정상 종료
    Stopped,
    /// 재연결 한도 초과 등으로 종료
    Failed(String),
}

enum Command {
    /// 관심 집합과 업스트림 구독 상태를 맞춤
    Sync,
    /// 구독 해제 후 연결 종료
    Shutdown { deadline: Instant },
}

enum SessionEnd {
    Stopped,
    Lost(ExchangeError),
}

/// 단일 업스트림 연결 멀티플렉서.
pub struct StreamMultiplexer {
    connector: Arc<dyn FeedConnector>,
    settings: StreamSettings,
    dispatcher: Arc<Dispatcher>,
    interest: Arc<RwLock<BTreeSet<Topic>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    status: Arc<watch::Sender<FeedStatus>>,
}

impl StreamMultiplexer {
    /// 새 멀티플렉서를 생성합니다. 관심 집합은 비어 있습니다.
    pub fn new(connector: Arc<dyn FeedConnector>, settings: StreamSettings) -> Self {
        let dispatcher = Dispatcher::new(settings.kline_policy, settings.subscriber_buffer);
        let (status, _) = watch::channel(FeedStatus::Idle);

        Self {
            connector,
            settings,
            dispatcher: Arc::new(dispatcher),
            interest: Arc::new(RwLock::new(BTreeSet::new())),
            commands: Mutex::new(None),
            task: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// 연결 태스크를 시작합니다. 이미 실행 중이면 아무 일도 하지 않습니다.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let feed = FeedLoop {
            connector: Arc::clone(&self.connector),
            dispatcher: Arc::clone(&self.dispatcher),
            interest: Arc::clone(&self.interest),
            status: Arc::clone(&self.status),
            settings: self.settings.clone(),
        };
        *task = Some(tokio::spawn(feed.run(rx)));
        info!("Stream multiplexer started");
    }

    /// 토픽 관심을 등록합니다. 이미 등록된 토픽이면 `false`를 반환합니다.
    pub fn subscribe(&self, topic: Topic) -> bool {
        let added = self
            .interest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.clone());

        if added {
            debug!(topic = %topic, "Subscribed");
            self.notify();
        }
        added
    }

    /// 토픽 관심과 해당 토픽의 구독자를 제거합니다. 없는 토픽이어도 에러가 아닙니다.
    pub fn unsubscribe(&self, topic: &Topic) -> bool {
        let removed = self
            .interest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
        let subscribers = self.dispatcher.remove_topic(topic);

        if removed {
            debug!(topic = %topic, subscribers, "Unsubscribed");
            self.notify();
        }
        removed
    }

    /// 현재 관심 토픽 집합.
    pub fn topics(&self) -> Vec<Topic> {
        self.interest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// 구독자를 등록하고 해당 토픽을 구독합니다.
    ///
    /// 같은 식별자가 이미 있으면 교체하고 `false`를 반환합니다.
    pub fn add_subscriber<S: Subscriber>(&self, topic: Topic, id: SubscriberId, subscriber: S) -> bool {
        let added = self.dispatcher.add_subscriber(topic.clone(), id, subscriber);
        self.subscribe(topic);
        added
    }

    /// 구독자를 제거합니다. 토픽 관심은 유지됩니다.
    pub fn remove_subscriber(&self, topic: &Topic, id: &SubscriberId) -> bool {
        self.dispatcher.remove_subscriber(topic, id)
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.dispatcher.subscriber_count(topic)
    }

    /// 구독자 메일박스가 가득 차 버려진 누적 이벤트 수.
    pub fn dropped_events(&self) -> u64 {
        self.dispatcher.dropped_total()
    }

    /// 활성 캔들 스트림을 교체합니다.
    ///
    /// 이전 토픽을 구독 해제하고 새 토픽을 구독하며, 이전 토픽의 구독자를 옮깁니다.
    pub fn switch_kline(&self, from: &Topic, to: Topic) -> ExchangeResult<usize> {
        if let Some(topic) = [from, &to].into_iter().find(|t| !t.is_kline()) {
            return Err(ExchangeError::ParseError(format!("not a kline topic: {}", topic)));
        }

        {
            let mut interest = self.interest.write().unwrap_or_else(|e| e.into_inner());
            interest.remove(from);
            interest.insert(to.clone());
        }
        let moved = self.dispatcher.move_topic(from, to.clone());
        self.notify();

        info!(from = %from, to = %to, moved, "Switched kline stream");
        Ok(moved)
    }

    /// 원시 프레임을 분류하고 분배합니다.
    pub fn on_frame(&self, raw: &[u8]) -> DispatchOutcome {
        handle_frame(&self.dispatcher, raw)
    }

    /// 연결 상태 수신기.
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// 모든 토픽을 구독 해제하고 연결을 닫은 뒤 구독자 워커를 정리합니다.
    ///
    /// `timeout` 안에 끝나지 않으면 남은 태스크를 중단하고 `ExchangeError::Timeout`을 반환합니다.
    /// 종료 후 구독자는 모두 제거되며 관심 집합은 유지됩니다.
    pub async fn shutdown(&self, timeout: Duration) -> ExchangeResult<()> {
        let deadline = Instant::now() + timeout;
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();

        let mut graceful = true;
        if let Some(task) = task {
            if let Some(tx) = commands {
                let _ = tx.send(Command::Shutdown { deadline });
            }
            let abort = task.abort_handle();
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                warn!("Feed task did not stop before the deadline, aborting");
                abort.abort();
                graceful = false;
            }
        }

        if !self.dispatcher.close(deadline).await {
            graceful = false;
        }
        self.status.send_replace(FeedStatus::Stopped);
        info!(
            graceful,
            dropped_events = self.dispatcher.dropped_total(),
            "Stream multiplexer stopped"
        );

        if graceful {
            Ok(())
        } else {
            Err(ExchangeError::Timeout(format!(
                "shutdown exceeded {}ms",
                timeout.as_millis()
            )))
        }
    }

    fn notify(&self) {
        if let Some(tx) = self
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(Command::Sync);
        }
    }
}

impl Drop for StreamMultiplexer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

fn handle_frame(dispatcher: &Dispatcher, raw: &[u8]) -> DispatchOutcome {
    let event = classify_frame(raw);
    match &event {
        StreamEvent::Unrecognized(_) if event.is_control_ack() => {
            debug!("Upstream acknowledged a control request");
        }
        StreamEvent::Unrecognized(reason) => {
            warn!(reason = %reason, bytes = raw.len(), "Dropping unrecognized frame");
        }
        _ => {}
    }
    dispatcher.dispatch(&event)
}

/// 재연결 대기 시간. 지수 증가 후 `reconnect_max_ms`로 제한되며 최대 10% 지터가 붙습니다.
fn backoff_delay(settings: &StreamSettings, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = settings
        .reconnect_initial_ms
        .saturating_mul(1u64 << exponent)
        .min(settings.reconnect_max_ms);
    let jitter = if base >= 10 {
        rand::thread_rng().gen_range(0..=base / 10)
    } else {
        0
    };
    Duration::from_millis(base.saturating_add(jitter).min(settings.reconnect_max_ms))
}

// ============================================================================
// 연결 태스크
// ============================================================================

struct FeedLoop {
    connector: Arc<dyn FeedConnector>,
    dispatcher: Arc<Dispatcher>,
    interest: Arc<RwLock<BTreeSet<Topic>>>,
    status: Arc<watch::Sender<FeedStatus>>,
    settings: StreamSettings,
}

impl FeedLoop {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut attempt: u32 = 0;

        loop {
            self.status.send_replace(FeedStatus::Connecting);

            let end = match self.connector.connect().await {
                Ok(conn) => self.session(conn, &mut commands, &mut attempt).await,
                Err(e) => SessionEnd::Lost(e),
            };

            match end {
                SessionEnd::Stopped => {
                    self.status.send_replace(FeedStatus::Stopped);
                    return;
                }
                SessionEnd::Lost(e) if !e.is_retryable() => {
                    error!(error = %e, "Upstream feed failed with a non-retryable error");
                    self.status.send_replace(FeedStatus::Failed(e.to_string()));
                    return;
                }
                SessionEnd::Lost(e) => warn!(error = %e, "Upstream connection lost"),
            }

            attempt += 1;
            if attempt > self.settings.max_reconnect_attempts {
                let err = ExchangeError::RetriesExhausted {
                    attempts: self.settings.max_reconnect_attempts,
                };
                error!(error = %err, "Giving up on upstream feed");
                self.status.send_replace(FeedStatus::Failed(err.to_string()));
                return;
            }

            let delay = backoff_delay(&self.settings, attempt);
            let delay_ms = delay.as_millis() as u64;
            warn!(
                attempt,
                max = self.settings.max_reconnect_attempts,
                delay_ms,
                "Reconnecting to upstream feed"
            );
            self.status
                .send_replace(FeedStatus::Reconnecting { attempt, delay_ms });

            if !self.wait(delay, &mut commands).await {
                self.status.send_replace(FeedStatus::Stopped);
                return;
            }
        }
    }

    /// 하나의 연결 수명 동안 프레임/명령/핑을 처리합니다.
    async fn session(
        &self,
        mut conn: Box<dyn FeedConnection>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        attempt: &mut u32,
    ) -> SessionEnd {
        let mut sent = BTreeSet::new();
        if let Err(e) = self.sync_topics(conn.as_mut(), &mut sent).await {
            return SessionEnd::Lost(e);
        }

        *attempt = 0;
        self.status.send_replace(FeedStatus::Connected);
        info!(topics = sent.len(), "Upstream feed connected");

        let period = Duration::from_secs(self.settings.ping_interval_secs.max(1));
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = conn.next_frame() => match frame {
                    Some(Ok(raw)) => {
                        handle_frame(&self.dispatcher, &raw);
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e),
                    None => {
                        return SessionEnd::Lost(ExchangeError::Disconnected(
                            "upstream closed the connection".to_string(),
                        ))
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Sync) => {
                        if let Err(e) = self.sync_topics(conn.as_mut(), &mut sent).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    Some(Command::Shutdown { deadline }) => {
                        close_gracefully(conn.as_mut(), &sent, deadline).await;
                        return SessionEnd::Stopped;
                    }
                    None => {
                        let _ = conn.close().await;
                        return SessionEnd::Stopped;
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = conn.ping().await {
                        return SessionEnd::Lost(e);
                    }
                }
            }
        }
    }

    /// 관심 집합과 이 연결에서 보낸 구독을 맞춥니다. 이미 보낸 토픽은 다시 보내지 않습니다.
    async fn sync_topics(
        &self,
        conn: &mut dyn FeedConnection,
        sent: &mut BTreeSet<Topic>,
    ) -> ExchangeResult<()> {
        let desired = self
            .interest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let removed: Vec<Topic> = sent.difference(&desired).cloned().collect();
        let added: Vec<Topic> = desired.difference(sent).cloned().collect();

        if !removed.is_empty() {
            conn.send_unsubscribe(&removed).await?;
            for topic in &removed {
                sent.remove(topic);
            }
            debug!(count = removed.len(), "Upstream topics unsubscribed");
        }
        if !added.is_empty() {
            conn.send_subscribe(&added).await?;
            debug!(count = added.len(), "Upstream topics subscribed");
            sent.extend(added);
        }
        Ok(())
    }

    /// 재연결 대기. 종료 요청을 받으면 `false`를 반환합니다.
    async fn wait(&self, delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = commands.recv() => match command {
                    Some(Command::Sync) => continue,
                    Some(Command::Shutdown { .. }) | None => return false,
                },
            }
        }
    }
}

async fn close_gracefully(conn: &mut dyn FeedConnection, sent: &BTreeSet<Topic>, deadline: Instant) {
    let topics: Vec<Topic> = sent.iter().cloned().collect();
    if !topics.is_empty() {
        match tokio::time::timeout_at(deadline, conn.send_unsubscribe(&topics)).await {
            Ok(Ok(())) => debug!(count = topics.len(), "Unsubscribed all topics"),
            Ok(Err(e)) => warn!(error = %e, "Failed to unsubscribe during shutdown"),
            Err(_) => warn!("Timed out unsubscribing during shutdown"),
        }
    }

    match tokio::time::timeout_at(deadline, conn.close()).await {
        Ok(Ok(())) => debug!("Upstream connection closed"),
        Ok(Err(e)) => warn!(error = %e, "Failed to close upstream connection"),
        Err(_) => warn!("Timed out closing upstream connection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::subscriber_fn;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeverConnects;

    #[async_trait]
    impl FeedConnector for NeverConnects {
        async fn connect(&self) -> ExchangeResult<Box<dyn FeedConnection>> {
            Err(ExchangeError::NetworkError("offline".to_string()))
        }
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            topics: Vec::new(),
            reconnect_initial_ms: 100,
            reconnect_max_ms: 1_000,
            max_reconnect_attempts: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let settings = settings();
        let first = backoff_delay(&settings, 1).as_millis();
        let third = backoff_delay(&settings, 3).as_millis();
        assert!((100..=110).contains(&first));
        assert!((400..=440).contains(&third));
        assert_eq!(backoff_delay(&settings, 30).as_millis(), 1_000);
    }

    #[tokio::test]
    async fn test_subscribe_before_start_is_buffered_and_idempotent() {
        let mux = StreamMultiplexer::new(Arc::new(NeverConnects), settings());
        assert!(mux.subscribe(Topic::new("X")));
        assert!(!mux.subscribe(Topic::new("X")));
        assert_eq!(mux.topics(), vec![Topic::new("X")]);

        assert!(mux.unsubscribe(&Topic::new("X")));
        assert!(!mux.unsubscribe(&Topic::new("X")));
        assert!(mux.topics().is_empty());
        assert_eq!(mux.current_status(), FeedStatus::Idle);
    }

    #[tokio::test]
    async fn test_switch_kline_rejects_non_kline_target() {
        let mux = StreamMultiplexer::new(Arc::new(NeverConnects), settings());
        let from = Topic::new("btcusdt@kline_1m");
        let result = mux.switch_kline(&from, Topic::mini_ticker("btcusdt"));
        assert!(matches!(result, Err(ExchangeError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_switch_kline_rejects_non_kline_source() {
        let mux = StreamMultiplexer::new(Arc::new(NeverConnects), settings());
        let ticker = Topic::mini_ticker("btcusdt");
        mux.add_subscriber(
            ticker.clone(),
            "ui".into(),
            subscriber_fn(|_: &StreamEvent| Ok(())),
        );

        let result = mux.switch_kline(&ticker, Topic::new("btcusdt@kline_1m"));
        assert!(matches!(result, Err(ExchangeError::ParseError(_))));
        assert_eq!(mux.topics(), vec![ticker.clone()]);
        assert_eq!(mux.subscriber_count(&ticker), 1);
    }

    struct Rejects {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl FeedConnector for Rejects {
        async fn connect(&self) -> ExchangeResult<Box<dyn FeedConnection>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Unauthorized("invalid api key".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_without_reconnecting() {
        let connector = Arc::new(Rejects {
            attempts: AtomicUsize::new(0),
        });
        let mux = StreamMultiplexer::new(connector.clone(), settings());
        let mut status = mux.status();
        mux.start();

        let failed = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let FeedStatus::Failed(reason) = status.borrow_and_update().clone() {
                    return reason;
                }
                if status.changed().await.is_err() {
                    return String::new();
                }
            }
        })
        .await
        .unwrap();

        assert!(failed.contains("Unauthorized"));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        mux.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_frame_is_dropped() {
        let mux = StreamMultiplexer::new(Arc::new(NeverConnects), settings());
        mux.add_subscriber(
            Topic::all_mini_tickers(),
            "ui".into(),
            subscriber_fn(|_: &StreamEvent| Ok(())),
        );
        let outcome = mux.on_frame(b"{\"hello\":");
        assert_eq!(outcome.topic, None);
        assert_eq!(outcome.delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_reports_failure() {
        let mux = StreamMultiplexer::new(Arc::new(NeverConnects), settings());
        let mut status = mux.status();
        mux.start();

        let failed = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let FeedStatus::Failed(reason) = status.borrow_and_update().clone() {
                    return reason;
                }
                if status.changed().await.is_err() {
                    return String::new();
                }
            }
        })
        .await
        .unwrap();

        assert!(failed.contains("2 attempts"));
        mux.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(mux.current_status(), FeedStatus::Stopped);
    }
}
