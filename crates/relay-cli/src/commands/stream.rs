//! 실시간 스트림 명령어.
//!
//! 하나의 업스트림 연결로 토픽들을 구독하고, 분류된 이벤트를
//! `{"topic": ..., "payload": ...}` JSON 줄로 stdout에 출력합니다.
//! Ctrl-C 또는 `--duration-secs` 경과 시 구독 해제 후 종료합니다.

use anyhow::{bail, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{info, warn};

use relay_core::{AppConfig, KlinePolicy};
use relay_exchange::{
    BinanceConfig, BinanceFeedConnector, BroadcastSink, FeedStatus, OutboundEvent,
    SinkSubscriber, StreamMultiplexer, SubscriberId, Topic,
};

const STDOUT_SUBSCRIBER: &str = "cli-stdout";

/// 스트림 명령 인자.
#[derive(Debug, Args)]
pub struct StreamArgs {
    /// 구독할 토픽 (여러 번 지정 가능, 기본: 설정 파일의 stream.topics)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// 확정된 캔들만 출력
    #[arg(long)]
    pub closed_only: bool,

    /// 지정한 시간(초) 후 종료
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

pub async fn run_stream(config: &AppConfig, args: StreamArgs) -> Result<()> {
    let mut settings = config.stream.clone();
    if args.closed_only {
        settings.kline_policy = KlinePolicy::ClosedOnly;
    }

    let topics = resolve_topics(&args.topics, &settings.topics);
    if topics.is_empty() {
        bail!("구독할 토픽이 없습니다");
    }

    let shutdown_timeout = Duration::from_millis(settings.shutdown_timeout_ms);
    let connector = Arc::new(BinanceFeedConnector::new(&BinanceConfig::from_settings(
        &config.exchange,
    )));
    info!(endpoint = %connector.endpoint(), topics = topics.len(), "Starting stream");

    let sink = Arc::new(BroadcastSink::with_capacity(settings.subscriber_buffer));
    let multiplexer = StreamMultiplexer::new(connector, settings);

    let (tx, mut events) = mpsc::unbounded_channel();
    for topic in &topics {
        spawn_forwarder(topic.clone(), sink.subscribe(topic), tx.clone());
        multiplexer.add_subscriber(
            topic.clone(),
            SubscriberId::new(STDOUT_SUBSCRIBER),
            SinkSubscriber::new(sink.clone()),
        );
    }
    drop(tx);

    let mut status = multiplexer.status();
    multiplexer.start();

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut failure = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            _ = wait_until(deadline) => {
                info!("Stream duration elapsed");
                break;
            }
            event = events.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&*event)?),
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(status = ?current, "Feed status changed");
                if let FeedStatus::Failed(reason) = current {
                    failure = Some(reason);
                    break;
                }
            }
        }
    }

    if let Err(e) = multiplexer.shutdown(shutdown_timeout).await {
        warn!(error = %e, "Stream shutdown was forced");
    }

    match failure {
        Some(reason) => bail!("스트림 연결 실패: {}", reason),
        None => Ok(()),
    }
}

/// 인자로 받은 토픽이 있으면 그것을, 없으면 설정의 토픽을 사용합니다. 중복은 제거됩니다.
fn resolve_topics(cli: &[String], configured: &[String]) -> Vec<Topic> {
    let source = if cli.is_empty() { configured } else { cli };
    let mut topics: Vec<Topic> = Vec::new();
    for name in source {
        let topic = Topic::new(name.as_str());
        if !topic.as_str().is_empty() && !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    topics
}

/// 토픽 broadcast 수신자를 출력 채널로 합칩니다.
fn spawn_forwarder(
    topic: Topic,
    mut rx: broadcast::Receiver<Arc<OutboundEvent>>,
    tx: mpsc::UnboundedSender<Arc<OutboundEvent>>,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "Output lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
