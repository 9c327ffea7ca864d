//! 설정 관리.
//!
//! 다음 순서로 계층화하여 로드합니다 (뒤쪽이 우선):
//! 1. 코드 기본값 (`Default`)
//! 2. 선택적 설정 파일 (TOML 등)
//! 3. `RELAY__` 접두사 환경 변수 (예: `RELAY__STREAM__MAX_RECONNECT_ATTEMPTS=5`)

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::logging::{LogConfig, LogFormat};

/// Binance 테스트넷 REST URL.
pub const TESTNET_REST_URL: &str = "https://testnet.binance.vision";
/// Binance 테스트넷 WebSocket URL.
pub const TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision";
/// Binance 메인넷 REST URL.
pub const MAINNET_REST_URL: &str = "https://api.binance.com";
/// Binance 메인넷 WebSocket URL.
pub const MAINNET_WS_URL: &str = "wss://stream.binance.com:9443";

/// 애플리케이션 설정.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 거래소 접속 설정
    pub exchange: ExchangeSettings,
    /// 스트림 멀티플렉서 설정
    pub stream: StreamSettings,
    /// 백테스트 설정
    pub backtest: BacktestSettings,
    /// 로깅 설정
    pub logging: LoggingSettings,
}

/// 거래소 접속 설정.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// 테스트넷 사용 여부
    pub testnet: bool,
    /// REST API URL 오버라이드
    pub rest_base_url: Option<String>,
    /// WebSocket URL 오버라이드
    pub ws_base_url: Option<String>,
    /// API 키
    pub api_key: Option<String>,
    /// API 시크릿
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_secret: Option<SecretString>,
    /// HTTP 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 서명 요청 유효 시간 (밀리초)
    pub recv_window: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            testnet: true,
            rest_base_url: None,
            ws_base_url: None,
            api_key: None,
            api_secret: None,
            timeout_secs: 10,
            recv_window: 5000,
        }
    }
}

impl ExchangeSettings {
    /// 실제로 사용할 REST URL.
    pub fn rest_url(&self) -> &str {
        match &self.rest_base_url {
            Some(url) => url,
            None if self.testnet => TESTNET_REST_URL,
            None => MAINNET_REST_URL,
        }
    }

    /// 실제로 사용할 WebSocket URL.
    pub fn ws_url(&self) -> &str {
        match &self.ws_base_url {
            Some(url) => url,
            None if self.testnet => TESTNET_WS_URL,
            None => MAINNET_WS_URL,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

/// 진행 중인(미확정) 캔들 전달 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KlinePolicy {
    /// 모든 캔들 갱신을 전달
    #[default]
    Live,
    /// 확정된(`x == true`) 캔들만 전달
    ClosedOnly,
}

/// 스트림 멀티플렉서 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// 시작 시 구독할 토픽
    pub topics: Vec<String>,
    /// 캔들 전달 정책
    pub kline_policy: KlinePolicy,
    /// 첫 재연결 대기 시간 (밀리초)
    pub reconnect_initial_ms: u64,
    /// 최대 재연결 대기 시간 (밀리초)
    pub reconnect_max_ms: u64,
    /// 최대 연속 재연결 시도 횟수
    pub max_reconnect_attempts: u32,
    /// 핑 전송 간격 (초)
    pub ping_interval_secs: u64,
    /// 종료 대기 제한 시간 (밀리초)
    pub shutdown_timeout_ms: u64,
    /// 구독자별 메일박스 크기
    pub subscriber_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            topics: vec![
                "!miniTicker@arr".to_string(),
                "btcusdt@miniTicker".to_string(),
                "btcusdt@kline_1m".to_string(),
            ],
            kline_policy: KlinePolicy::Live,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            max_reconnect_attempts: 10,
            ping_interval_secs: 30,
            shutdown_timeout_ms: 3_000,
            subscriber_buffer: 256,
        }
    }
}

/// 백테스트 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// SMA 기간
    pub sma_period: usize,
    /// 초기 자본
    pub initial_capital: f64,
    /// 평가 구간 캔들 수 (1시간봉 7일 = 168)
    pub history_limit: usize,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            sma_period: 20,
            initial_capital: 10_000.0,
            history_limit: 168,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: LogFormat,
    /// span 진입/종료 이벤트 출력
    pub span_events: bool,
    /// 파일명과 줄 번호 출력
    pub file: bool,
    /// 스레드 ID 출력
    pub thread_ids: bool,
    /// 모듈 경로 출력
    pub target: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            span_events: false,
            file: true,
            thread_ids: false,
            target: true,
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        LogConfig::new(settings.level.clone())
            .with_format(settings.format)
            .with_span_events(settings.span_events)
            .with_file(settings.file)
            .with_thread_ids(settings.thread_ids)
            .with_target(settings.target)
    }
}

impl AppConfig {
    /// 기본값, 선택적 파일, 환경 변수 순으로 설정을 로드합니다.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("stream.topics")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 값의 유효성을 검사합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.backtest.sma_period == 0 {
            return Err(invalid("backtest.sma_period", "0보다 커야 합니다"));
        }
        if !(self.backtest.initial_capital.is_finite() && self.backtest.initial_capital > 0.0) {
            return Err(invalid("backtest.initial_capital", "양의 유한값이어야 합니다"));
        }
        if self.backtest.history_limit == 0 {
            return Err(invalid("backtest.history_limit", "0보다 커야 합니다"));
        }
        if self.stream.reconnect_initial_ms == 0
            || self.stream.reconnect_initial_ms > self.stream.reconnect_max_ms
        {
            return Err(invalid(
                "stream.reconnect_initial_ms",
                format!(
                    "1 이상, reconnect_max_ms({}) 이하여야 합니다",
                    self.stream.reconnect_max_ms
                ),
            ));
        }
        if self.stream.ping_interval_secs == 0 {
            return Err(invalid("stream.ping_interval_secs", "0보다 커야 합니다"));
        }
        if self.stream.subscriber_buffer == 0 {
            return Err(invalid("stream.subscriber_buffer", "0보다 커야 합니다"));
        }
        if self.stream.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid("stream.topics", "빈 토픽이 포함되어 있습니다"));
        }
        if self.exchange.timeout_secs == 0 {
            return Err(invalid("exchange.timeout_secs", "0보다 커야 합니다"));
        }
        Ok(())
    }
}
