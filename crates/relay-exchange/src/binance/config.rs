//! Binance 접속 설정.

use relay_core::ExchangeSettings;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Binance 클라이언트 설정.
///
/// # 보안
/// - `Debug` 구현은 민감 정보(`api_key`, `api_secret`)를 마스킹합니다.
pub struct BinanceConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket 기본 URL (`/ws` 경로 제외)
    pub ws_base_url: String,
    /// API 키
    pub api_key: Option<String>,
    /// API 시크릿
    pub api_secret: Option<SecretString>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 수신 윈도우 (밀리초)
    pub recv_window: u64,
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = match &self.api_key {
            Some(key) if key.len() > 8 => format!("{}...{}", &key[..4], &key[key.len() - 4..]),
            Some(_) => "***REDACTED***".to_string(),
            None => "<none>".to_string(),
        };
        let masked_secret = if self.api_secret.is_some() {
            "***REDACTED***"
        } else {
            "<none>"
        };

        f.debug_struct("BinanceConfig")
            .field("rest_base_url", &self.rest_base_url)
            .field("ws_base_url", &self.ws_base_url)
            .field("api_key", &masked_key)
            .field("api_secret", &masked_secret)
            .field("timeout_secs", &self.timeout_secs)
            .field("recv_window", &self.recv_window)
            .finish()
    }
}

impl BinanceConfig {
    /// 공개 엔드포인트 전용 설정 생성.
    pub fn new(rest_base_url: impl Into<String>, ws_base_url: impl Into<String>) -> Self {
        Self {
            rest_base_url: rest_base_url.into(),
            ws_base_url: ws_base_url.into(),
            api_key: None,
            api_secret: None,
            timeout_secs: 10,
            recv_window: 5000,
        }
    }

    /// API 자격 증명 설정.
    pub fn with_credentials(mut self, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self.api_secret = Some(SecretString::from(api_secret.into()));
        self
    }

    /// 애플리케이션 설정에서 생성.
    pub fn from_settings(settings: &ExchangeSettings) -> Self {
        Self {
            rest_base_url: settings.rest_url().trim_end_matches('/').to_string(),
            ws_base_url: settings.ws_url().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            api_secret: settings
                .api_secret
                .as_ref()
                .map(|secret| SecretString::from(secret.expose_secret().to_string())),
            timeout_secs: settings.timeout_secs,
            recv_window: settings.recv_window,
        }
    }

    /// 서명 요청에 필요한 자격 증명이 모두 있는지 여부.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    /// 단일 연결 다중 스트림 WebSocket 엔드포인트.
    pub fn ws_endpoint(&self) -> String {
        format!("{}/ws", self.ws_base_url)
    }
}
