//! Binance Spot REST 클라이언트.
//!
//! 과거 캔들 조회(공개)와 계좌 조회(서명 필요)만 다룹니다.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use relay_core::{Candle, CandleSeries, Timeframe};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error, info};

use super::BinanceConfig;
use crate::traits::{ExchangeResult, HistoricalCandles};
use crate::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// 한 번에 조회할 수 있는 최대 캔들 수.
pub const MAX_KLINE_LIMIT: usize = 1000;

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAccountBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAccountInfo {
    balances: Vec<BinanceAccountBalance>,
    can_trade: bool,
    can_withdraw: bool,
    can_deposit: bool,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

// ============================================================================
// 계좌 타입
// ============================================================================

/// 자산 잔고.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// 계좌 정보.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// 계좌 잔고
    pub balances: Vec<Balance>,
    /// 거래 가능 여부
    pub can_trade: bool,
    /// 출금 가능 여부
    pub can_withdraw: bool,
    /// 입금 가능 여부
    pub can_deposit: bool,
}

impl AccountInfo {
    /// 잔고가 0이 아닌 자산만 반환합니다.
    pub fn non_zero_balances(&self) -> impl Iterator<Item = &Balance> {
        self.balances.iter().filter(|b| !b.total().is_zero())
    }
}

// ============================================================================
// Binance 클라이언트
// ============================================================================

/// Binance REST 클라이언트.
pub struct BinanceClient {
    config: BinanceConfig,
    client: Client,
}

impl BinanceClient {
    /// 새 Binance 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: BinanceConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    /// 현재 타임스탬프(밀리초).
    fn timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// HMAC-SHA256으로 쿼리 문자열 서명.
    fn sign(&self, query: &str) -> ExchangeResult<String> {
        let secret = self
            .config
            .api_secret
            .as_ref()
            .ok_or_else(|| ExchangeError::Unauthorized("API secret is not configured".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::Unauthorized(format!("invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// 파라미터에서 쿼리 문자열 생성.
    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// 공개 API 요청 (인증 불필요).
    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.config.rest_base_url, endpoint);
        let query = Self::build_query(params);

        let full_url = if query.is_empty() {
            url
        } else {
            format!("{}?{}", url, query)
        };

        debug!("GET {}", full_url);

        let response = self.client.get(&full_url).send().await?;
        self.handle_response(response).await
    }

    /// 서명된 API 요청 (인증 필요).
    async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ExchangeError::Unauthorized("API key is not configured".to_string()))?;

        let url = format!("{}{}", self.config.rest_base_url, endpoint);

        let mut all_params = params.to_vec();
        all_params.push(("timestamp", Self::timestamp_ms().to_string()));
        all_params.push(("recvWindow", self.config.recv_window.to_string()));

        let query = Self::build_query(&all_params);
        let signature = self.sign(&query)?;
        let full_url = format!("{}?{}&signature={}", url, query, signature);

        debug!("GET (signed) {}", endpoint);

        let response = self
            .client
            .get(&full_url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// API 응답 처리.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse response: {} - Body: {}", e, body);
                ExchangeError::ParseError(e.to_string())
            })
        } else if let Ok(error) = serde_json::from_str::<BinanceError>(&body) {
            Err(Self::map_error_code(error.code, &error.msg))
        } else {
            Err(ExchangeError::ApiError {
                code: i32::from(status.as_u16()),
                message: body,
            })
        }
    }

    /// Binance 에러 코드를 ExchangeError로 매핑.
    fn map_error_code(code: i32, msg: &str) -> ExchangeError {
        match code {
            -1001 => ExchangeError::Disconnected(msg.to_string()),
            -1002 | -2014 | -2015 => ExchangeError::Unauthorized(msg.to_string()),
            _ => ExchangeError::ApiError {
                code,
                message: msg.to_string(),
            },
        }
    }

    fn parse_price(field: &str, raw: &str) -> ExchangeResult<f64> {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ExchangeError::ParseError(format!("invalid {}: {:?}", field, raw)))
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn to_candle(kline: &BinanceKline) -> ExchangeResult<Candle> {
        let candle = Candle::new(
            kline.0,
            Self::parse_price("open", &kline.1)?,
            Self::parse_price("high", &kline.2)?,
            Self::parse_price("low", &kline.3)?,
            Self::parse_price("close", &kline.4)?,
        );
        Ok(match kline.5.parse::<f64>() {
            Ok(volume) if volume.is_finite() => candle.with_volume(volume),
            _ => candle,
        })
    }

    /// 최근 캔들 조회.
    ///
    /// `limit`은 1..=1000으로 제한됩니다.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        let resp: Vec<BinanceKline> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("interval", timeframe.to_binance_interval().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        resp.iter().map(Self::to_candle).collect()
    }

    /// 계좌 정보 조회 (서명 필요).
    pub async fn account(&self) -> ExchangeResult<AccountInfo> {
        let resp: BinanceAccountInfo = self.signed_get("/api/v3/account", &[]).await?;

        let balances = resp
            .balances
            .into_iter()
            .map(|b| Balance {
                free: Self::parse_decimal(&b.free),
                locked: Self::parse_decimal(&b.locked),
                asset: b.asset,
            })
            .collect();

        Ok(AccountInfo {
            balances,
            can_trade: resp.can_trade,
            can_withdraw: resp.can_withdraw,
            can_deposit: resp.can_deposit,
        })
    }
}

#[async_trait]
impl HistoricalCandles for BinanceClient {
    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        min_required: usize,
    ) -> ExchangeResult<CandleSeries> {
        let candles = self.klines(symbol, timeframe, limit).await?;

        if candles.len() < min_required {
            return Err(ExchangeError::NotEnoughData {
                required: min_required,
                provided: candles.len(),
            });
        }

        let series = CandleSeries::from_candles(symbol, timeframe, candles)?;
        info!(
            symbol = %series.symbol(),
            timeframe = %timeframe,
            candles = series.len(),
            "Fetched historical candles"
        );
        Ok(series)
    }
}
