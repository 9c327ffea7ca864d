//! 업스트림 프레임 분류기.
//!
//! 원시 프레임을 한 번만 파싱해 `StreamEvent`로 분류합니다.
//!
//! # 분류 규칙
//!
//! - 결합 스트림 봉투 `{stream, data}`는 벗겨내지만 `stream` 필드는 분류에 사용하지 않습니다.
//! - 배열 페이로드: 모든 원소가 `e == "24hrMiniTicker"`이면 `AggregateTicker`
//! - 객체 페이로드: `e == "24hrMiniTicker"`이면 `SingleTicker`, `e == "kline"`이면 `KlineUpdate`
//! - 그 외 모든 프레임은 `Unrecognized`이며 분류기는 절대 패닉하지 않습니다.
//!
//! 토픽은 페이로드의 `s`(심볼)와 `k.i`(간격) 필드에서 도출합니다.

use chrono::{DateTime, Utc};
use relay_core::{Candle, Timeframe};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Topic;

const MINI_TICKER_EVENT: &str = "24hrMiniTicker";
const KLINE_EVENT: &str = "kline";

/// 구독/해제 요청에 대한 응답 (`{"result": null, "id": 1}`).
pub const CONTROL_ACK: &str = "control acknowledgement";

// ============================================================================
// Binance 와이어 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsMiniTicker {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

// ============================================================================
// 분류 결과
// ============================================================================

/// 24시간 미니 티커.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniTicker {
    /// 이벤트 시각 (Unix 밀리초)
    pub event_time: i64,
    /// 심볼 (대문자, 예: "BTCUSDT")
    pub symbol: String,
    pub close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    /// 기준 자산 거래량
    pub volume: f64,
    /// 호가 자산 거래량
    pub quote_volume: f64,
}

impl MiniTicker {
    pub fn event_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.event_time)
    }
}

/// 분류된 스트림 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 전체 심볼 미니 티커 배열
    AggregateTicker(Vec<MiniTicker>),
    /// 단일 심볼 미니 티커
    SingleTicker(MiniTicker),
    /// 캔들 갱신
    KlineUpdate {
        topic: Topic,
        symbol: String,
        timeframe: Timeframe,
        candle: Candle,
        is_closed: bool,
    },
    /// 분류할 수 없는 프레임 (사유 포함)
    Unrecognized(String),
}

impl StreamEvent {
    /// 이벤트가 속한 토픽.
    pub fn topic(&self) -> Option<Topic> {
        match self {
            StreamEvent::AggregateTicker(_) => Some(Topic::all_mini_tickers()),
            StreamEvent::SingleTicker(ticker) => Some(Topic::mini_ticker(&ticker.symbol)),
            StreamEvent::KlineUpdate { topic, .. } => Some(topic.clone()),
            StreamEvent::Unrecognized(_) => None,
        }
    }

    /// 외부 클라이언트로 보낼 페이로드.
    ///
    /// 캔들은 차트 형식 `{time(초), open, high, low, close, isClosed}`로 변환됩니다.
    pub fn to_payload(&self) -> Value {
        match self {
            StreamEvent::AggregateTicker(tickers) => {
                serde_json::to_value(tickers).unwrap_or(Value::Null)
            }
            StreamEvent::SingleTicker(ticker) => {
                serde_json::to_value(ticker).unwrap_or(Value::Null)
            }
            StreamEvent::KlineUpdate {
                candle, is_closed, ..
            } => {
                let chart = candle.to_chart();
                json!({
                    "time": chart.time,
                    "open": chart.open,
                    "high": chart.high,
                    "low": chart.low,
                    "close": chart.close,
                    "isClosed": is_closed,
                })
            }
            StreamEvent::Unrecognized(_) => Value::Null,
        }
    }

    /// 구독 요청 응답 프레임인지 확인.
    pub fn is_control_ack(&self) -> bool {
        matches!(self, StreamEvent::Unrecognized(reason) if reason == CONTROL_ACK)
    }
}

// ============================================================================
// 분류기
// ============================================================================

/// 원시 프레임을 분류합니다.
pub fn classify_frame(raw: &[u8]) -> StreamEvent {
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => classify_value(value),
        Err(e) => StreamEvent::Unrecognized(format!("invalid JSON: {}", e)),
    }
}

fn classify_value(value: Value) -> StreamEvent {
    let payload = match value {
        Value::Object(mut map) if map.contains_key("stream") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    if let Value::Array(items) = payload {
        return classify_ticker_batch(items);
    }

    let event_type = payload.get("e").and_then(Value::as_str).map(str::to_owned);
    let result = match event_type.as_deref() {
        Some(MINI_TICKER_EVENT) => parse_mini_ticker(payload).map(StreamEvent::SingleTicker),
        Some(KLINE_EVENT) => parse_kline(payload),
        Some(other) => Err(format!("unsupported event type `{}`", other)),
        None if payload.get("result").is_some() && payload.get("id").is_some() => {
            Err(CONTROL_ACK.to_string())
        }
        None if payload.is_object() => Err("missing event type".to_string()),
        None => Err(format!("unexpected frame shape: {}", shape_name(&payload))),
    };

    result.unwrap_or_else(StreamEvent::Unrecognized)
}

fn classify_ticker_batch(items: Vec<Value>) -> StreamEvent {
    if items.is_empty() {
        return StreamEvent::Unrecognized("empty array".to_string());
    }

    let mut tickers = Vec::with_capacity(items.len());
    for item in items {
        if item.get("e").and_then(Value::as_str) != Some(MINI_TICKER_EVENT) {
            return StreamEvent::Unrecognized("array element is not a mini ticker".to_string());
        }
        match parse_mini_ticker(item) {
            Ok(ticker) => tickers.push(ticker),
            Err(reason) => return StreamEvent::Unrecognized(reason),
        }
    }
    StreamEvent::AggregateTicker(tickers)
}

fn parse_mini_ticker(value: Value) -> Result<MiniTicker, String> {
    let raw: WsMiniTicker =
        serde_json::from_value(value).map_err(|e| format!("malformed mini ticker: {}", e))?;

    Ok(MiniTicker {
        event_time: raw.event_time,
        symbol: raw.symbol.to_uppercase(),
        close: parse_price("c", &raw.close)?,
        open: parse_price("o", &raw.open)?,
        high: parse_price("h", &raw.high)?,
        low: parse_price("l", &raw.low)?,
        volume: parse_price("v", &raw.volume)?,
        quote_volume: parse_price("q", &raw.quote_volume)?,
    })
}

fn parse_kline(value: Value) -> Result<StreamEvent, String> {
    let raw: WsKlineEvent =
        serde_json::from_value(value).map_err(|e| format!("malformed kline: {}", e))?;
    let k = raw.kline;

    let timeframe = Timeframe::from_binance_interval(&k.interval)
        .ok_or_else(|| format!("unknown kline interval `{}`", k.interval))?;

    let candle = Candle::new(
        k.open_time,
        parse_price("o", &k.open)?,
        parse_price("h", &k.high)?,
        parse_price("l", &k.low)?,
        parse_price("c", &k.close)?,
    )
    .with_volume(parse_price("v", &k.volume)?);
    candle.validate().map_err(|e| e.to_string())?;

    Ok(StreamEvent::KlineUpdate {
        topic: Topic::kline(&raw.symbol, timeframe),
        symbol: raw.symbol.to_uppercase(),
        timeframe,
        candle,
        is_closed: k.is_closed,
    })
}

fn parse_price(field: &str, raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("field `{}` is not a number: {:?}", field, raw))
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
