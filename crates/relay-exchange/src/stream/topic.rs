//! 스트림 토픽 이름.
//!
//! Binance 스트림 이름을 그대로 토픽 키로 사용합니다:
//! - `!miniTicker@arr` - 전체 심볼 미니 티커 배열
//! - `btcusdt@miniTicker` - 단일 심볼 미니 티커
//! - `btcusdt@kline_1m` - 심볼/간격별 캔들

use relay_core::Timeframe;
use serde::{Deserialize, Serialize};
use std::fmt;

const ALL_MINI_TICKERS: &str = "!miniTicker@arr";
const MINI_TICKER_SUFFIX: &str = "@miniTicker";
const KLINE_INFIX: &str = "@kline_";

/// 토픽 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// 임의 토픽 이름으로 생성합니다.
    ///
    /// 앞뒤 공백을 제거하고, `@` 앞의 심볼 부분은 소문자로 바꿉니다.
    /// 스트림 부분(`miniTicker`, `kline_1M`)과 `!`로 시작하는 전체 스트림 이름은 그대로 둡니다.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.trim();
        match name.split_once('@') {
            Some((symbol, stream)) if !symbol.starts_with('!') => {
                Self(format!("{}@{}", symbol.to_lowercase(), stream))
            }
            _ => Self(name.to_string()),
        }
    }

    /// 전체 심볼 미니 티커 토픽.
    pub fn all_mini_tickers() -> Self {
        Self(ALL_MINI_TICKERS.to_string())
    }

    /// 단일 심볼 미니 티커 토픽.
    pub fn mini_ticker(symbol: &str) -> Self {
        Self(format!("{}{}", symbol.to_lowercase(), MINI_TICKER_SUFFIX))
    }

    /// 캔들 토픽.
    pub fn kline(symbol: &str, timeframe: Timeframe) -> Self {
        Self(format!(
            "{}{}{}",
            symbol.to_lowercase(),
            KLINE_INFIX,
            timeframe.to_binance_interval()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 캔들 토픽이면 `(심볼, 타임프레임)`을 반환합니다.
    pub fn kline_parts(&self) -> Option<(&str, Timeframe)> {
        let (symbol, interval) = self.0.split_once(KLINE_INFIX)?;
        if symbol.is_empty() {
            return None;
        }
        Timeframe::from_binance_interval(interval).map(|tf| (symbol, tf))
    }

    pub fn is_kline(&self) -> bool {
        self.kline_parts().is_some()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}
