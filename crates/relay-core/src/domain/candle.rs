//! OHLC 캔들 데이터.
//!
//! - `Candle` - 엔진과 시리즈가 다루는 캔들 (와이어 필드: `openTimeMillis`, `open`, `high`, `low`, `close`, `volume`)
//! - `ChartCandle` - 차트 클라이언트로 내보내는 형식 (`time`은 초 단위)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SeriesError, SeriesResult};

/// OHLC 캔들.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// 캔들 시작 시각 (Unix 밀리초)
    #[serde(rename = "openTimeMillis")]
    pub open_time: i64,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 거래량 (엔진에서는 사용하지 않음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    /// 시가=고가=저가=종가인 캔들을 생성합니다.
    pub fn flat(open_time: i64, price: f64) -> Self {
        Self::new(open_time, price, price, price, price)
    }

    /// 거래량을 설정합니다.
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// OHLC 불변식을 검사합니다.
    ///
    /// 모든 가격은 유한해야 하고 `low <= open, close <= high`를 만족해야 합니다.
    pub fn validate(&self) -> SeriesResult<()> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(SeriesError::InvalidCandle(format!(
                "유한하지 않은 가격 (t={})",
                self.open_time
            )));
        }
        if self.low > self.high {
            return Err(SeriesError::InvalidCandle(format!(
                "저가 {} > 고가 {} (t={})",
                self.low, self.high, self.open_time
            )));
        }
        for (name, price) in [("시가", self.open), ("종가", self.close)] {
            if price < self.low || price > self.high {
                return Err(SeriesError::InvalidCandle(format!(
                    "{} {}가 범위 [{}, {}] 밖 (t={})",
                    name, price, self.low, self.high, self.open_time
                )));
            }
        }
        Ok(())
    }

    /// 시작 시각을 UTC 시각으로 반환합니다.
    pub fn open_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.open_time)
    }

    /// 차트 클라이언트 형식으로 변환합니다.
    pub fn to_chart(&self) -> ChartCandle {
        ChartCandle {
            time: self.open_time.div_euclid(1000),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
        }
    }
}

/// 차트 클라이언트용 캔들 (`time`은 Unix 초).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartCandle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}
