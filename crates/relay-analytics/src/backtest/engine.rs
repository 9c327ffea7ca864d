//! 백테스팅 엔진
//!
//! 종가와 단순 이동평균의 교차로 매수/매도를 결정하는 상태 기계입니다.
//!
//! # 전이 규칙
//!
//! 인덱스 `i = sma_period`부터 각 캔들마다 한 번 평가합니다.
//! - **FLAT → LONG**: `prev_close <= prev_sma` 이고 `close > sma`
//! - **LONG → FLAT**: `prev_close >= prev_sma` 이고 `close < sma`
//!
//! 이전 캔들은 비엄격 비교, 현재 캔들은 엄격 비교입니다.
//! 종가가 이동평균과 같은 경우 단독으로는 전이를 일으키지 않습니다.
//! 전이마다 전체 자금을 이동합니다.
//!
//! # 사용 예시
//!
//! ```rust,ignore
//! use relay_analytics::backtest::{BacktestConfig, BacktestEngine};
//!
//! let engine = BacktestEngine::new(BacktestConfig::new(20, 10_000.0))?;
//! let report = engine.run(&series)?;
//! println!("{}", report.rounded().summary());
//! ```

use chrono::{DateTime, Utc};
use relay_core::CandleSeries;
use relay_exchange::ExchangeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::BacktestReport;
use crate::indicators::{sma, IndicatorError};

/// 백테스트 오류
#[derive(Debug, Error)]
pub enum BacktestError {
    /// 이력 부족 (전이를 한 번도 평가할 수 없음)
    #[error("데이터 부족: 필요 {required}개, 제공 {provided}개")]
    InsufficientHistory { required: usize, provided: usize },

    /// 설정 오류
    #[error("백테스트 설정 오류: {0}")]
    InvalidConfig(String),

    /// 지표 계산 오류
    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    /// 과거 데이터 조회 실패
    #[error("업스트림 오류: {0}")]
    Upstream(ExchangeError),

    /// 백그라운드 실행 실패
    #[error("실행 오류: {0}")]
    Worker(String),
}

impl From<ExchangeError> for BacktestError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::NotEnoughData { required, provided } => {
                BacktestError::InsufficientHistory { required, provided }
            }
            other => BacktestError::Upstream(other),
        }
    }
}

/// 백테스트 결과 타입
pub type BacktestResult<T> = Result<T, BacktestError>;

/// 백테스트 설정
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// 이동평균 기간
    pub sma_period: usize,
    /// 초기 자본금
    pub initial_capital: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            sma_period: 20,
            initial_capital: 10_000.0,
        }
    }
}

impl BacktestConfig {
    pub fn new(sma_period: usize, initial_capital: f64) -> Self {
        Self {
            sma_period,
            initial_capital,
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> BacktestResult<()> {
        if self.sma_period == 0 {
            return Err(BacktestError::InvalidConfig(
                "이동평균 기간은 0보다 커야 합니다".to_string(),
            ));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidConfig(
                "초기 자본은 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }

    /// 전이를 한 번이라도 평가하는 데 필요한 최소 캔들 수.
    pub fn required_candles(&self) -> usize {
        self.sma_period + 1
    }
}

/// 포지션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    /// 현금 보유
    #[default]
    Flat,
    /// 기초 자산 보유
    Long,
}

/// 거래 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// 시뮬레이션 거래 기록.
///
/// `size`는 매수 시 획득한 기초 자산 수량, 매도 시 회수한 현금입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestTrade {
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub price: f64,
    pub size: f64,
}

impl BacktestTrade {
    fn new(open_time: i64, side: TradeSide, price: f64, size: f64) -> Self {
        Self {
            timestamp: DateTime::from_timestamp_millis(open_time).unwrap_or_default(),
            side,
            price,
            size,
        }
    }
}

/// 백테스팅 엔진
///
/// 입력에 대한 순수 함수이므로 같은 시리즈로 반복 실행해도 같은 리포트를 반환합니다.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    /// 검증된 설정으로 엔진을 생성합니다.
    pub fn new(config: BacktestConfig) -> BacktestResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// 시리즈 전체를 시뮬레이션합니다.
    ///
    /// # Errors
    /// 캔들 수가 `sma_period + 1`보다 적으면 `BacktestError::InsufficientHistory`.
    pub fn run(&self, series: &CandleSeries) -> BacktestResult<BacktestReport> {
        let period = self.config.sma_period;
        let required = self.config.required_candles();
        if series.len() < required {
            return Err(BacktestError::InsufficientHistory {
                required,
                provided: series.len(),
            });
        }

        let candles = series.candles();
        let closes: Vec<f64> = series.closing_prices().collect();
        let averages = sma(closes.iter().copied(), period)?;

        let mut position = Position::Flat;
        let mut cash = self.config.initial_capital;
        let mut asset = 0.0_f64;
        let mut trades = Vec::new();

        for i in period..candles.len() {
            let (Some(prev_sma), Some(current_sma)) = (averages[i - 1], averages[i]) else {
                continue;
            };
            let prev_close = closes[i - 1];
            let close = closes[i];

            match position {
                Position::Flat if prev_close <= prev_sma && close > current_sma => {
                    asset = cash / close;
                    cash = 0.0;
                    position = Position::Long;
                    debug!(index = i, price = close, size = asset, "BUY");
                    trades.push(BacktestTrade::new(
                        candles[i].open_time,
                        TradeSide::Buy,
                        close,
                        asset,
                    ));
                }
                Position::Long if prev_close >= prev_sma && close < current_sma => {
                    cash = asset * close;
                    asset = 0.0;
                    position = Position::Flat;
                    debug!(index = i, price = close, size = cash, "SELL");
                    trades.push(BacktestTrade::new(
                        candles[i].open_time,
                        TradeSide::Sell,
                        close,
                        cash,
                    ));
                }
                _ => {}
            }
        }

        let last_close = closes.last().copied().unwrap_or_default();
        let final_value = cash + asset * last_close;

        Ok(BacktestReport::new(
            self.config.initial_capital,
            final_value,
            trades,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Candle, Timeframe};

    fn series(closes: &[f64]) -> CandleSeries {
        CandleSeries::from_candles(
            "BTCUSDT",
            Timeframe::H1,
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Candle::flat(i as i64 * 3_600_000, c)),
        )
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(BacktestConfig::default().validate().is_ok());
        assert!(BacktestConfig::new(0, 100.0).validate().is_err());
        assert!(BacktestConfig::new(5, 0.0).validate().is_err());
        assert!(BacktestConfig::new(5, f64::NAN).validate().is_err());
        assert!(matches!(
            BacktestEngine::new(BacktestConfig::new(5, -1.0)),
            Err(BacktestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_not_enough_data_maps_to_insufficient_history() {
        let err: BacktestError = ExchangeError::NotEnoughData {
            required: 187,
            provided: 10,
        }
        .into();
        assert!(matches!(
            err,
            BacktestError::InsufficientHistory {
                required: 187,
                provided: 10
            }
        ));

        let err: BacktestError = ExchangeError::Timeout("slow".into()).into();
        assert!(matches!(err, BacktestError::Upstream(_)));
    }

    #[test]
    fn test_tie_does_not_trigger() {
        // 종가가 이동평균과 같아지는 구간에서는 전이하지 않습니다.
        let engine = BacktestEngine::new(BacktestConfig::new(2, 1_000.0)).unwrap();
        let report = engine.run(&series(&[5.0, 5.0, 5.0, 5.0])).unwrap();
        assert_eq!(report.trade_count, 0);
        assert_eq!(report.final_value, 1_000.0);
    }

    #[test]
    fn test_open_position_is_marked_to_market() {
        let engine = BacktestEngine::new(BacktestConfig::new(2, 1_000.0)).unwrap();
        let report = engine.run(&series(&[10.0, 10.0, 20.0, 40.0])).unwrap();

        assert_eq!(report.trade_count, 1);
        assert_eq!(report.trades[0].side, TradeSide::Buy);
        assert_eq!(report.trades[0].price, 20.0);
        assert_eq!(report.trades[0].size, 50.0);
        assert_eq!(report.final_value, 2_000.0);
        assert_eq!(report.profit_loss_percent, 100.0);
    }

    #[test]
    fn test_trade_timestamp_is_candle_open_time() {
        let engine = BacktestEngine::new(BacktestConfig::new(2, 1_000.0)).unwrap();
        let report = engine.run(&series(&[10.0, 10.0, 20.0])).unwrap();
        assert_eq!(report.trades[0].timestamp.timestamp_millis(), 2 * 3_600_000);
    }
}
