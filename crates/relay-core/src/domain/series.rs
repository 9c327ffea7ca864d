//! 캔들 시리즈.
//!
//! 하나의 `(symbol, interval)` 쌍에 대한 시간순 캔들 목록을 소유합니다.
//!
//! # 추가 규칙
//!
//! - 새 캔들의 시작 시각이 마지막 캔들보다 크면 뒤에 추가됩니다.
//! - 같으면 마지막 캔들을 교체합니다 (진행 중인 캔들 갱신).
//! - 작으면 `OutOfOrderCandle`을 반환하고 시리즈는 변경되지 않습니다.

use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

use crate::error::{SeriesError, SeriesResult};
use crate::types::Timeframe;

use super::Candle;

/// `append` 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// 새 캔들이 뒤에 추가됨
    Appended,
    /// 마지막 캔들이 교체됨
    Replaced,
}

/// 심볼/간격별 캔들 시리즈.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// 빈 시리즈를 생성합니다. 심볼은 대문자로 정규화됩니다.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            timeframe,
            candles: Vec::new(),
        }
    }

    /// 캔들 목록에서 시리즈를 생성합니다.
    ///
    /// 모든 캔들은 `append` 규칙을 그대로 거칩니다.
    pub fn from_candles(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        candles: impl IntoIterator<Item = Candle>,
    ) -> SeriesResult<Self> {
        let mut series = Self::new(symbol, timeframe);
        for candle in candles {
            series.append(candle)?;
        }
        Ok(series)
    }

    /// 캔들을 추가하거나 진행 중인 마지막 캔들을 교체합니다.
    pub fn append(&mut self, candle: Candle) -> SeriesResult<AppendOutcome> {
        candle.validate()?;

        match self.candles.last_mut() {
            Some(last) if candle.open_time < last.open_time => Err(SeriesError::OutOfOrderCandle {
                last_open_time: last.open_time,
                open_time: candle.open_time,
            }),
            Some(last) if candle.open_time == last.open_time => {
                *last = candle;
                Ok(AppendOutcome::Replaced)
            }
            _ => {
                self.candles.push(candle);
                Ok(AppendOutcome::Appended)
            }
        }
    }

    /// `[from, to)` 구간의 읽기 전용 뷰를 반환합니다.
    ///
    /// 범위는 시리즈 길이에 맞춰 잘리며 절대 패닉하지 않습니다.
    pub fn slice(&self, from: usize, to: usize) -> &[Candle] {
        let len = self.candles.len();
        let to = to.min(len);
        let from = from.min(to);
        &self.candles[from..to]
    }

    /// 종가 시퀀스를 반환합니다.
    ///
    /// 반환된 이터레이터는 지연 평가되고 복제(clone)로 처음부터 다시 순회할 수 있습니다.
    pub fn closing_prices(&self) -> ClosingPrices<'_> {
        ClosingPrices {
            inner: self.candles.iter(),
        }
    }

    /// 심볼 (대문자).
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// 타임프레임.
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// 전체 캔들.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// 마지막 캔들.
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// 시리즈의 종가 이터레이터.
#[derive(Debug, Clone)]
pub struct ClosingPrices<'a> {
    inner: std::slice::Iter<'a, Candle>,
}

impl Iterator for ClosingPrices<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.inner.next().map(|c| c.close)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for ClosingPrices<'_> {
    fn next_back(&mut self) -> Option<f64> {
        self.inner.next_back().map(|c| c.close)
    }
}

impl ExactSizeIterator for ClosingPrices<'_> {}

impl FusedIterator for ClosingPrices<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series_of(closes: &[f64]) -> CandleSeries {
        CandleSeries::from_candles(
            "btcusdt",
            Timeframe::H1,
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Candle::flat(i as i64 * 3_600_000, c)),
        )
        .unwrap()
    }

    #[test]
    fn test_symbol_is_upper_cased() {
        let series = CandleSeries::new("ethusdt", Timeframe::M1);
        assert_eq!(series.symbol(), "ETHUSDT");
        assert!(series.is_empty());
    }

    #[test]
    fn test_append_and_replace_in_progress_candle() {
        let mut series = CandleSeries::new("BTCUSDT", Timeframe::M1);
        assert_eq!(series.append(Candle::flat(0, 10.0)).unwrap(), AppendOutcome::Appended);
        assert_eq!(series.append(Candle::flat(60_000, 11.0)).unwrap(), AppendOutcome::Appended);
        assert_eq!(series.append(Candle::flat(60_000, 12.0)).unwrap(), AppendOutcome::Replaced);

        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().close, 12.0);
    }

    #[test]
    fn test_clock_regression_is_reported_and_series_unchanged() {
        let mut series = series_of(&[1.0, 2.0, 3.0]);
        let before = series.clone();

        let err = series.append(Candle::flat(3_600_000, 9.0)).unwrap_err();
        assert_eq!(
            err,
            SeriesError::OutOfOrderCandle {
                last_open_time: 7_200_000,
                open_time: 3_600_000,
            }
        );
        assert_eq!(series, before);
    }

    #[test]
    fn test_invalid_candle_is_rejected() {
        let mut series = CandleSeries::new("BTCUSDT", Timeframe::M1);
        let err = series.append(Candle::new(0, 10.0, 9.0, 8.0, 10.0)).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidCandle(_)));
        assert!(series.is_empty());
    }

    #[test]
    fn test_from_candles_rejects_unsorted_input() {
        let result = CandleSeries::from_candles(
            "BTCUSDT",
            Timeframe::M1,
            vec![Candle::flat(60_000, 1.0), Candle::flat(0, 1.0)],
        );
        assert!(matches!(result, Err(SeriesError::OutOfOrderCandle { .. })));
    }

    #[test]
    fn test_slice_is_clamped() {
        let series = series_of(&[1.0, 2.0, 3.0, 4.0]);

        assert_eq!(series.slice(1, 3).len(), 2);
        assert_eq!(series.slice(2, 100).len(), 2);
        assert!(series.slice(10, 20).is_empty());
        assert!(series.slice(3, 1).is_empty());
        assert_eq!(series.slice(0, usize::MAX).len(), 4);
    }

    #[test]
    fn test_closing_prices_is_restartable() {
        let series = series_of(&[1.0, 2.0, 3.0]);
        let prices = series.closing_prices();

        assert_eq!(prices.len(), 3);
        let first: Vec<f64> = prices.clone().collect();
        let second: Vec<f64> = prices.collect();
        assert_eq!(first, vec![1.0, 2.0, 3.0]);
        assert_eq!(first, second);
        assert_eq!(series.closing_prices().rev().next(), Some(3.0));
    }

    proptest! {
        #[test]
        fn prop_open_times_never_decrease(steps in prop::collection::vec(-2i64..3, 1..60)) {
            let mut series = CandleSeries::new("BTCUSDT", Timeframe::M1);
            let mut t = 0i64;
            for step in steps {
                t += step * 60_000;
                let _ = series.append(Candle::flat(t, 1.0));
            }
            for pair in series.candles().windows(2) {
                prop_assert!(pair[0].open_time < pair[1].open_time);
            }
        }
    }
}
