//! 추세 지표 (Trend Indicators).
//!
//! 이동평균 기반의 추세 지표들을 제공합니다.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{IndicatorError, IndicatorResult};

/// SMA 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmaParams {
    /// 이동평균 기간.
    pub period: usize,
}

impl Default for SmaParams {
    fn default() -> Self {
        Self { period: 20 }
    }
}

/// 추세 지표 계산기.
#[derive(Debug, Default)]
pub struct TrendIndicators;

impl TrendIndicators {
    /// 새로운 추세 지표 계산기 생성.
    pub fn new() -> Self {
        Self
    }

    /// 단순 이동평균 (SMA) 계산.
    ///
    /// SMA = (P1 + P2 + ... + Pn) / n
    pub fn sma<I>(&self, values: I, params: SmaParams) -> IndicatorResult<Vec<Option<f64>>>
    where
        I: IntoIterator<Item = f64>,
    {
        sma(values, params.period)
    }
}

/// 단순 이동평균을 누적 합으로 계산합니다.
///
/// 결과는 입력과 같은 길이이며, `i < period - 1` 위치는 `None`입니다.
/// 입력이 `period`보다 짧으면 모두 `None`입니다.
///
/// # Errors
/// `period`가 0이면 `IndicatorError::InvalidParameter`.
pub fn sma<I>(values: I, period: usize) -> IndicatorResult<Vec<Option<f64>>>
where
    I: IntoIterator<Item = f64>,
{
    if period == 0 {
        return Err(IndicatorError::InvalidParameter(
            "기간은 0보다 커야 합니다".to_string(),
        ));
    }

    let values = values.into_iter();
    let mut result = Vec::with_capacity(values.size_hint().0);
    let mut window = VecDeque::with_capacity(period + 1);
    let mut sum = 0.0_f64;
    let divisor = period as f64;

    for value in values {
        window.push_back(value);
        sum += value;

        if window.len() > period {
            if let Some(leaving) = window.pop_front() {
                sum -= leaving;
            }
        }

        result.push((window.len() == period).then(|| sum / divisor));
    }

    Ok(result)
}
