//! 기술적 지표 모듈.
//!
//! # 지원 지표
//!
//! ## 추세 지표 (Trend Indicators)
//! - **SMA**: 단순 이동평균 (Simple Moving Average)
//!
//! 모든 지표는 입력과 같은 길이의 시퀀스를 반환하며,
//! 룩백 구간 이전 위치는 `None`입니다 (0으로 채우지 않음).

pub mod trend;

use thiserror::Error;

pub use trend::{sma, SmaParams, TrendIndicators};

/// 지표 계산 오류.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    /// 잘못된 파라미터
    #[error("잘못된 파라미터: {0}")]
    InvalidParameter(String),
}

/// 지표 계산 결과 타입.
pub type IndicatorResult<T> = Result<T, IndicatorError>;

/// 통합 지표 엔진.
#[derive(Debug, Default)]
pub struct IndicatorEngine {
    trend: TrendIndicators,
}

impl IndicatorEngine {
    /// 새로운 지표 엔진 생성.
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 추세 지표 ====================

    /// 단순 이동평균 (SMA) 계산.
    ///
    /// # 반환
    /// 입력과 같은 길이의 SMA 시퀀스 (처음 period-1개는 None)
    pub fn sma<I>(&self, values: I, params: SmaParams) -> IndicatorResult<Vec<Option<f64>>>
    where
        I: IntoIterator<Item = f64>,
    {
        self.trend.sma(values, params)
    }
}
