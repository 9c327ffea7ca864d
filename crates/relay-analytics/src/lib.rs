//! 분석 및 백테스팅 엔진.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 기술적 지표 (단순 이동평균)
//! - SMA 크로스오버 백테스팅 엔진과 리포트
//! - 과거 캔들 조회부터 리포트까지 묶은 백테스트 서비스
//! - 외부 감성 분석/가격 예측 헬퍼 프로세스 실행기

pub mod backtest;
pub mod helper;
pub mod indicators;

pub use backtest::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestReport, BacktestRequest,
    BacktestResult, BacktestService, BacktestTrade, Position, TradeSide,
};
pub use helper::{
    HelperError, HelperRequest, HelperResult, HelperRunner, PredictionResult, SentimentResult,
};
pub use indicators::{sma, IndicatorEngine, IndicatorError, IndicatorResult, SmaParams};
