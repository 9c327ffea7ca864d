//! 백테스팅 모듈
//!
//! 과거 캔들로 SMA 크로스오버 전략을 시뮬레이션하고 손익을 계산합니다.
//!
//! # 주요 구성요소
//!
//! - [`BacktestConfig`]: 백테스트 설정 (이동평균 기간, 초기 자본)
//! - [`BacktestEngine`]: 포지션 상태 기계
//! - [`BacktestReport`]: 백테스트 결과 리포트
//! - [`BacktestService`]: 과거 데이터 조회부터 리포트까지

pub mod engine;
pub mod report;
pub mod service;

pub use engine::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestResult, BacktestTrade, Position,
    TradeSide,
};
pub use report::BacktestReport;
pub use service::{BacktestRequest, BacktestService, DEFAULT_HISTORY_LIMIT};
