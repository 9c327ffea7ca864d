//! # Relay Core
//!
//! 마켓 릴레이의 핵심 도메인 모델 및 공통 인프라를 제공합니다.
//!
//! - 캔들(OHLC) 및 캔들 시리즈
//! - 타임프레임 정의
//! - 설정 관리
//! - 로깅 인프라
//! - 심볼별 감성 분석 캐시

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
