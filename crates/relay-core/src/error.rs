//! 핵심 에러 타입.
//!
//! 캔들 시리즈의 데이터 무결성 에러와 설정 에러를 정의합니다.
//! 데이터 무결성 에러는 항상 호출자에게 그대로 전달됩니다.

use thiserror::Error;

/// 캔들 시리즈 에러.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    /// 마지막 캔들보다 이른 시작 시각의 캔들 (시계 역행)
    #[error("캔들 순서 역행: 마지막 시작 시각 {last_open_time}, 입력 시작 시각 {open_time}")]
    OutOfOrderCandle { last_open_time: i64, open_time: i64 },

    /// OHLC 불변식 위반 캔들
    #[error("잘못된 캔들: {0}")]
    InvalidCandle(String),
}

/// 캔들 시리즈 작업을 위한 Result 타입.
pub type SeriesResult<T> = Result<T, SeriesError>;

/// 설정 로드/검증 에러.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 설정 소스 로드 실패
    #[error("설정 로드 실패: {0}")]
    Load(#[from] config::ConfigError),

    /// 잘못된 설정 값
    #[error("잘못된 설정 값 `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_message_names_both_times() {
        let err = SeriesError::OutOfOrderCandle {
            last_open_time: 2_000,
            open_time: 1_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("2000"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn test_invalid_config_message() {
        let err = ConfigError::Invalid {
            field: "backtest.sma_period",
            reason: "0보다 커야 합니다".to_string(),
        };
        assert!(err.to_string().contains("backtest.sma_period"));
    }
}
