//! 거래소 에러 타입.

use relay_core::SeriesError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// 거래소 관련 에러.
///
/// REST 조회와 실시간 피드 모두에서 발생하는 업스트림 에러입니다.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 거래소 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 인증/권한 에러
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API 에러 코드
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 요청한 최소 캔들 수보다 적은 데이터
    #[error("Not enough data: required {required}, provided {provided}")]
    NotEnoughData { required: usize, provided: usize },

    /// 재연결 시도 횟수 초과
    #[error("Reconnect retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// 캔들 시리즈 무결성 에러
    #[error(transparent)]
    Series(#[from] SeriesError),
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    ///
    /// 피드 재연결 루프는 이 값이 `false`인 에러를 받으면 즉시 `FeedStatus::Failed`로 종료합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::WebSocket(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<tungstenite::Error> for ExchangeError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                ExchangeError::Disconnected(err.to_string())
            }
            tungstenite::Error::Io(e) => ExchangeError::NetworkError(e.to_string()),
            other => ExchangeError::WebSocket(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::Disconnected("eof".into()).is_retryable());
        assert!(ExchangeError::Timeout("slow".into()).is_retryable());
        assert!(!ExchangeError::Unauthorized("no key".into()).is_retryable());
        assert!(!ExchangeError::NotEnoughData {
            required: 187,
            provided: 10
        }
        .is_retryable());
        assert!(ExchangeError::WebSocket("x".into()).is_retryable());
        assert!(!ExchangeError::ParseError("bad".into()).is_retryable());
    }

    #[test]
    fn test_series_error_converts() {
        let err: ExchangeError = SeriesError::OutOfOrderCandle {
            last_open_time: 2,
            open_time: 1,
        }
        .into();
        assert!(matches!(err, ExchangeError::Series(_)));
    }

    #[test]
    fn test_closed_socket_maps_to_disconnected() {
        let err: ExchangeError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, ExchangeError::Disconnected(_)));
    }
}
