//! 외부 협력자 trait 정의.
//!
//! 멀티플렉서와 백테스트 서비스는 이 trait들에만 의존하므로
//! 실제 소켓이나 HTTP 서버 없이 테스트할 수 있습니다.

use async_trait::async_trait;
use relay_core::{CandleSeries, Timeframe};

use crate::stream::Topic;
use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 과거 캔들 데이터 제공자.
#[async_trait]
pub trait HistoricalCandles: Send + Sync {
    /// 최근 `limit`개의 캔들을 조회해 시리즈로 반환합니다.
    ///
    /// 응답 캔들 수가 `min_required`보다 적으면 `ExchangeError::NotEnoughData`를 반환합니다.
    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        min_required: usize,
    ) -> ExchangeResult<CandleSeries>;
}

/// 실시간 피드 연결 팩토리.
///
/// 멀티플렉서는 재연결할 때마다 `connect`를 다시 호출합니다.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// 새 업스트림 연결을 엽니다.
    async fn connect(&self) -> ExchangeResult<Box<dyn FeedConnection>>;
}

/// 하나의 물리적 업스트림 연결.
#[async_trait]
pub trait FeedConnection: Send {
    /// 토픽 구독 요청을 전송합니다.
    async fn send_subscribe(&mut self, topics: &[Topic]) -> ExchangeResult<()>;

    /// 토픽 구독 해제 요청을 전송합니다.
    async fn send_unsubscribe(&mut self, topics: &[Topic]) -> ExchangeResult<()>;

    /// 다음 원시 프레임을 수신합니다.
    ///
    /// 연결이 닫히면 `None`을 반환합니다. 이 future는 취소되어도 프레임을 잃지 않아야 합니다.
    async fn next_frame(&mut self) -> Option<ExchangeResult<Vec<u8>>>;

    /// keepalive 핑을 전송합니다.
    async fn ping(&mut self) -> ExchangeResult<()>;

    /// 연결을 닫습니다.
    async fn close(&mut self) -> ExchangeResult<()>;
}
