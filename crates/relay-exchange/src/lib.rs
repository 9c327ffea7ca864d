//! 거래소 연동 및 실시간 스트림 멀티플렉싱.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - Binance REST 클라이언트 (과거 캔들 조회, 서명된 계좌 조회)
//! - Binance WebSocket 피드 커넥터
//! - 프레임 분류기와 토픽 레지스트리
//! - 단일 업스트림 연결을 토픽별 구독자로 분배하는 `StreamMultiplexer`
//! - 외부 이벤트 싱크 (`BroadcastSink`)

pub mod binance;
pub mod error;
pub mod stream;
pub mod traits;

pub use binance::{
    AccountInfo, Balance, BinanceClient, BinanceConfig, BinanceFeedConnector, MAX_KLINE_LIMIT,
};
pub use error::*;
pub use stream::*;
pub use traits::*;
