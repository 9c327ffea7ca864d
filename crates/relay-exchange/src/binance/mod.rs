//! Binance Spot 연동.
//!
//! 메인넷과 테스트넷 모두 지원합니다.

mod config;
mod feed;
mod rest;

pub use config::BinanceConfig;
pub use feed::BinanceFeedConnector;
pub use rest::{AccountInfo, Balance, BinanceClient, MAX_KLINE_LIMIT};
