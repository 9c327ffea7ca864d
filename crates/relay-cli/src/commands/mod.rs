//! CLI 명령어 구현 모듈.

pub mod account;
pub mod backtest;
pub mod klines;
pub mod sentiment;
pub mod stream;

use anyhow::{Context, Result};
use std::sync::Arc;

use relay_core::AppConfig;
use relay_exchange::{BinanceClient, BinanceConfig};

/// 설정의 거래소 섹션으로 REST 클라이언트를 생성합니다.
pub(crate) fn rest_client(config: &AppConfig) -> Result<Arc<BinanceClient>> {
    let client = BinanceClient::new(BinanceConfig::from_settings(&config.exchange))
        .context("Binance 클라이언트 생성 실패")?;
    Ok(Arc::new(client))
}
