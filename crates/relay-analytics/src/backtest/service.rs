//! 백테스트 서비스.
//!
//! 과거 캔들 조회 → 엔진 실행 → 리포트까지의 요청/응답 흐름을 묶습니다.
//! 엔진은 `spawn_blocking` 워커에서 실행되므로 스트림 처리 태스크를 막지 않습니다.

use relay_core::Timeframe;
use relay_exchange::{HistoricalCandles, MAX_KLINE_LIMIT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{BacktestConfig, BacktestEngine, BacktestError, BacktestReport, BacktestResult};

/// 기본 평가 구간 (1시간봉 7일).
pub const DEFAULT_HISTORY_LIMIT: usize = 168;

/// 백테스트 요청.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BacktestRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub sma_period: usize,
    pub initial_capital: f64,
}

impl Default for BacktestRequest {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            sma_period: 20,
            initial_capital: 10_000.0,
        }
    }
}

impl BacktestRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    pub fn with_sma_period(mut self, sma_period: usize) -> Self {
        self.sma_period = sma_period;
        self
    }

    pub fn with_initial_capital(mut self, initial_capital: f64) -> Self {
        self.initial_capital = initial_capital;
        self
    }
}

/// 백테스트 서비스.
pub struct BacktestService<P: ?Sized> {
    provider: Arc<P>,
    history_limit: usize,
}

impl<P: HistoricalCandles + ?Sized> BacktestService<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// 평가 구간 캔들 수 설정. 실제 조회 수는 여기에 `sma_period`를 더한 값입니다.
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// 백테스트를 실행합니다.
    ///
    /// # Errors
    /// - 조회된 캔들이 부족하면 `BacktestError::InsufficientHistory`
    /// - 조회 실패는 재시도 없이 `BacktestError::Upstream`
    pub async fn run_backtest(&self, request: BacktestRequest) -> BacktestResult<BacktestReport> {
        let symbol = request.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(BacktestError::InvalidConfig("심볼이 비어 있습니다".to_string()));
        }
        if self.history_limit == 0 {
            return Err(BacktestError::InvalidConfig(
                "평가 구간은 0보다 커야 합니다".to_string(),
            ));
        }

        let engine = BacktestEngine::new(BacktestConfig::new(
            request.sma_period,
            request.initial_capital,
        ))?;

        let limit = self
            .history_limit
            .checked_add(request.sma_period)
            .unwrap_or(usize::MAX);
        if limit > MAX_KLINE_LIMIT {
            return Err(BacktestError::InvalidConfig(format!(
                "조회 캔들 수 {}가 최대 {}를 초과합니다",
                limit, MAX_KLINE_LIMIT
            )));
        }
        let min_required = limit - 1;

        info!(
            symbol = %symbol,
            timeframe = %request.timeframe,
            limit,
            sma_period = request.sma_period,
            "Running backtest"
        );

        let series = self
            .provider
            .fetch_historical_candles(&symbol, request.timeframe, limit, min_required)
            .await?;

        let report = tokio::task::spawn_blocking(move || engine.run(&series))
            .await
            .map_err(|e| BacktestError::Worker(e.to_string()))??;

        info!(
            symbol = %symbol,
            final_value = report.final_value,
            profit_loss = report.profit_loss,
            profit_loss_percent = report.profit_loss_percent,
            trades = report.trade_count,
            "Backtest complete"
        );

        Ok(report)
    }
}
