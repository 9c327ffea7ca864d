//! SMA 크로스오버 백테스트 시나리오 테스트.
//!
//! 엔진 전이 규칙과 서비스의 조회/오류 매핑을 함께 검증합니다.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

use relay_analytics::backtest::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestRequest, BacktestService, TradeSide,
};
use relay_core::{Candle, CandleSeries, Timeframe};
use relay_exchange::{ExchangeError, ExchangeResult, HistoricalCandles};

const HOUR_MS: i64 = 3_600_000;

fn series(closes: &[f64]) -> CandleSeries {
    CandleSeries::from_candles(
        "BTCUSDT",
        Timeframe::H1,
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::flat(i as i64 * HOUR_MS, c)),
    )
    .unwrap()
}

fn run(closes: &[f64], sma_period: usize, capital: f64) -> Result<relay_analytics::BacktestReport, BacktestError> {
    BacktestEngine::new(BacktestConfig::new(sma_period, capital))
        .unwrap()
        .run(&series(closes))
}

// ==================== 엔진 시나리오 ====================

#[test]
fn test_single_breakout_buys_once() {
    let mut closes = vec![10.0; 20];
    closes.push(12.0);

    let report = run(&closes, 20, 10_000.0).unwrap();

    assert_eq!(report.trade_count, 1);
    let trade = &report.trades[0];
    assert_eq!(trade.side, TradeSide::Buy);
    assert_eq!(trade.price, 12.0);
    assert_eq!(trade.timestamp.timestamp_millis(), 20 * HOUR_MS);
}

#[test]
fn test_round_trip_profit() {
    let report = run(&[110.0, 90.0, 100.0, 130.0, 110.0], 2, 10_000.0).unwrap();

    let sides: Vec<TradeSide> = report.trades.iter().map(|t| t.side).collect();
    assert_eq!(sides, vec![TradeSide::Buy, TradeSide::Sell]);
    assert_eq!(report.trades[0].price, 100.0);
    assert_eq!(report.trades[0].size, 100.0);
    assert_eq!(report.trades[1].price, 110.0);
    assert_eq!(report.trades[1].size, 11_000.0);

    let rounded = report.rounded();
    assert_eq!(rounded.final_value, 11_000.0);
    assert_eq!(rounded.profit_loss, 1_000.0);
    assert_eq!(rounded.profit_loss_percent, 10.0);
}

#[test]
fn test_falling_market_never_buys() {
    let closes: Vec<f64> = (0..50).map(|i| 500.0 - i as f64).collect();
    let report = run(&closes, 5, 1_000.0).unwrap();

    assert_eq!(report.trade_count, 0);
    assert_eq!(report.final_value, 1_000.0);
    assert_eq!(report.profit_loss, 0.0);
}

#[test]
fn test_history_boundary() {
    let err = run(&[1.0, 2.0, 3.0], 3, 100.0).unwrap_err();
    assert!(matches!(
        err,
        BacktestError::InsufficientHistory {
            required: 4,
            provided: 3
        }
    ));

    let report = run(&[1.0, 2.0, 3.0, 4.0], 3, 100.0).unwrap();
    assert!(report.trade_count <= 1);
}

proptest! {
    #[test]
    fn prop_trades_alternate_and_runs_are_repeatable(
        closes in prop::collection::vec(1.0f64..1_000.0, 0..200),
        sma_period in 1usize..30,
    ) {
        let engine = BacktestEngine::new(BacktestConfig::new(sma_period, 10_000.0)).unwrap();
        let input = series(&closes);

        match engine.run(&input) {
            Ok(report) => {
                prop_assert!(closes.len() > sma_period);
                prop_assert_eq!(report.trade_count, report.trades.len());

                for (i, trade) in report.trades.iter().enumerate() {
                    let expected = if i % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell };
                    prop_assert_eq!(trade.side, expected);
                }
                if let Some(last) = report.trades.last() {
                    if last.side == TradeSide::Sell {
                        prop_assert_eq!(report.final_value, last.size);
                    }
                } else {
                    prop_assert_eq!(report.final_value, 10_000.0);
                }

                let again = engine.run(&input).unwrap();
                prop_assert_eq!(again, report);
            }
            Err(BacktestError::InsufficientHistory { required, provided }) => {
                prop_assert_eq!(required, sma_period + 1);
                prop_assert_eq!(provided, closes.len());
                prop_assert!(closes.len() <= sma_period);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}

// ==================== 서비스 ====================

#[derive(Debug, Clone, PartialEq)]
struct FetchCall {
    symbol: String,
    timeframe: Timeframe,
    limit: usize,
    min_required: usize,
}

enum Reply {
    Closes(Vec<f64>),
    Fail(fn() -> ExchangeError),
}

struct MockCandles {
    reply: Reply,
    calls: Mutex<Vec<FetchCall>>,
}

impl MockCandles {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoricalCandles for MockCandles {
    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        min_required: usize,
    ) -> ExchangeResult<CandleSeries> {
        self.calls.lock().unwrap().push(FetchCall {
            symbol: symbol.to_string(),
            timeframe,
            limit,
            min_required,
        });

        match &self.reply {
            Reply::Closes(closes) => {
                if closes.len() < min_required {
                    return Err(ExchangeError::NotEnoughData {
                        required: min_required,
                        provided: closes.len(),
                    });
                }
                Ok(series(closes))
            }
            Reply::Fail(make) => Err(make()),
        }
    }
}

#[tokio::test]
async fn test_service_fetch_window() {
    let provider = MockCandles::new(Reply::Closes(vec![110.0, 90.0, 100.0, 130.0, 110.0]));
    let service = BacktestService::new(provider.clone()).with_history_limit(3);

    let request = BacktestRequest::new("ethusdt")
        .with_timeframe(Timeframe::M15)
        .with_sma_period(2)
        .with_initial_capital(10_000.0);
    let report = service.run_backtest(request).await.unwrap();

    assert_eq!(report.trade_count, 2);
    assert_eq!(
        provider.calls(),
        vec![FetchCall {
            symbol: "ETHUSDT".to_string(),
            timeframe: Timeframe::M15,
            limit: 5,
            min_required: 4,
        }]
    );
}

#[tokio::test]
async fn test_service_short_history() {
    let provider = MockCandles::new(Reply::Closes(vec![100.0; 10]));
    let service = BacktestService::new(provider);

    let err = service
        .run_backtest(BacktestRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BacktestError::InsufficientHistory {
            required: 187,
            provided: 10
        }
    ));
}

#[tokio::test]
async fn test_service_upstream_failure_is_not_retried() {
    let provider = MockCandles::new(Reply::Fail(|| {
        ExchangeError::NetworkError("connection reset".to_string())
    }));
    let service = BacktestService::new(provider.clone());

    let err = service
        .run_backtest(BacktestRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BacktestError::Upstream(ExchangeError::NetworkError(_))
    ));
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn test_service_rejects_bad_requests_before_fetching() {
    let provider = MockCandles::new(Reply::Closes(vec![1.0; 50]));
    let service = BacktestService::new(provider.clone());

    let err = service
        .run_backtest(BacktestRequest::new("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, BacktestError::InvalidConfig(_)));

    let err = service
        .run_backtest(BacktestRequest::default().with_sma_period(0))
        .await
        .unwrap_err();
    assert!(matches!(err, BacktestError::InvalidConfig(_)));

    let err = service
        .run_backtest(BacktestRequest::default().with_sma_period(900))
        .await
        .unwrap_err();
    assert!(matches!(err, BacktestError::InvalidConfig(_)));

    let err = service
        .run_backtest(BacktestRequest::new("BTCUSDT").with_sma_period(usize::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, BacktestError::InvalidConfig(_)));

    let err = BacktestService::new(provider.clone())
        .with_history_limit(usize::MAX)
        .run_backtest(BacktestRequest::new("BTCUSDT"))
        .await
        .unwrap_err();
    assert!(matches!(err, BacktestError::InvalidConfig(_)));

    assert!(provider.calls().is_empty());
}
