//! 백테스트 명령어.
//!
//! Binance REST에서 과거 캔들을 조회해 SMA 크로스오버 전략을 시뮬레이션합니다.
//!
//! # 사용 예시
//!
//! ```bash
//! # 기본값 (BTCUSDT, 1h, SMA 20, 자본 10000)
//! relay backtest
//!
//! # 15분봉 SMA(50), 결과를 JSON으로 출력
//! relay backtest -s ETHUSDT -i 15m --sma 50 --json
//! ```

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{info, Instrument};

use relay_analytics::{BacktestReport, BacktestRequest, BacktestService, TradeSide};
use relay_core::{relay_span, AppConfig, Timeframe};

use super::rest_client;

/// 백테스트 명령 인자.
#[derive(Debug, Args)]
pub struct BacktestArgs {
    /// 심볼 (예: BTCUSDT)
    #[arg(short, long, default_value = "BTCUSDT")]
    pub symbol: String,

    /// 캔들 간격 (1m, 5m, 1h, 1d ...)
    #[arg(short, long, default_value = "1h")]
    pub interval: Timeframe,

    /// 이동평균 기간 (기본: 설정 파일의 backtest.sma_period)
    #[arg(long)]
    pub sma: Option<usize>,

    /// 초기 자본 (기본: 설정 파일의 backtest.initial_capital)
    #[arg(long)]
    pub capital: Option<f64>,

    /// 전략 이름 (sma_crossover만 지원)
    #[arg(long, default_value = "sma_crossover")]
    pub strategy: String,

    /// 리포트를 JSON으로 출력
    #[arg(long)]
    pub json: bool,
}

/// 지원하는 전략 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyType {
    SmaCrossover,
}

impl StrategyType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "sma_crossover" | "smacrossover" | "sma" => Some(Self::SmaCrossover),
            _ => None,
        }
    }
}

/// 백테스트 실행
pub async fn run_backtest(config: &AppConfig, args: BacktestArgs) -> Result<()> {
    if StrategyType::from_str(&args.strategy).is_none() {
        bail!(
            "지원하지 않는 전략: {} (지원: sma_crossover)",
            args.strategy
        );
    }

    let request = BacktestRequest::new(args.symbol)
        .with_timeframe(args.interval)
        .with_sma_period(args.sma.unwrap_or(config.backtest.sma_period))
        .with_initial_capital(args.capital.unwrap_or(config.backtest.initial_capital));

    info!(
        symbol = %request.symbol,
        timeframe = %request.timeframe,
        sma_period = request.sma_period,
        initial_capital = request.initial_capital,
        "Starting backtest"
    );

    let service = BacktestService::new(rest_client(config)?)
        .with_history_limit(config.backtest.history_limit);

    let pb = spinner(args.json);
    pb.set_message(format!(
        "{} {} 캔들 조회 및 시뮬레이션 중...",
        request.symbol.to_uppercase(),
        request.timeframe
    ));

    let symbol = request.symbol.to_uppercase();
    let span = relay_span!("backtest", symbol);
    let result = service.run_backtest(request).instrument(span).await;
    pb.finish_and_clear();

    let report = result
        .with_context(|| format!("{} 백테스트 실패", symbol))?
        .rounded();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&symbol, &report);
    }

    Ok(())
}

fn spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_report(symbol: &str, report: &BacktestReport) {
    println!("\n{}", symbol);
    println!("{}", report.summary());

    if report.trades.is_empty() {
        println!("\n거래 없음");
        return;
    }

    println!(
        "\n{:<22} {:<5} {:>14} {:>18}",
        "시각", "방향", "가격", "수량/금액"
    );
    for trade in &report.trades {
        let side = match trade.side {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        };
        println!(
            "{:<22} {:<5} {:>14.4} {:>18.6}",
            trade.timestamp.format("%Y-%m-%d %H:%M"),
            side,
            trade.price,
            trade.size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: BacktestArgs,
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            StrategyType::from_str("SMA-Crossover"),
            Some(StrategyType::SmaCrossover)
        );
        assert_eq!(StrategyType::from_str("rsi"), None);
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["relay"]);
        assert_eq!(cli.args.symbol, "BTCUSDT");
        assert_eq!(cli.args.interval, Timeframe::H1);
        assert!(cli.args.sma.is_none());
        assert!(!cli.args.json);
    }

    #[test]
    fn test_interval_is_parsed() {
        let cli = TestCli::parse_from(["relay", "-i", "15m", "--sma", "50", "--json"]);
        assert_eq!(cli.args.interval, Timeframe::M15);
        assert_eq!(cli.args.sma, Some(50));
        assert!(cli.args.json);
        assert!(TestCli::try_parse_from(["relay", "-i", "7x"]).is_err());
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_rejected() {
        let cli = TestCli::parse_from(["relay", "--strategy", "bollinger"]);
        let err = run_backtest(&AppConfig::default(), cli.args)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bollinger"));
    }
}
