//! 마켓 릴레이 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 기본 토픽 실시간 스트리밍 (Ctrl-C로 종료)
//! relay stream
//!
//! # 확정된 5분봉만 60초 동안 수신
//! relay stream --topic ethusdt@kline_5m --closed-only --duration-secs 60
//!
//! # BTCUSDT 1시간봉 SMA(20) 크로스오버 백테스트
//! relay backtest -s BTCUSDT -i 1h --sma 20 --capital 10000
//!
//! # 최근 캔들 / 계좌 잔고
//! relay klines -s ETHUSDT -i 15m -l 50
//! relay account
//!
//! # 감성 분석 헬퍼 실행
//! relay sentiment --script scripts/analyze_sentiment.py -s BTCUSDT -t "ETF inflows keep rising"
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error};

use relay_core::{init_logging, AppConfig, LogConfig, LogFormat};

mod commands;

use commands::account::run_account;
use commands::backtest::{run_backtest, BacktestArgs};
use commands::klines::{run_klines, KlinesArgs};
use commands::sentiment::{run_sentiment, SentimentArgs};
use commands::stream::{run_stream, StreamArgs};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Market relay CLI - Binance 실시간 시세 중계 및 백테스트", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로 (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (설정 파일 값보다 우선)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 실시간 스트림을 구독하고 이벤트를 JSON 줄로 출력
    Stream(StreamArgs),

    /// SMA 크로스오버 백테스트 실행
    Backtest(BacktestArgs),

    /// 최근 캔들 조회
    Klines(KlinesArgs),

    /// 계좌 잔고 조회 (API 키 필요)
    Account,

    /// 외부 헬퍼로 텍스트 감성 분석
    Sentiment(SentimentArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env는 없어도 됩니다.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    let mut log_config = LogConfig::from(&config.logging);
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    init_logging(log_config).map_err(|e| anyhow!("로깅 초기화 실패: {}", e))?;
    debug!(config = ?config, "Configuration loaded");

    let result = match cli.command {
        Commands::Stream(args) => run_stream(&config, args).await,
        Commands::Backtest(args) => run_backtest(&config, args).await,
        Commands::Klines(args) => run_klines(&config, args).await,
        Commands::Account => run_account(&config).await,
        Commands::Sentiment(args) => run_sentiment(args).await,
    };

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}
