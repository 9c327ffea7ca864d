//! 최근 캔들 조회 명령어.

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use relay_core::{AppConfig, Candle, Timeframe};
use relay_exchange::MAX_KLINE_LIMIT;

use super::rest_client;

/// 캔들 조회 인자.
#[derive(Debug, Args)]
pub struct KlinesArgs {
    /// 심볼 (예: BTCUSDT)
    #[arg(short, long, default_value = "BTCUSDT")]
    pub symbol: String,

    /// 캔들 간격
    #[arg(short, long, default_value = "1h")]
    pub interval: Timeframe,

    /// 조회 개수 (1..=1000)
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// 차트 형식 JSON으로 출력
    #[arg(long)]
    pub json: bool,
}

pub async fn run_klines(config: &AppConfig, args: KlinesArgs) -> Result<()> {
    if args.limit == 0 || args.limit > MAX_KLINE_LIMIT {
        bail!("limit은 1 이상 {} 이하여야 합니다", MAX_KLINE_LIMIT);
    }

    let client = rest_client(config)?;
    let candles = client
        .klines(&args.symbol, args.interval, args.limit)
        .await
        .with_context(|| format!("{} 캔들 조회 실패", args.symbol.to_uppercase()))?;

    info!(
        symbol = %args.symbol.to_uppercase(),
        timeframe = %args.interval,
        count = candles.len(),
        "Fetched klines"
    );

    if args.json {
        let chart: Vec<_> = candles.iter().map(Candle::to_chart).collect();
        println!("{}", serde_json::to_string_pretty(&chart)?);
        return Ok(());
    }

    println!(
        "{:<18} {:>14} {:>14} {:>14} {:>14} {:>16}",
        "시각", "시가", "고가", "저가", "종가", "거래량"
    );
    for candle in &candles {
        let time = candle
            .open_time_utc()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| candle.open_time.to_string());
        let volume = candle
            .volume
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<18} {:>14.4} {:>14.4} {:>14.4} {:>14.4} {:>16}",
            time, candle.open, candle.high, candle.low, candle.close, volume
        );
    }

    Ok(())
}
