//! 감성 분석 명령어.
//!
//! 외부 헬퍼 스크립트에 `{"text": ...}`를 보내고 결과를 심볼별 캐시에 기록합니다.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use relay_analytics::HelperRunner;
use relay_core::SentimentStore;

/// 감성 분석 인자.
#[derive(Debug, Args)]
pub struct SentimentArgs {
    /// 헬퍼 스크립트 경로 (python3로 실행)
    #[arg(long)]
    pub script: PathBuf,

    /// 결과를 기록할 심볼
    #[arg(short, long, default_value = "BTCUSDT")]
    pub symbol: String,

    /// 분석할 텍스트
    #[arg(short, long)]
    pub text: String,

    /// 헬퍼 응답 제한 시간 (초)
    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,
}

pub async fn run_sentiment(args: SentimentArgs) -> Result<()> {
    let runner =
        HelperRunner::python(&args.script).with_timeout(Duration::from_secs(args.timeout_secs));
    let store = SentimentStore::new();

    let result = runner
        .analyze_sentiment(&store, &args.symbol, &args.text)
        .await
        .with_context(|| format!("감성 분석 실패 ({})", args.script.display()))?;

    let entry = store.latest(&args.symbol);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "symbol": args.symbol.to_uppercase(),
            "result": result,
            "entry": entry,
        }))?
    );

    Ok(())
}
