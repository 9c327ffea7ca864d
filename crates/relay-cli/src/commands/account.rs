//! 계좌 잔고 조회 명령어.
//!
//! `RELAY__EXCHANGE__API_KEY`, `RELAY__EXCHANGE__API_SECRET` 환경 변수
//! 또는 설정 파일의 `exchange` 섹션에 API 키가 필요합니다.

use anyhow::{bail, Context, Result};
use tracing::info;

use relay_core::AppConfig;

use super::rest_client;

pub async fn run_account(config: &AppConfig) -> Result<()> {
    let client = rest_client(config)?;
    if !client.config().has_credentials() {
        bail!("API 키가 설정되지 않았습니다 (exchange.api_key, exchange.api_secret)");
    }

    let account = client.account().await.context("계좌 조회 실패")?;
    let balances: Vec<_> = account.non_zero_balances().collect();
    info!(assets = balances.len(), "Fetched account balances");

    println!(
        "거래 가능: {} | 출금 가능: {} | 입금 가능: {}",
        account.can_trade, account.can_withdraw, account.can_deposit
    );

    if balances.is_empty() {
        println!("잔고 없음");
        return Ok(());
    }

    println!("\n{:<10} {:>20} {:>20} {:>20}", "자산", "가용", "잠김", "합계");
    for balance in balances {
        println!(
            "{:<10} {:>20} {:>20} {:>20}",
            balance.asset,
            balance.free.normalize(),
            balance.locked.normalize(),
            balance.total().normalize()
        );
    }

    Ok(())
}
