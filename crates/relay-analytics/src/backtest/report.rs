//! 백테스트 리포트.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::{BacktestTrade, TradeSide};

/// 백테스트 실행 리포트
///
/// 엔진이 만든 값은 반올림되지 않은 원값입니다. 표시용 값은 [`BacktestReport::rounded`]를 사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    /// 초기 자본금
    pub initial_capital: f64,
    /// 최종 평가액 (미청산 포지션은 마지막 종가로 평가)
    pub final_value: f64,
    /// 손익
    pub profit_loss: f64,
    /// 손익률 (%)
    pub profit_loss_percent: f64,
    /// 거래 횟수
    pub trade_count: usize,
    /// 거래 기록 (시간순)
    pub trades: Vec<BacktestTrade>,
}

impl BacktestReport {
    pub fn new(initial_capital: f64, final_value: f64, trades: Vec<BacktestTrade>) -> Self {
        let profit_loss = final_value - initial_capital;
        Self {
            initial_capital,
            final_value,
            profit_loss,
            profit_loss_percent: profit_loss / initial_capital * 100.0,
            trade_count: trades.len(),
            trades,
        }
    }

    /// 금액과 비율 필드를 소수점 둘째 자리로 반올림한 사본.
    pub fn rounded(&self) -> Self {
        Self {
            final_value: round2(self.final_value),
            profit_loss: round2(self.profit_loss),
            profit_loss_percent: round2(self.profit_loss_percent),
            ..self.clone()
        }
    }

    /// 요약 문자열 반환
    pub fn summary(&self) -> String {
        let buys = self
            .trades
            .iter()
            .filter(|t| t.side == TradeSide::Buy)
            .count();

        format!(
            "백테스트 결과 요약\n\
             ═══════════════════════════════════════\n\
             초기 자본: {:.2}\n\
             최종 자산: {:.2}\n\
             순수익: {:.2}\n\
             총 수익률: {:.2}%\n\
             ───────────────────────────────────────\n\
             총 거래: {} (매수 {}, 매도 {})\n\
             ═══════════════════════════════════════",
            self.initial_capital,
            self.final_value,
            self.profit_loss,
            self.profit_loss_percent,
            self.trade_count,
            buys,
            self.trade_count - buys,
        )
    }
}

fn round2(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}
